//! In-process stand-ins for the external toolchain.

use crate::sweep::SweepPlan;
use anyhow::{anyhow, Result};
use fpgaforge_pipeline::timing::parse_clock_frequency;
use fpgaforge_pipeline::{BuildPipeline, ProjectLayout, ToolchainPaths};
use fpgaforge_toolchain::{LogDestination, ToolCommand, ToolRunner};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Every tool writes what the real one would. Synthesis reports slack as if
/// the slow clock domain had a fixed critical path.
pub struct SimulatedToolchain {
    critical_path_ns: f64,
    calls: Mutex<Vec<ToolCommand>>,
}

impl SimulatedToolchain {
    pub fn with_critical_path(critical_path_ns: f64) -> Arc<Self> {
        Arc::new(Self {
            critical_path_ns,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Number of commands run so far.
    pub fn builds(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
    }

    fn synthesize(&self, dir: &Path) -> Result<()> {
        let layout = ProjectLayout::from_dir(dir);
        let makefile = fs::read_to_string(layout.makefile())?;
        let frequency = parse_clock_frequency(&makefile).ok_or_else(|| anyhow!("no frequency"))?;
        let divide_by: f64 = makefile
            .lines()
            .find_map(|line| line.strip_prefix("CLOCK_DIVIDE_BY ?= "))
            .ok_or_else(|| anyhow!("no divider"))?
            .trim()
            .parse()?;
        let wns = 1e3 / frequency * divide_by - self.critical_path_ns;
        let tns = wns.min(0.0) * 10.0;
        fs::create_dir_all(layout.impl_dir())?;
        fs::write(
            layout.routed_timing_summary(),
            format!(
                "| Design Timing Summary\n| ---------------------\n\n    WNS(ns)      TNS(ns)\n    -------      -------\n    {:>7.3}   {:>10.3}\n",
                wns, tns
            ),
        )?;
        fs::write(layout.xsa(), "xsa")?;
        Ok(())
    }
}

impl ToolRunner for SimulatedToolchain {
    fn run(&self, command: &ToolCommand, _log: &LogDestination) -> Result<i32> {
        self.calls
            .lock()
            .map_err(|_| anyhow!("call log poisoned"))?
            .push(command.clone());
        let flag = |name: &str| {
            command
                .flag_value(name)
                .ok_or_else(|| anyhow!("{} missing from {}", name, command))
        };
        let subcommand = command.args.first().map(String::as_str);

        if command.flag_value("--fusion-blossom-syndrome-export-filename").is_some() {
            // first bracketed positional is the code distance
            let d = command
                .args
                .iter()
                .find(|arg| arg.starts_with('['))
                .ok_or_else(|| anyhow!("no code distance in {}", command))?
                .trim_matches(|c| c == '[' || c == ']');
            fs::write(flag("--fusion-blossom-syndrome-export-filename")?, d)?;
        } else if subcommand == Some("transform-syndromes") {
            let content = fs::read_to_string(&command.args[1])?;
            fs::write(&command.args[2], content)?;
        } else if subcommand == Some("parser") {
            let d: usize = fs::read_to_string(&command.args[1])?.trim().parse()?;
            fs::write(flag("--graph-file")?, format!(r#"{{"vertex_num": {}}}"#, d * d))?;
        } else if command.program == "build_micro_blossom" {
            let layout = ProjectLayout::new(Path::new(flag("--path")?), flag("--name")?);
            fs::create_dir_all(layout.verilog_dir())?;
            fs::write(
                layout.makefile(),
                format!(
                    "CLOCK_FREQUENCY ?= {}\nCLOCK_DIVIDE_BY ?= {}\n",
                    flag("--clock-frequency")?,
                    flag("--clock-divide-by")?
                ),
            )?;
            fs::write(layout.bus_source(), "module MicroBlossomBus;\n")?;
        } else if command.program == "make" && command.args.is_empty() {
            let dir = command.cwd.as_deref().ok_or_else(|| anyhow!("make without cwd"))?;
            self.synthesize(dir)?;
        }
        Ok(0)
    }
}

pub fn simulated_pipeline(plan: &SweepPlan, tools: Arc<SimulatedToolchain>) -> BuildPipeline {
    BuildPipeline::new(ToolchainPaths::default(), plan.pipeline_options(), tools)
}
