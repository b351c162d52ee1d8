//! CLI wiring for fpgaforge.

use crate::session::ClosureSession;
use crate::sweep::{SmokeSettings, SweepOptions, SweepPlan};
use anyhow::Result;
use clap::{Parser, Subcommand};
use fpgaforge_explorer::{ResumePolicy, TrialLog};
use fpgaforge_pipeline::smoke::DEFAULT_MARKER;
use fpgaforge_pipeline::timing::extract_timing;
use fpgaforge_pipeline::{ProjectLayout, SmokeTest, ToolchainPaths};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "fpgaforge", about = "FPGA build orchestration and timing closure")]
pub struct Cli {
    /// Toolchain locations as JSON. Defaults plus FPGAFORGE_* variables otherwise.
    #[arg(long, global = true)]
    pub tools: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search every plan entry for its best achievable value.
    Optimize {
        #[arg(long)]
        plan: PathBuf,
        /// Ignore trial logs from earlier runs.
        #[arg(long, default_value_t = false)]
        restart: bool,
        #[arg(long, default_value_t = 1)]
        jobs: usize,
        /// Console capture file used for smoke tests.
        #[arg(long)]
        tty: Option<PathBuf>,
        /// Deploy each optimized build and require this console output.
        #[arg(long, requires = "tty")]
        smoke_marker: Option<String>,
    },
    /// Build one plan entry at a fixed value.
    Build {
        #[arg(long)]
        plan: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        value: u32,
    },
    /// Print the stages a build would run.
    Plan {
        #[arg(long)]
        plan: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        value: u32,
    },
    /// Read the timing summary of a built project.
    Timing {
        #[arg(long)]
        project: PathBuf,
        #[arg(long)]
        frequency: u32,
        #[arg(long)]
        divide_by: Option<u32>,
    },
    /// Deploy a built project and check its console output.
    Smoke {
        #[arg(long)]
        project: PathBuf,
        #[arg(long)]
        tty: PathBuf,
        #[arg(long, default_value = DEFAULT_MARKER)]
        marker: String,
    },
    /// Summarize a trial log.
    Trials {
        #[arg(long)]
        log: PathBuf,
    },
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let Cli { tools, command } = cli;
    let tools = match tools {
        Some(path) => ToolchainPaths::load(&path)?,
        None => ToolchainPaths::from_env(),
    };

    match command {
        Command::Optimize {
            plan,
            restart,
            jobs,
            tty,
            smoke_marker,
        } => {
            let session = ClosureSession::new(SweepPlan::load(&plan)?, tools);
            let smoke = match (tty, smoke_marker) {
                (Some(tty_file), Some(marker)) => Some(SmokeSettings { tty_file, marker }),
                _ => None,
            };
            let options = SweepOptions {
                jobs: jobs.max(1),
                policy: if restart {
                    ResumePolicy::Restart
                } else {
                    ResumePolicy::Resume
                },
                smoke,
            };
            let table = session.sweep(&options)?;
            println!("{}", table.render());
        }
        Command::Build { plan, name, value } => {
            let session = ClosureSession::new(SweepPlan::load(&plan)?, tools);
            let built = session.build(&name, value)?;
            println!("{}", built.xsa.display());
        }
        Command::Plan { plan, name, value } => {
            let session = ClosureSession::new(SweepPlan::load(&plan)?, tools);
            for stage in session.stages(&name, value)? {
                println!("{}", stage);
            }
        }
        Command::Timing {
            project,
            frequency,
            divide_by,
        } => {
            let layout = ProjectLayout::from_dir(project);
            let report = extract_timing(&layout, frequency as f64)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            println!("next maximum frequency: {} MHz", report.next_maximum_frequency());
            println!(
                "estimated maximum frequency: {:.3} MHz",
                report.estimate_maximum_frequency()
            );
            if let Some(divide_by) = divide_by {
                println!(
                    "next minimum clock divide ratio: {}",
                    report.next_minimum_clock_divide_by(divide_by)
                );
            }
        }
        Command::Smoke {
            project,
            tty,
            marker,
        } => {
            let layout = ProjectLayout::from_dir(project);
            let result = SmokeTest::new(&tools, tty).deploy_and_verify(&layout, &marker)?;
            info!(log = %layout.deploy_log().display(), "console output recorded");
            println!("{}", result.tty_output);
        }
        Command::Trials { log } => {
            let log = TrialLog::new(log);
            for run in log.runs()? {
                let status = match run.finished() {
                    Some((value, true)) => format!("converged at {}", value),
                    Some((value, false)) => format!("exhausted, best {}", value),
                    None => "in progress".to_string(),
                };
                println!(
                    "line {}: {} from {}, {} trials, {}",
                    run.start_line,
                    run.objective,
                    run.initial,
                    run.evaluations(),
                    status
                );
            }
        }
    }
    Ok(())
}
