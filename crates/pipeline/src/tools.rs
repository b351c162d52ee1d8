//! Locations of the external tools the pipeline drives.

use anyhow::{Context, Result};
use fpgaforge_toolchain::ToolCommand;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming the embedded entry point for firmware builds.
pub const FIRMWARE_MAIN_ENV: &str = "EMBEDDED_BLOSSOM_MAIN";

/// Command prefixes for every external tool. Stages append their own
/// arguments to these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainPaths {
    pub syndrome_generator: ToolCommand,
    /// Provides the `parser` and `transform-syndromes` subcommands.
    pub micro_blossom: ToolCommand,
    pub visualizer: ToolCommand,
    pub project_generator: ToolCommand,
    /// Run with no extra arguments inside a generated project.
    pub build: ToolCommand,
    pub firmware: ToolCommand,
    pub embedded_dir: PathBuf,
    pub deploy: ToolCommand,
}

impl Default for ToolchainPaths {
    fn default() -> Self {
        Self {
            syndrome_generator: ToolCommand::new("qecp-cli").args(["tool", "benchmark"]),
            micro_blossom: ToolCommand::new("micro_blossom"),
            visualizer: ToolCommand::new("fusion_blossom"),
            project_generator: ToolCommand::new("build_micro_blossom"),
            build: ToolCommand::new("make"),
            firmware: ToolCommand::new("make").arg("Xilinx"),
            embedded_dir: PathBuf::from("src/cpu/embedded"),
            deploy: ToolCommand::new("make").arg("run_a72"),
        }
    }
}

impl ToolchainPaths {
    /// Defaults overridden by `FPGAFORGE_*` environment variables.
    pub fn from_env() -> Self {
        let mut paths = Self::default();
        if let Ok(program) = std::env::var("FPGAFORGE_GENERATOR") {
            paths.syndrome_generator.program = program;
        }
        if let Ok(program) = std::env::var("FPGAFORGE_MICRO_BLOSSOM") {
            paths.micro_blossom.program = program;
        }
        if let Ok(program) = std::env::var("FPGAFORGE_PROJECT_GENERATOR") {
            paths.project_generator.program = program;
        }
        if let Ok(dir) = std::env::var("FPGAFORGE_EMBEDDED_DIR") {
            paths.embedded_dir = PathBuf::from(dir);
        }
        paths
    }

    pub fn load(path: &Path) -> Result<Self> {
        let blob = fs::read_to_string(path)
            .with_context(|| format!("reading toolchain paths {}", path.display()))?;
        let paths = serde_json::from_str(&blob)
            .with_context(|| format!("parsing toolchain paths {}", path.display()))?;
        Ok(paths)
    }
}
