//! Hardware smoke test: deploy a built project and look for a known string on
//! the board console.

use crate::error::PipelineError;
use crate::project::ProjectLayout;
use crate::tools::ToolchainPaths;
use anyhow::{Context, Result};
use chrono::Local;
use fpgaforge_toolchain::{CapturedStreams, ToolCommand, TtyCapture};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

pub const DEFAULT_MARKER: &str = "Hello world!";

#[derive(Debug, Clone)]
pub struct SmokeTestResult {
    pub tty_output: String,
    pub command_output: String,
    pub passed: bool,
}

#[derive(Debug, Clone)]
pub struct SmokeTest {
    capture: TtyCapture,
    deploy: ToolCommand,
}

impl SmokeTest {
    pub fn new(tools: &ToolchainPaths, tty_file: impl Into<PathBuf>) -> Self {
        Self {
            capture: TtyCapture::new(tty_file),
            deploy: tools.deploy.clone(),
        }
    }

    pub fn with_capture(mut self, capture: TtyCapture) -> Self {
        self.capture = capture;
        self
    }

    /// Deploy `layout` and record both streams in its `make.log`.
    pub fn run(&self, layout: &ProjectLayout, marker: &str) -> Result<SmokeTestResult> {
        let label = self.deploy.to_string();
        let command = self.deploy.clone().current_dir(&layout.dir);
        let log_path = layout.deploy_log();
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("opening {}", log_path.display()))?;

        info!(project = %layout.name, log = %log_path.display(), "running smoke test");
        writeln!(log, "[host_event] [{} start] {}", label, timestamp())?;
        let streams: CapturedStreams = self.capture.capture(&command)?;
        writeln!(log, "[host_event] [{} finish] {}", label, timestamp())?;
        writeln!(log, "[host_event] [tty_output]")?;
        writeln!(log, "{}", streams.tty_output)?;
        writeln!(log, "[host_event] [command_output]")?;
        writeln!(log, "{}", streams.command_output)?;

        if streams.timed_out {
            warn!(project = %layout.name, "console went quiet before the exit word");
        }
        Ok(SmokeTestResult {
            passed: streams.tty_output.contains(marker),
            tty_output: streams.tty_output,
            command_output: streams.command_output,
        })
    }

    /// Like [`SmokeTest::run`], but a missing marker is an error.
    pub fn deploy_and_verify(&self, layout: &ProjectLayout, marker: &str) -> Result<SmokeTestResult> {
        let result = self.run(layout, marker)?;
        if !result.passed {
            return Err(PipelineError::MarkerMissing {
                project: layout.dir.clone(),
                marker: marker.to_string(),
            }
            .into());
        }
        info!(project = %layout.name, marker, "smoke test passed");
        Ok(result)
    }
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
