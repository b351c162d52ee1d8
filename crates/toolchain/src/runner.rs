//! Blocking process execution with log routing.

use crate::command::ToolCommand;
use crate::error::ToolError;
use anyhow::Result;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Where a tool's stdout and stderr go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    /// Stream straight to the caller's terminal.
    Inherit,
    /// Append both streams to a log file. Existing content is kept so an
    /// interrupted build's diagnostics survive the next attempt.
    Append(PathBuf),
}

impl LogDestination {
    pub fn append(path: impl Into<PathBuf>) -> Self {
        LogDestination::Append(path.into())
    }
}

/// Executes external tools. Implementations block until the process exits and
/// return its exit code.
pub trait ToolRunner: Send + Sync {
    fn run(&self, command: &ToolCommand, log: &LogDestination) -> Result<i32>;
}

/// Run `command` and turn a non-zero exit code into [`ToolError::CommandFailed`].
pub fn run_checked(
    runner: &dyn ToolRunner,
    command: &ToolCommand,
    log: &LogDestination,
) -> Result<()> {
    let code = runner.run(command, log)?;
    if code != 0 {
        return Err(ToolError::CommandFailed {
            command: command.to_string(),
            code,
        }
        .into());
    }
    Ok(())
}

/// Runs tools as child processes of the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&self, command: &ToolCommand, log: &LogDestination) -> Result<i32> {
        let mut process = Command::new(&command.program);
        process.args(&command.args).envs(&command.env);
        if let Some(dir) = &command.cwd {
            process.current_dir(dir);
        }

        match log {
            LogDestination::Inherit => {
                process.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            LogDestination::Append(path) => {
                let file = open_append(path)?;
                let err = file.try_clone().map_err(|source| ToolError::Log {
                    path: path.clone(),
                    source,
                })?;
                process.stdout(Stdio::from(file)).stderr(Stdio::from(err));
            }
        }

        info!(
            command = %command,
            cwd = ?command.cwd,
            log = ?log,
            "running external tool"
        );
        let status = process.status().map_err(|source| ToolError::Spawn {
            command: command.to_string(),
            source,
        })?;
        // Signals leave no code; report them as a generic failure.
        let code = status.code().unwrap_or(-1);
        debug!(program = %command.program, code, "external tool exited");
        Ok(code)
    }
}

pub(crate) fn open_append(path: &Path) -> Result<File, ToolError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ToolError::Log {
            path: path.to_path_buf(),
            source,
        })?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| ToolError::Log {
            path: path.to_path_buf(),
            source,
        })
}
