//! Terminal capture for remote deployment commands.
//!
//! Boards report over a serial console that is mirrored into a file on the
//! host. [`TtyCapture`] tails that file while a deployment command runs and
//! returns both the console text and the command's own stdout.

use crate::command::ToolCommand;
use crate::error::ToolError;
use anyhow::{anyhow, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct TtyCapture {
    pub tty_file: PathBuf,
    /// Capture stops as soon as this appears in the console stream.
    pub exit_word: String,
    /// Capture stops after this long without new console output.
    pub idle_timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct CapturedStreams {
    pub tty_output: String,
    pub command_output: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl TtyCapture {
    pub fn new(tty_file: impl Into<PathBuf>) -> Self {
        Self {
            tty_file: tty_file.into(),
            exit_word: "[exit]".into(),
            idle_timeout: Duration::from_secs(180),
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn with_exit_word(mut self, exit_word: impl Into<String>) -> Self {
        self.exit_word = exit_word.into();
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run `command` while collecting everything appended to the console file.
    pub fn capture(&self, command: &ToolCommand) -> Result<CapturedStreams> {
        if !self.tty_file.exists() {
            return Err(ToolError::MissingCapture(self.tty_file.clone()).into());
        }
        let mut console = File::open(&self.tty_file)?;
        // Only output produced by this deployment counts.
        console.seek(SeekFrom::End(0))?;
        self.capture_from(console, command)
    }

    fn capture_from<R: Read>(&self, mut console: R, command: &ToolCommand) -> Result<CapturedStreams> {
        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .envs(&command.env)
            .stdout(Stdio::piped());
        if let Some(dir) = &command.cwd {
            process.current_dir(dir);
        }
        info!(command = %command, tty = %self.tty_file.display(), "deploying with console capture");
        let mut child = process.spawn().map_err(|source| ToolError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("child stdout was not captured"))?;
        let reader = thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = stdout.read_to_end(&mut buffer);
            String::from_utf8_lossy(&buffer).into_owned()
        });

        // the child is reaped even when reading the console fails
        let followed = self.follow(&mut console);
        let status = child.wait()?;
        let command_output = reader
            .join()
            .map_err(|_| anyhow!("stdout reader thread panicked"))?;
        let (console_bytes, timed_out) = followed?;

        Ok(CapturedStreams {
            tty_output: decode_console(&console_bytes),
            command_output,
            exit_code: status.code().unwrap_or(-1),
            timed_out,
        })
    }

    /// Collect console bytes until the exit word shows up or the console goes
    /// quiet. Bytes are decoded only once complete, so a character split
    /// across two polls survives intact.
    fn follow<R: Read>(&self, console: &mut R) -> Result<(Vec<u8>, bool)> {
        let exit_word = self.exit_word.as_bytes();
        let mut bytes = Vec::new();
        let mut last_activity = Instant::now();
        loop {
            thread::sleep(self.poll_interval);
            let before = bytes.len();
            console.read_to_end(&mut bytes)?;
            if bytes.len() > before {
                last_activity = Instant::now();
                let from = before.saturating_sub(exit_word.len());
                if contains(&bytes[from..], exit_word) {
                    return Ok((bytes, false));
                }
            }
            if last_activity.elapsed() > self.idle_timeout {
                warn!(
                    timeout_s = self.idle_timeout.as_secs_f64(),
                    "console capture timed out"
                );
                return Ok((bytes, true));
            }
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|window| window == needle)
}

fn decode_console(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).replace('\0', "")
}
