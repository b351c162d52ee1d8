//! External toolchain adapter for fpgaforge.
//!
//! Every tool the build touches (syndrome generator, graph parser, project
//! generator, `make`) is described as a [`ToolCommand`] and executed through a
//! [`ToolRunner`]. Runs block the calling thread; failures are never retried.

pub mod command;
pub mod error;
pub mod runner;
pub mod tty;

pub use command::ToolCommand;
pub use error::ToolError;
pub use runner::{run_checked, LogDestination, ProcessRunner, ToolRunner};
pub use tty::{CapturedStreams, TtyCapture};
