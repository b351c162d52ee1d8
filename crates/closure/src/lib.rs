//! Timing closure sweeps over the fpgaforge build pipeline.

#[cfg(feature = "cli")]
pub mod cli;
pub mod session;
pub mod sweep;
pub mod target;

#[cfg(test)]
mod testing;

pub use session::ClosureSession;
pub use sweep::{run_sweep, SmokeSettings, SweepEntry, SweepOptions, SweepPlan};
pub use target::{ClosureTarget, Knob};
