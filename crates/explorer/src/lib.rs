//! Frequency convergence search for timing closure.

pub mod error;
pub mod search;
pub mod target;
pub mod trial_log;

pub use error::ExplorerError;
pub use search::{ConvergenceSearch, Objective, ResumePolicy, SearchOutcome, SearchState};
pub use target::{optimize, Optimizable};
pub use trial_log::{TrialEvent, TrialLog, TrialOutcome, TrialRecord, TrialRun};
