//! Anything whose build parameter can be searched.

use crate::search::{ConvergenceSearch, Objective, SearchOutcome};
use crate::trial_log::TrialLog;
use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

pub trait Optimizable {
    /// Short human readable name, used in logs and results tables.
    fn name(&self) -> String;

    fn objective(&self) -> Objective;

    fn initial_guess(&self) -> u32;

    /// Trial log for this target. Must not be shared with another target.
    fn log_location(&self) -> PathBuf;

    /// Build at `value` and return the value the build reports achievable.
    fn build_candidate(&self, value: u32) -> Result<u32>;
}

pub fn optimize(target: &dyn Optimizable, search: &ConvergenceSearch) -> Result<SearchOutcome> {
    let log = TrialLog::new(target.log_location());
    let name = target.name();
    info!(
        %name,
        objective = %target.objective(),
        initial = target.initial_guess(),
        "optimizing"
    );
    search.run(target.objective(), target.initial_guess(), &log, |value| {
        target.build_candidate(value)
    })
}
