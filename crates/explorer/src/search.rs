//! Fixed-point search over an integer build parameter.
//!
//! Each evaluation builds a candidate and reports the value the toolchain
//! believes is achievable. The search walks toward a candidate that reports
//! itself, tightening by at least a minimum step whenever a build misses so
//! the sequence of attempts is strictly monotone.

use crate::error::ExplorerError;
use crate::trial_log::{TrialEvent, TrialLog, TrialOutcome, TrialRun};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

pub const DEFAULT_MIN_DECREASE: f64 = 0.05;
pub const DEFAULT_MAX_ITERATIONS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Objective {
    /// Highest clock frequency in MHz. A miss lowers the next candidate by at
    /// least `min_decrease` of the current one.
    MaximizeFrequency { min_decrease: f64 },
    /// Smallest clock divide ratio. A miss raises the next candidate by at
    /// least one.
    MinimizeDivider,
}

impl Objective {
    pub fn maximize_frequency() -> Self {
        Objective::MaximizeFrequency {
            min_decrease: DEFAULT_MIN_DECREASE,
        }
    }

    /// Whether `result` reports `candidate` as achievable.
    pub fn meets(&self, candidate: u32, result: u32) -> bool {
        match self {
            Objective::MaximizeFrequency { .. } => result >= candidate,
            Objective::MinimizeDivider => result <= candidate,
        }
    }

    pub fn better(&self, a: u32, b: u32) -> u32 {
        match self {
            Objective::MaximizeFrequency { .. } => a.max(b),
            Objective::MinimizeDivider => a.min(b),
        }
    }

    /// Next candidate after `candidate` missed with `result`.
    pub fn tighten(&self, candidate: u32, result: u32) -> u32 {
        match self {
            Objective::MaximizeFrequency { min_decrease } => {
                let stepped = (candidate as f64 * (1.0 - min_decrease)).floor() as u32;
                result.min(stepped).max(1)
            }
            Objective::MinimizeDivider => result.max(candidate.saturating_add(1)),
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Objective::MaximizeFrequency { min_decrease } => {
                write!(f, "maximize frequency (min decrease {})", min_decrease)
            }
            Objective::MinimizeDivider => f.write_str("minimize divider"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// Continue the latest matching run found in the trial log.
    #[default]
    Resume,
    /// Ignore history and start again from the initial guess.
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SearchOutcome {
    pub best: u32,
    pub converged: bool,
    /// Evaluations performed by this call; resumed work is not counted.
    pub evaluations: usize,
    /// Trials in the run, including those replayed from the log.
    pub iterations: usize,
}

/// Search progress. Replaying a log and running live both advance it through
/// [`SearchState::observe`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchState {
    objective: Objective,
    pub candidate: u32,
    pub iteration: usize,
    best_passing: Option<u32>,
    last_suggestion: Option<u32>,
    climbs_left: usize,
    climbing: bool,
    converged: Option<u32>,
}

impl SearchState {
    pub fn new(objective: Objective, initial: u32, climb_retries: usize) -> Self {
        Self {
            objective,
            candidate: initial,
            iteration: 0,
            best_passing: None,
            last_suggestion: None,
            climbs_left: climb_retries,
            climbing: false,
            converged: None,
        }
    }

    pub fn converged(&self) -> Option<u32> {
        self.converged
    }

    /// Record that `candidate` evaluated to `result`. Returns the final value
    /// once the search has converged.
    pub fn observe(&mut self, candidate: u32, result: u32) -> Option<u32> {
        self.iteration += 1;
        if self.objective.meets(candidate, result) {
            self.best_passing = Some(match self.best_passing {
                Some(best) => self.objective.better(best, candidate),
                None => candidate,
            });
            if self.climbs_left > 0 && result != candidate {
                self.climbs_left -= 1;
                self.climbing = true;
                self.candidate = result;
                return None;
            }
            self.converged = Some(candidate);
            return self.converged;
        }
        if let (true, Some(best)) = (self.climbing, self.best_passing) {
            // a climb past a passing candidate missed
            self.converged = Some(best);
            return self.converged;
        }
        self.last_suggestion = Some(result);
        self.candidate = self.objective.tighten(candidate, result);
        None
    }

    /// Best passing value, else the last suggestion, else the candidate.
    pub fn fallback(&self) -> u32 {
        self.best_passing
            .or(self.last_suggestion)
            .unwrap_or(self.candidate)
    }
}

#[derive(Debug, Clone)]
pub struct ConvergenceSearch {
    pub max_iterations: usize,
    /// How many times a candidate that reports headroom is retried at the
    /// reported value.
    pub climb_retries: usize,
    pub policy: ResumePolicy,
}

impl Default for ConvergenceSearch {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            climb_retries: 0,
            policy: ResumePolicy::Resume,
        }
    }
}

enum Replay {
    Fresh,
    InProgress(SearchState, usize),
    Finished(SearchOutcome),
}

impl ConvergenceSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_climb_retries(mut self, climb_retries: usize) -> Self {
        self.climb_retries = climb_retries;
        self
    }

    pub fn with_policy(mut self, policy: ResumePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Search from `initial`, recording every trial in `log` before acting on
    /// it. An evaluation error is logged as a failed trial and returned.
    pub fn run<F>(
        &self,
        objective: Objective,
        initial: u32,
        log: &TrialLog,
        mut evaluate: F,
    ) -> Result<SearchOutcome>
    where
        F: FnMut(u32) -> Result<u32>,
    {
        if initial == 0 {
            return Err(ExplorerError::InvalidInitialGuess(initial).into());
        }

        let replay = match self.policy {
            ResumePolicy::Resume => self.replay(objective, initial, log)?,
            ResumePolicy::Restart => Replay::Fresh,
        };
        let mut state = match replay {
            Replay::Finished(outcome) => {
                info!(
                    log = %log.path().display(),
                    best = outcome.best,
                    converged = outcome.converged,
                    "search already finished"
                );
                return Ok(outcome);
            }
            Replay::InProgress(state, trials) => {
                info!(
                    log = %log.path().display(),
                    trials,
                    candidate = state.candidate,
                    "resuming search"
                );
                state
            }
            Replay::Fresh => {
                log.append(&TrialEvent::Started { objective, initial })?;
                SearchState::new(objective, initial, self.climb_retries)
            }
        };

        let mut evaluations = 0;
        loop {
            if let Some(value) = state.converged() {
                log.append(&TrialEvent::Converged { value })?;
                info!(%objective, value, iterations = state.iteration, "search converged");
                return Ok(SearchOutcome {
                    best: value,
                    converged: true,
                    evaluations,
                    iterations: state.iteration,
                });
            }
            if state.iteration >= self.max_iterations {
                let best = state.fallback();
                log.append(&TrialEvent::Exhausted { best })?;
                warn!(
                    %objective,
                    best,
                    iterations = state.iteration,
                    "search did not converge"
                );
                return Ok(SearchOutcome {
                    best,
                    converged: false,
                    evaluations,
                    iterations: state.iteration,
                });
            }

            let candidate = state.candidate;
            let iteration = state.iteration;
            debug!(iteration, candidate, "evaluating candidate");
            let result = match evaluate(candidate) {
                Ok(result) => result,
                Err(err) => {
                    log.append(&TrialEvent::Trial {
                        iteration,
                        candidate,
                        outcome: TrialOutcome::Failed(format!("{:#}", err)),
                    })?;
                    return Err(err);
                }
            };
            evaluations += 1;
            log.append(&TrialEvent::Trial {
                iteration,
                candidate,
                outcome: TrialOutcome::Achievable(result),
            })?;
            info!(iteration, candidate, result, "trial finished");
            state.observe(candidate, result);
        }
    }

    fn replay(&self, objective: Objective, initial: u32, log: &TrialLog) -> Result<Replay> {
        let runs = log.runs()?;
        let Some(run) = runs
            .iter()
            .rev()
            .find(|run| run.objective == objective && run.initial == initial)
        else {
            return Ok(Replay::Fresh);
        };

        if let Some((best, converged)) = run.finished() {
            return Ok(Replay::Finished(SearchOutcome {
                best,
                converged,
                evaluations: 0,
                iterations: run.evaluations(),
            }));
        }
        let state = self.replay_run(run, log)?;
        Ok(Replay::InProgress(state, run.evaluations()))
    }

    fn replay_run(&self, run: &TrialRun, log: &TrialLog) -> Result<SearchState> {
        let mut state = SearchState::new(run.objective, run.initial, self.climb_retries);
        for record in &run.records {
            let inconsistent = |detail: String| ExplorerError::InconsistentLog {
                path: log.path().to_path_buf(),
                line: record.line,
                detail,
            };
            let TrialEvent::Trial {
                iteration,
                candidate,
                outcome,
            } = &record.event
            else {
                continue;
            };
            if let Some(value) = state.converged() {
                return Err(inconsistent(format!("trial after convergence at {}", value)).into());
            }
            if *candidate != state.candidate || *iteration != state.iteration {
                return Err(inconsistent(format!(
                    "trial {} at {} but the search was at trial {} with candidate {}",
                    iteration, candidate, state.iteration, state.candidate
                ))
                .into());
            }
            if let TrialOutcome::Achievable(result) = outcome {
                state.observe(*candidate, *result);
            }
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::cell::{Cell, RefCell};
    use std::fs::OpenOptions;
    use std::io::Write;

    /// Synthetic timing closure: anything up to `limit` passes, anything above
    /// reports `limit - penalty`.
    fn closure(limit: u32, penalty: u32) -> impl Fn(u32) -> u32 {
        move |candidate| {
            if candidate <= limit {
                candidate
            } else {
                limit - penalty
            }
        }
    }

    /// Shrinks by a quarter per miss, so a search from 400 needs six builds.
    fn geometric(candidate: u32) -> u32 {
        if candidate <= 100 {
            candidate
        } else {
            candidate * 3 / 4
        }
    }

    fn counted<'a, F: Fn(u32) -> u32 + 'a>(
        f: F,
        calls: &'a RefCell<Vec<u32>>,
    ) -> impl FnMut(u32) -> Result<u32> + 'a {
        move |candidate| {
            calls.borrow_mut().push(candidate);
            Ok(f(candidate))
        }
    }

    #[test]
    fn test_converges_in_two_evaluations() {
        let dir = tempfile::tempdir().unwrap();
        let log = TrialLog::new(dir.path().join("d_5.txt"));
        let calls = RefCell::new(Vec::new());
        let eval = |_: u32| 180;

        let outcome = ConvergenceSearch::new()
            .run(Objective::maximize_frequency(), 250, &log, counted(eval, &calls))
            .unwrap();

        assert_eq!(outcome.best, 180);
        assert!(outcome.converged);
        assert_eq!(outcome.evaluations, 2);
        assert_eq!(*calls.borrow(), vec![250, 180]);
    }

    #[test]
    fn test_small_suggestion_still_steps_down() {
        let mut state = SearchState::new(Objective::maximize_frequency(), 200, 0);
        state.observe(200, 199);
        assert_eq!(state.candidate, 190);
    }

    #[test]
    fn test_terminates_and_reaches_fixed_point() {
        for limit in [37, 120, 181, 333] {
            let dir = tempfile::tempdir().unwrap();
            let log = TrialLog::new(dir.path().join("log.txt"));
            let eval = closure(limit, 3);
            let calls = RefCell::new(Vec::new());
            let outcome = ConvergenceSearch::new()
                .with_max_iterations(50)
                .run(Objective::maximize_frequency(), 400, &log, counted(&eval, &calls))
                .unwrap();
            assert!(outcome.converged, "limit {}", limit);
            assert_eq!(eval(outcome.best), outcome.best);
            let calls = calls.borrow();
            assert!(calls.windows(2).all(|w| w[1] <= w[0]));
        }
    }

    #[test]
    fn test_divider_search() {
        let dir = tempfile::tempdir().unwrap();
        let log = TrialLog::new(dir.path().join("log.txt"));
        // ratios below 4 miss timing and suggest one more
        let eval = |c: u32| if c >= 4 { c } else { c + 1 };
        let calls = RefCell::new(Vec::new());
        let outcome = ConvergenceSearch::new()
            .run(Objective::MinimizeDivider, 2, &log, counted(eval, &calls))
            .unwrap();
        assert_eq!(outcome.best, 4);
        assert_eq!(*calls.borrow(), vec![2, 3, 4]);
    }

    #[test]
    fn test_exhaustion_reports_last_suggestion() {
        let dir = tempfile::tempdir().unwrap();
        let log = TrialLog::new(dir.path().join("log.txt"));
        let calls = RefCell::new(Vec::new());
        let outcome = ConvergenceSearch::new()
            .with_max_iterations(3)
            .run(
                Objective::maximize_frequency(),
                300,
                &log,
                counted(|c: u32| c / 2, &calls),
            )
            .unwrap();
        assert!(!outcome.converged);
        assert_eq!(outcome.evaluations, 3);
        assert_eq!(*calls.borrow(), vec![300, 150, 75]);
        assert_eq!(outcome.best, 37);
        assert_eq!(
            log.runs().unwrap()[0].finished(),
            Some((37, false))
        );
    }

    #[test]
    fn test_resume_skips_logged_trials() {
        let dir = tempfile::tempdir().unwrap();
        let log = TrialLog::new(dir.path().join("log.txt"));
        let search = ConvergenceSearch::new().with_max_iterations(10);

        // interrupted during the third build
        let calls = Cell::new(0);
        let interrupted = search.run(Objective::maximize_frequency(), 400, &log, |c| {
            calls.set(calls.get() + 1);
            if calls.get() > 2 {
                bail!("machine rebooted");
            }
            Ok(geometric(c))
        });
        assert!(interrupted.is_err());

        let resumed_calls = RefCell::new(Vec::new());
        let resumed = search
            .run(Objective::maximize_frequency(), 400, &log, counted(geometric, &resumed_calls))
            .unwrap();

        let fresh_dir = tempfile::tempdir().unwrap();
        let fresh_log = TrialLog::new(fresh_dir.path().join("log.txt"));
        let fresh_calls = RefCell::new(Vec::new());
        let fresh = search
            .run(Objective::maximize_frequency(), 400, &fresh_log, counted(geometric, &fresh_calls))
            .unwrap();

        assert_eq!(fresh.evaluations, 6);
        assert_eq!(fresh.best, 94);

        assert_eq!(resumed.best, fresh.best);
        assert_eq!(resumed.iterations, fresh.iterations);
        assert_eq!(resumed.evaluations, fresh.evaluations - 2);
        assert_eq!(resumed_calls.borrow()[..], fresh_calls.borrow()[2..]);
    }

    #[test]
    fn test_resume_survives_torn_record() {
        let dir = tempfile::tempdir().unwrap();
        let log = TrialLog::new(dir.path().join("log.txt"));
        let search = ConvergenceSearch::new().with_max_iterations(10);
        let crash_after = |builds: usize| {
            let calls = Cell::new(0);
            move |c: u32| {
                calls.set(calls.get() + 1);
                if calls.get() > builds {
                    bail!("machine rebooted");
                }
                Ok(geometric(c))
            }
        };

        assert!(search
            .run(Objective::maximize_frequency(), 400, &log, crash_after(1))
            .is_err());
        // killed halfway through writing a record
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        write!(file, "[2024-01-01 00:00:00] {{\"event\":\"tri").unwrap();
        drop(file);
        assert!(search
            .run(Objective::maximize_frequency(), 400, &log, crash_after(2))
            .is_err());

        let resumed = search
            .run(Objective::maximize_frequency(), 400, &log, crash_after(10))
            .unwrap();
        assert!(resumed.converged);
        assert_eq!(resumed.best, 94);
        assert_eq!(resumed.evaluations, 3);
    }

    #[test]
    fn test_finished_search_returns_logged_value() {
        let dir = tempfile::tempdir().unwrap();
        let log = TrialLog::new(dir.path().join("log.txt"));
        let eval = closure(181, 3);
        let first = ConvergenceSearch::new()
            .run(Objective::maximize_frequency(), 250, &log, |c| Ok(eval(c)))
            .unwrap();

        let again = ConvergenceSearch::new()
            .run(Objective::maximize_frequency(), 250, &log, |_| bail!("must not build"))
            .unwrap();
        assert_eq!(again.best, first.best);
        assert_eq!(again.evaluations, 0);
    }

    #[test]
    fn test_restart_ignores_history() {
        let dir = tempfile::tempdir().unwrap();
        let log = TrialLog::new(dir.path().join("log.txt"));
        let eval = closure(181, 3);
        ConvergenceSearch::new()
            .run(Objective::maximize_frequency(), 250, &log, |c| Ok(eval(c)))
            .unwrap();

        let calls = RefCell::new(Vec::new());
        let restarted = ConvergenceSearch::new()
            .with_policy(ResumePolicy::Restart)
            .run(Objective::maximize_frequency(), 250, &log, counted(&eval, &calls))
            .unwrap();
        assert_eq!(calls.borrow()[0], 250);
        assert!(restarted.evaluations > 0);
        assert_eq!(log.runs().unwrap().len(), 2);
    }

    #[test]
    fn test_different_initial_guess_starts_new_run() {
        let dir = tempfile::tempdir().unwrap();
        let log = TrialLog::new(dir.path().join("log.txt"));
        let eval = closure(181, 3);
        ConvergenceSearch::new()
            .run(Objective::maximize_frequency(), 250, &log, |c| Ok(eval(c)))
            .unwrap();
        let calls = RefCell::new(Vec::new());
        ConvergenceSearch::new()
            .run(Objective::maximize_frequency(), 300, &log, counted(&eval, &calls))
            .unwrap();
        assert_eq!(calls.borrow()[0], 300);
    }

    #[test]
    fn test_climb_retries_at_reported_value() {
        let dir = tempfile::tempdir().unwrap();
        let log = TrialLog::new(dir.path().join("log.txt"));
        // 150 reports headroom up to 170, but 170 itself misses
        let eval = |c: u32| if c <= 150 { 170 } else { 160 };
        let calls = RefCell::new(Vec::new());
        let outcome = ConvergenceSearch::new()
            .with_climb_retries(1)
            .run(Objective::maximize_frequency(), 150, &log, counted(eval, &calls))
            .unwrap();
        assert_eq!(*calls.borrow(), vec![150, 170]);
        assert_eq!(outcome.best, 150);
        assert!(outcome.converged);
    }

    #[test]
    fn test_failed_evaluation_is_logged_and_retried() {
        let dir = tempfile::tempdir().unwrap();
        let log = TrialLog::new(dir.path().join("log.txt"));
        let err = ConvergenceSearch::new()
            .run(Objective::maximize_frequency(), 200, &log, |_| bail!("vivado crashed"))
            .unwrap_err();
        assert!(err.to_string().contains("vivado crashed"));
        let records = &log.runs().unwrap()[0].records;
        assert!(matches!(
            &records[0].event,
            TrialEvent::Trial { outcome: TrialOutcome::Failed(reason), .. } if reason.contains("vivado")
        ));

        let calls = RefCell::new(Vec::new());
        ConvergenceSearch::new()
            .run(Objective::maximize_frequency(), 200, &log, counted(|c: u32| c, &calls))
            .unwrap();
        assert_eq!(*calls.borrow(), vec![200]);
    }

    #[test]
    fn test_inconsistent_log_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let log = TrialLog::new(dir.path().join("log.txt"));
        log.append(&TrialEvent::Started {
            objective: Objective::maximize_frequency(),
            initial: 250,
        })
        .unwrap();
        log.append(&TrialEvent::Trial {
            iteration: 0,
            candidate: 190,
            outcome: TrialOutcome::Achievable(180),
        })
        .unwrap();

        let err = ConvergenceSearch::new()
            .run(Objective::maximize_frequency(), 250, &log, |c| Ok(c))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExplorerError>(),
            Some(ExplorerError::InconsistentLog { line: 2, .. })
        ));
    }

    #[test]
    fn test_zero_initial_guess() {
        let dir = tempfile::tempdir().unwrap();
        let log = TrialLog::new(dir.path().join("log.txt"));
        assert!(ConvergenceSearch::new()
            .run(Objective::MinimizeDivider, 0, &log, |c| Ok(c))
            .is_err());
    }
}
