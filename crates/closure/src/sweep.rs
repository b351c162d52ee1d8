//! Sweeps: optimize a list of configurations and tabulate the results.

use crate::target::{ClosureTarget, Knob};
use anyhow::{anyhow, Context, Result};
use fpgaforge_explorer::search::{DEFAULT_MAX_ITERATIONS, DEFAULT_MIN_DECREASE};
use fpgaforge_explorer::{optimize, ConvergenceSearch, ResumePolicy};
use fpgaforge_pipeline::{
    graph_vertex_count, BuildPipeline, GraphConfiguration, HardwareBuild, PipelineError,
    PipelineOptions, ProjectConfiguration, ProjectLayout, ResultRow, ResultsTable, SmokeTest,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

fn default_graph_dir() -> PathBuf {
    PathBuf::from("tmp-graph")
}

fn default_project_dir() -> PathBuf {
    PathBuf::from("tmp-project")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("frequency_log")
}

fn default_results() -> PathBuf {
    PathBuf::from("best_frequencies.txt")
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_min_decrease() -> f64 {
    DEFAULT_MIN_DECREASE
}

/// One configuration to optimize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepEntry {
    pub name: String,
    pub graph: GraphConfiguration,
    /// Template for every candidate build; the searched knob overrides it.
    #[serde(default)]
    pub project: ProjectConfiguration,
    pub search: Knob,
    #[serde(default)]
    pub firmware: Option<String>,
    #[serde(default = "default_min_decrease")]
    pub min_decrease: f64,
}

impl SweepEntry {
    /// The build for one candidate. Projects are labelled with the entry
    /// name, so two entries never converge onto the same project directory.
    pub fn hardware_build(&self, value: u32) -> HardwareBuild {
        let mut project = self.search.apply(&self.project, value);
        project.label = self.name.clone();
        HardwareBuild {
            graph: self.graph.clone(),
            project,
            firmware: self.firmware.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPlan {
    #[serde(default = "default_graph_dir")]
    pub graph_dir: PathBuf,
    #[serde(default = "default_project_dir")]
    pub project_dir: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_results")]
    pub results: PathBuf,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default)]
    pub climb_retries: usize,
    pub entries: Vec<SweepEntry>,
}

impl SweepPlan {
    /// Load a plan; relative directories are resolved against the plan file.
    pub fn load(path: &Path) -> Result<Self> {
        let blob = fs::read_to_string(path)
            .with_context(|| format!("reading sweep plan {}", path.display()))?;
        let mut plan: SweepPlan = serde_json::from_str(&blob)
            .with_context(|| format!("parsing sweep plan {}", path.display()))?;
        if let Some(base) = path.parent() {
            plan.rebase(base);
        }
        plan.validate()?;
        Ok(plan)
    }

    fn rebase(&mut self, base: &Path) {
        for dir in [
            &mut self.graph_dir,
            &mut self.project_dir,
            &mut self.log_dir,
            &mut self.results,
        ] {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        for entry in &self.entries {
            entry.graph.validate()?;
            entry.hardware_build(entry.search.initial()).project.validate()?;
            if !(0.0..1.0).contains(&entry.min_decrease) {
                return Err(PipelineError::InvalidConfiguration(format!(
                    "{}: min_decrease {} is outside [0, 1)",
                    entry.name, entry.min_decrease
                ))
                .into());
            }
        }
        Ok(())
    }

    pub fn entry(&self, name: &str) -> Result<&SweepEntry> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| anyhow!("plan has no entry named {:?}", name))
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            graph_dir: self.graph_dir.clone(),
            project_dir: self.project_dir.clone(),
            overwrite: self.overwrite,
        }
    }

    pub fn search(&self, policy: ResumePolicy) -> ConvergenceSearch {
        ConvergenceSearch::new()
            .with_max_iterations(self.max_iterations)
            .with_climb_retries(self.climb_retries)
            .with_policy(policy)
    }

    /// Entries must not share a trial log or a project directory, otherwise
    /// concurrent runs would write the same files.
    pub fn check_conflicts(&self, pipeline: &BuildPipeline) -> Result<()> {
        let mut owners: HashMap<PathBuf, &str> = HashMap::new();
        for entry in &self.entries {
            let initial = entry.hardware_build(entry.search.initial());
            let project = pipeline.project_layout(&initial.graph, &initial.project)?.dir;
            let log = self.log_dir.join(format!("{}.txt", entry.name));
            for path in [project, log] {
                if let Some(first) = owners.insert(path.clone(), &entry.name) {
                    return Err(PipelineError::ConflictingArtifacts {
                        path,
                        first: first.to_string(),
                        second: entry.name.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SmokeSettings {
    pub tty_file: PathBuf,
    pub marker: String,
}

#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// Entries optimized concurrently.
    pub jobs: usize,
    pub policy: ResumePolicy,
    pub smoke: Option<SmokeSettings>,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            policy: ResumePolicy::Resume,
            smoke: None,
        }
    }
}

/// Optimize every entry, write the results table and return it.
pub fn run_sweep(
    plan: &SweepPlan,
    pipeline: &BuildPipeline,
    options: &SweepOptions,
) -> Result<ResultsTable> {
    plan.check_conflicts(pipeline)?;
    let search = plan.search(options.policy);

    // Entries may share a graph; build those once before fanning out.
    for entry in &plan.entries {
        pipeline.construct_graph(&entry.graph)?;
    }

    let optimized: Vec<(ResultRow, ProjectLayout)> = if options.jobs > 1 {
        info!(jobs = options.jobs, entries = plan.entries.len(), "running sweep in parallel");
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.jobs)
            .build()?;
        pool.install(|| {
            plan.entries
                .par_iter()
                .map(|entry| optimize_entry(plan, pipeline, &search, entry))
                .collect::<Result<Vec<_>>>()
        })?
    } else {
        plan.entries
            .iter()
            .map(|entry| optimize_entry(plan, pipeline, &search, entry))
            .collect::<Result<Vec<_>>>()?
    };

    // The board console is a single shared device, so deployments run one at
    // a time after every build is done.
    if let Some(smoke) = &options.smoke {
        let test = SmokeTest::new(pipeline.tools(), &smoke.tty_file);
        for (_, layout) in &optimized {
            test.deploy_and_verify(layout, &smoke.marker)?;
        }
    }

    let mut table = ResultsTable::default();
    for (row, _) in optimized {
        table.push(row);
    }
    table.write(&plan.results)?;
    info!(path = %plan.results.display(), rows = table.rows.len(), "results written");
    Ok(table)
}

fn optimize_entry(
    plan: &SweepPlan,
    pipeline: &BuildPipeline,
    search: &ConvergenceSearch,
    entry: &SweepEntry,
) -> Result<(ResultRow, ProjectLayout)> {
    let target = ClosureTarget::new(pipeline, entry, &plan.log_dir);
    let outcome = optimize(&target, search)
        .with_context(|| format!("optimizing {}", entry.name))?;
    if !outcome.converged {
        warn!(entry = %entry.name, best = outcome.best, "reporting unconverged value");
    }

    let (built, report) = target.build_and_measure(outcome.best)?;
    let row = ResultRow {
        name: entry.name.clone(),
        value: outcome.best,
        unit: entry.search.unit(),
        estimated_frequency: report.estimate_maximum_frequency(),
        vertex_num: graph_vertex_count(&built.graph_file)?,
        converged: outcome.converged,
    };
    info!(
        entry = %row.name,
        value = row.value,
        estimated = row.estimated_frequency,
        vertex_num = row.vertex_num,
        "optimized"
    );
    Ok((row, built.layout))
}
