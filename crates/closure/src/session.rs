//! A loaded plan bound to a build pipeline.

use crate::sweep::{run_sweep, SweepOptions, SweepPlan};
use crate::target::ClosureTarget;
use anyhow::Result;
use fpgaforge_pipeline::{BuildPipeline, BuiltProject, ResultsTable, StageSpec, ToolchainPaths};
use fpgaforge_toolchain::ToolRunner;
use std::sync::Arc;
use tracing::info;

pub struct ClosureSession {
    plan: SweepPlan,
    pipeline: BuildPipeline,
}

impl ClosureSession {
    pub fn new(plan: SweepPlan, tools: ToolchainPaths) -> Self {
        let pipeline = BuildPipeline::with_process_runner(tools, plan.pipeline_options());
        Self { plan, pipeline }
    }

    pub fn with_runner(plan: SweepPlan, tools: ToolchainPaths, runner: Arc<dyn ToolRunner>) -> Self {
        let pipeline = BuildPipeline::new(tools, plan.pipeline_options(), runner);
        Self { plan, pipeline }
    }

    pub fn plan(&self) -> &SweepPlan {
        &self.plan
    }

    pub fn pipeline(&self) -> &BuildPipeline {
        &self.pipeline
    }

    pub fn target(&self, name: &str) -> Result<ClosureTarget<'_>> {
        Ok(ClosureTarget::new(
            &self.pipeline,
            self.plan.entry(name)?,
            &self.plan.log_dir,
        ))
    }

    /// Build one entry at a fixed knob value.
    pub fn build(&self, name: &str, value: u32) -> Result<BuiltProject> {
        let entry = self.plan.entry(name)?;
        let built = self.pipeline.build(&entry.hardware_build(value))?;
        info!(entry = name, value, xsa = %built.xsa.display(), "build finished");
        Ok(built)
    }

    pub fn stages(&self, name: &str, value: u32) -> Result<Vec<StageSpec>> {
        let entry = self.plan.entry(name)?;
        self.pipeline.plan(&entry.hardware_build(value))
    }

    pub fn sweep(&self, options: &SweepOptions) -> Result<ResultsTable> {
        let table = run_sweep(&self.plan, &self.pipeline, options)?;
        let stats = self.pipeline.cache().stats();
        info!(hits = stats.hits, misses = stats.misses, "sweep finished");
        Ok(table)
    }
}
