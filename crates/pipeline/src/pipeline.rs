//! The staged build pipeline.
//!
//! syndromes → (transform) → graph → project → (firmware) → synthesis
//!
//! Each stage is gated by the [`ArtifactCache`], so rerunning a build after an
//! interruption only executes the stages whose outputs are missing.

use crate::cache::{ArtifactCache, CacheOutcome};
use crate::config::{GraphConfiguration, ProjectConfiguration};
use crate::error::PipelineError;
use crate::project::ProjectLayout;
use crate::stage::{Stage, StageSpec};
use crate::tools::{ToolchainPaths, FIRMWARE_MAIN_ENV};
use anyhow::Result;
use fpgaforge_toolchain::{run_checked, LogDestination, ProcessRunner, ToolCommand, ToolRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub graph_dir: PathBuf,
    pub project_dir: PathBuf,
    /// Pass `--overwrite` to the project generator.
    pub overwrite: bool,
}

impl PipelineOptions {
    pub fn new(root: &Path) -> Self {
        Self {
            graph_dir: root.join("tmp-graph"),
            project_dir: root.join("tmp-project"),
            overwrite: false,
        }
    }
}

/// Everything needed to build one hardware variant.
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareBuild {
    pub graph: GraphConfiguration,
    pub project: ProjectConfiguration,
    /// Embedded entry point to compile before synthesis, if any.
    pub firmware: Option<String>,
}

impl HardwareBuild {
    pub fn new(graph: GraphConfiguration, project: ProjectConfiguration) -> Self {
        Self {
            graph,
            project,
            firmware: None,
        }
    }

    pub fn with_firmware(mut self, entry: impl Into<String>) -> Self {
        self.firmware = Some(entry.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct BuiltProject {
    pub layout: ProjectLayout,
    pub graph_file: PathBuf,
    pub xsa: PathBuf,
    pub synthesis: CacheOutcome,
}

pub struct BuildPipeline {
    tools: ToolchainPaths,
    options: PipelineOptions,
    runner: Arc<dyn ToolRunner>,
    cache: ArtifactCache,
}

impl BuildPipeline {
    pub fn new(tools: ToolchainPaths, options: PipelineOptions, runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            tools,
            options,
            runner,
            cache: ArtifactCache::new(),
        }
    }

    pub fn with_process_runner(tools: ToolchainPaths, options: PipelineOptions) -> Self {
        Self::new(tools, options, Arc::new(ProcessRunner::new()))
    }

    pub fn tools(&self) -> &ToolchainPaths {
        &self.tools
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn runner(&self) -> &dyn ToolRunner {
        self.runner.as_ref()
    }

    pub fn syndrome_path(&self, graph: &GraphConfiguration) -> Result<PathBuf> {
        Ok(self.options.graph_dir.join(format!("{}.syndromes", graph.stem()?)))
    }

    pub fn graph_path(&self, graph: &GraphConfiguration) -> Result<PathBuf> {
        Ok(self.options.graph_dir.join(format!("{}.json", graph.stem()?)))
    }

    pub fn project_layout(
        &self,
        graph: &GraphConfiguration,
        project: &ProjectConfiguration,
    ) -> Result<ProjectLayout> {
        Ok(ProjectLayout::new(
            &self.options.project_dir,
            project.stem(graph)?,
        ))
    }

    /// Stage 1: syndrome trace, optionally with virtual vertices merged.
    pub fn generate_syndromes(&self, graph: &GraphConfiguration) -> Result<PathBuf> {
        graph.validate()?;
        let topology = transform_topology(graph)?;
        let path = self.syndrome_path(graph)?;

        self.cache.ensure(&path, |staging| {
            run_checked(
                self.runner(),
                &self.syndrome_command(graph, staging)?,
                &LogDestination::Inherit,
            )?;
            if let Some(topology) = topology {
                run_checked(
                    self.runner(),
                    &self.transform_command(graph, staging, topology),
                    &LogDestination::Inherit,
                )?;
            }
            Ok(())
        })?;
        if graph.visualize_graph {
            self.cache.ensure(&self.visualization_path(graph)?, |staging| {
                run_checked(
                    self.runner(),
                    &self.visualize_command(&path, staging),
                    &LogDestination::Inherit,
                )
            })?;
        }
        Ok(path)
    }

    /// Stage 2: graph description consumed by hardware generation.
    pub fn construct_graph(&self, graph: &GraphConfiguration) -> Result<PathBuf> {
        let path = self.graph_path(graph)?;
        self.cache.ensure(&path, |staging| {
            let syndromes = self.generate_syndromes(graph)?;
            run_checked(
                self.runner(),
                &self.parser_command(&syndromes, staging),
                &LogDestination::Inherit,
            )
        })?;
        Ok(path)
    }

    /// Stage 3: generated hardware project.
    pub fn generate_project(
        &self,
        graph: &GraphConfiguration,
        project: &ProjectConfiguration,
    ) -> Result<(ProjectLayout, PathBuf)> {
        project.validate()?;
        let graph_file = self.construct_graph(graph)?;
        let layout = self.project_layout(graph, project)?;
        self.cache.ensure_external(&layout.bus_source(), || {
            run_checked(
                self.runner(),
                &self.project_command(&layout, project, &graph_file),
                &LogDestination::Inherit,
            )
        })?;
        Ok((layout, graph_file))
    }

    /// Stage 4 (optional): embedded program linked into the packaged artifact.
    pub fn build_firmware(&self, entry: &str) -> Result<()> {
        info!(entry, dir = %self.tools.embedded_dir.display(), "building firmware");
        run_checked(
            self.runner(),
            &self.firmware_command(entry),
            &LogDestination::Inherit,
        )
    }

    /// Stage 5: synthesis, place and route. Output goes to `build.log`.
    pub fn synthesize(
        &self,
        layout: &ProjectLayout,
        project: &ProjectConfiguration,
        firmware: Option<&str>,
    ) -> Result<CacheOutcome> {
        self.cache.ensure_external(&layout.xsa(), || {
            if let Some(entry) = firmware {
                self.build_firmware(entry)?;
            }
            info!(
                project = %layout.name,
                frequency = project.clock_frequency,
                divide_by = project.clock_divide_by,
                log = %layout.build_log().display(),
                "synthesizing"
            );
            run_checked(
                self.runner(),
                &self.build_command(layout),
                &LogDestination::append(layout.build_log()),
            )
        })
    }

    /// Run every stage for `build`, skipping those already on disk.
    pub fn build(&self, build: &HardwareBuild) -> Result<BuiltProject> {
        let (layout, graph_file) = self.generate_project(&build.graph, &build.project)?;
        let synthesis = self.synthesize(&layout, &build.project, build.firmware.as_deref())?;
        Ok(BuiltProject {
            xsa: layout.xsa(),
            layout,
            graph_file,
            synthesis,
        })
    }

    /// The stages `build` would run, in order, without running anything.
    pub fn plan(&self, build: &HardwareBuild) -> Result<Vec<StageSpec>> {
        build.graph.validate()?;
        build.project.validate()?;
        let topology = transform_topology(&build.graph)?;
        let syndromes = self.syndrome_path(&build.graph)?;
        let graph_file = self.graph_path(&build.graph)?;
        let layout = self.project_layout(&build.graph, &build.project)?;

        let mut stages = vec![self.stage(
            Stage::Syndromes,
            syndromes.clone(),
            vec![],
            self.syndrome_command(&build.graph, &syndromes)?,
        )];
        if let Some(topology) = topology {
            stages.push(self.stage(
                Stage::Transform,
                syndromes.clone(),
                vec![syndromes.clone()],
                self.transform_command(&build.graph, &syndromes, topology),
            ));
        }
        if build.graph.visualize_graph {
            let visualization = self.visualization_path(&build.graph)?;
            stages.push(self.stage(
                Stage::Visualize,
                visualization.clone(),
                vec![syndromes.clone()],
                self.visualize_command(&syndromes, &visualization),
            ));
        }
        stages.push(self.stage(
            Stage::Graph,
            graph_file.clone(),
            vec![syndromes.clone()],
            self.parser_command(&syndromes, &graph_file),
        ));
        stages.push(self.stage(
            Stage::Project,
            layout.bus_source(),
            vec![graph_file.clone()],
            self.project_command(&layout, &build.project, &graph_file),
        ));
        if let Some(entry) = &build.firmware {
            // runs only as part of synthesis, so it is cached whenever the xsa is
            stages.push(StageSpec {
                stage: Stage::Firmware,
                output: self.tools.embedded_dir.clone(),
                inputs: vec![],
                command: self.firmware_command(entry),
                cached: self.cache.is_cached(&layout.xsa()),
            });
        }
        stages.push(self.stage(
            Stage::Synthesis,
            layout.xsa(),
            vec![layout.bus_source()],
            self.build_command(&layout),
        ));
        Ok(stages)
    }

    fn stage(&self, stage: Stage, output: PathBuf, inputs: Vec<PathBuf>, command: ToolCommand) -> StageSpec {
        StageSpec {
            stage,
            cached: self.cache.is_cached(&output),
            output,
            inputs,
            command,
        }
    }

    fn visualization_path(&self, graph: &GraphConfiguration) -> Result<PathBuf> {
        Ok(self
            .options
            .graph_dir
            .join(format!("{}.visualize.json", graph.stem()?)))
    }

    fn syndrome_command(&self, graph: &GraphConfiguration, output: &Path) -> Result<ToolCommand> {
        Ok(self
            .tools
            .syndrome_generator
            .clone()
            .arg(format!("[{}]", graph.d))
            .arg(format!("[{}]", graph.noisy_measurements))
            .arg(format!("[{}]", graph.p))
            .opt("--total-rounds", graph.test_syndrome_count)
            .opt("--code-type", graph.code_type)
            .opt("--noise-model", &graph.noise_model)
            .opt("--decoder", "fusion")
            .opt("--decoder-config", graph.decoder_config_json()?)
            .opt("--debug-print", "fusion-blossom-syndrome-file")
            .opt("--fusion-blossom-syndrome-export-filename", output.display())
            .opt("--parallel", 0))
    }

    fn transform_command(&self, graph: &GraphConfiguration, file: &Path, topology: &str) -> ToolCommand {
        self.tools
            .micro_blossom
            .clone()
            .arg("transform-syndromes")
            .path_arg(file)
            .path_arg(file)
            .arg(topology)
            .arg(graph.d.to_string())
    }

    fn visualize_command(&self, syndromes: &Path, output: &Path) -> ToolCommand {
        self.tools
            .visualizer
            .clone()
            .arg("visualize-syndromes")
            .path_arg(syndromes)
            .opt("--visualizer-filename", output.display())
    }

    fn parser_command(&self, syndromes: &Path, output: &Path) -> ToolCommand {
        self.tools
            .micro_blossom
            .clone()
            .arg("parser")
            .path_arg(syndromes)
            .opt("--graph-file", output.display())
    }

    fn project_command(
        &self,
        layout: &ProjectLayout,
        project: &ProjectConfiguration,
        graph_file: &Path,
    ) -> ToolCommand {
        let mut command = self
            .tools
            .project_generator
            .clone()
            .opt("--name", &layout.name)
            .opt("--path", self.options.project_dir.display())
            .opt("--clock-frequency", project.clock_frequency)
            .opt("--clock-divide-by", project.clock_divide_by)
            .opt("--graph", graph_file.display())
            .opt("--broadcast-delay", project.broadcast_delay)
            .opt("--convergecast-delay", project.convergecast_delay)
            .opt("--context-depth", project.context_depth);
        if project.dynamic_weights {
            command = command.arg("--dynamic-weights");
        }
        if !project.support_add_defect_vertex {
            command = command.arg("--no-add-defect-vertex");
        }
        if project.support_offloading {
            command = command.arg("--support-offloading");
        }
        if project.support_layer_fusion {
            command = command.arg("--support-layer-fusion");
        }
        command = command
            .arg("--inject-registers")
            .args(project.inject_registers.iter().cloned());
        if self.options.overwrite {
            command = command.arg("--overwrite");
        }
        command
    }

    fn firmware_command(&self, entry: &str) -> ToolCommand {
        self.tools
            .firmware
            .clone()
            .current_dir(&self.tools.embedded_dir)
            .env(FIRMWARE_MAIN_ENV, entry)
    }

    fn build_command(&self, layout: &ProjectLayout) -> ToolCommand {
        self.tools.build.clone().current_dir(&layout.dir)
    }
}

fn transform_topology(graph: &GraphConfiguration) -> Result<Option<&'static str>> {
    if !graph.transform_graph {
        return Ok(None);
    }
    match graph.code_type.transform_topology() {
        Some(topology) => Ok(Some(topology)),
        None => Err(PipelineError::UnsupportedTransform {
            code_type: graph.code_type.to_string(),
        }
        .into()),
    }
}
