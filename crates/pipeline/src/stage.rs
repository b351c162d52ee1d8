//! Stage specifications: what each pipeline step reads, writes and runs.

use fpgaforge_toolchain::ToolCommand;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Syndromes,
    Transform,
    Visualize,
    Graph,
    Project,
    Firmware,
    Synthesis,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Syndromes => "syndromes",
            Stage::Transform => "transform",
            Stage::Visualize => "visualize",
            Stage::Graph => "graph",
            Stage::Project => "project",
            Stage::Firmware => "firmware",
            Stage::Synthesis => "synthesis",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned step of a build.
///
/// `output` is the path whose existence marks the stage complete. It is
/// derived only from the stage inputs, so the same inputs always plan the
/// same output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub stage: Stage,
    pub output: PathBuf,
    pub inputs: Vec<PathBuf>,
    pub command: ToolCommand,
    /// Whether `output` already exists.
    pub cached: bool,
}

impl fmt::Display for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:<10} -> {}\n    {}",
            if self.cached { "cached" } else { "run" },
            self.stage.as_str(),
            self.output.display(),
            self.command
        )
    }
}
