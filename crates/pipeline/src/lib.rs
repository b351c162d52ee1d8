//! Staged hardware build pipeline with existence-based artifact caching.

pub mod cache;
pub mod config;
pub mod error;
pub mod hash;
pub mod pipeline;
pub mod project;
pub mod results;
pub mod smoke;
pub mod stage;
pub mod timing;
pub mod tools;

pub use cache::{ArtifactCache, CacheOutcome, CacheStats};
pub use config::{CodeType, GraphConfiguration, ProjectConfiguration};
pub use error::PipelineError;
pub use pipeline::{BuildPipeline, BuiltProject, HardwareBuild, PipelineOptions};
pub use project::ProjectLayout;
pub use results::{graph_vertex_count, ResultRow, ResultsTable, ValueUnit};
pub use smoke::{SmokeTest, SmokeTestResult};
pub use stage::{Stage, StageSpec};
pub use timing::{extract_timing, TimingReport};
pub use tools::ToolchainPaths;
