//! On-disk layout of a generated hardware project.

use std::path::{Path, PathBuf};

/// Paths inside one generated project directory. Every name is derived from
/// the project stem, which is itself a pure function of the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    pub name: String,
    pub dir: PathBuf,
}

impl ProjectLayout {
    pub fn new(parent: &Path, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            dir: parent.join(&name),
            name,
        }
    }

    /// Open an existing project directory; the name is its last component.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let name = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { name, dir }
    }

    pub fn verilog_dir(&self) -> PathBuf {
        self.dir.join(format!("{}_verilog", self.name))
    }

    /// Written last by the project generator; marks generation complete.
    pub fn bus_source(&self) -> PathBuf {
        self.verilog_dir().join("MicroBlossomBus.v")
    }

    pub fn makefile(&self) -> PathBuf {
        self.dir.join("Makefile")
    }

    /// Packaged synthesis product.
    pub fn xsa(&self) -> PathBuf {
        self.dir.join(format!("{}.xsa", self.name))
    }

    pub fn build_log(&self) -> PathBuf {
        self.dir.join("build.log")
    }

    pub fn deploy_log(&self) -> PathBuf {
        self.dir.join("make.log")
    }

    pub fn impl_dir(&self) -> PathBuf {
        self.dir
            .join(format!("{}_vivado", self.name))
            .join(format!("{}.runs", self.name))
            .join("impl_1")
    }

    pub fn routed_timing_summary(&self) -> PathBuf {
        self.impl_dir()
            .join(format!("{}_wrapper_timing_summary_routed.rpt", self.name))
    }
}
