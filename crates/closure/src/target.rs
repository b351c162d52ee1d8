//! Plan entries as searchable build targets.

use crate::sweep::SweepEntry;
use anyhow::Result;
use fpgaforge_explorer::{Objective, Optimizable};
use fpgaforge_pipeline::{
    extract_timing, BuildPipeline, BuiltProject, ProjectConfiguration, TimingReport, ValueUnit,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The build parameter a search varies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Knob {
    /// Clock frequency in MHz.
    Frequency { initial: u32 },
    /// Clock divide ratio at a fixed frequency.
    DivideBy { frequency: u32, initial: u32 },
}

impl Knob {
    pub fn initial(&self) -> u32 {
        match self {
            Knob::Frequency { initial } | Knob::DivideBy { initial, .. } => *initial,
        }
    }

    pub fn objective(&self, min_decrease: f64) -> Objective {
        match self {
            Knob::Frequency { .. } => Objective::MaximizeFrequency { min_decrease },
            Knob::DivideBy { .. } => Objective::MinimizeDivider,
        }
    }

    /// Clock frequency of the build for `value`.
    pub fn frequency(&self, value: u32) -> u32 {
        match self {
            Knob::Frequency { .. } => value,
            Knob::DivideBy { frequency, .. } => *frequency,
        }
    }

    pub fn apply(&self, template: &ProjectConfiguration, value: u32) -> ProjectConfiguration {
        match self {
            Knob::Frequency { .. } => template.clone().with_frequency(value),
            Knob::DivideBy { frequency, .. } => template
                .clone()
                .with_frequency(*frequency)
                .with_divide_by(value),
        }
    }

    pub fn unit(&self) -> ValueUnit {
        match self {
            Knob::Frequency { .. } => ValueUnit::Megahertz,
            Knob::DivideBy { .. } => ValueUnit::DivideRatio,
        }
    }

    /// Value the timing report suggests after building at `value`.
    pub fn suggest(&self, report: &TimingReport, value: u32) -> u32 {
        match self {
            Knob::Frequency { .. } => report.next_maximum_frequency(),
            Knob::DivideBy { .. } => report.next_minimum_clock_divide_by(value),
        }
    }
}

pub struct ClosureTarget<'a> {
    pipeline: &'a BuildPipeline,
    entry: &'a SweepEntry,
    log: PathBuf,
}

impl<'a> ClosureTarget<'a> {
    pub fn new(pipeline: &'a BuildPipeline, entry: &'a SweepEntry, log_dir: &Path) -> Self {
        Self {
            pipeline,
            entry,
            log: log_dir.join(format!("{}.txt", entry.name)),
        }
    }

    /// Build at `value` and read back its timing.
    pub fn build_and_measure(&self, value: u32) -> Result<(BuiltProject, TimingReport)> {
        let built = self.pipeline.build(&self.entry.hardware_build(value))?;
        let report = extract_timing(&built.layout, self.entry.search.frequency(value) as f64)?;
        Ok((built, report))
    }
}

impl Optimizable for ClosureTarget<'_> {
    fn name(&self) -> String {
        self.entry.name.clone()
    }

    fn objective(&self) -> Objective {
        self.entry.search.objective(self.entry.min_decrease)
    }

    fn initial_guess(&self) -> u32 {
        self.entry.search.initial()
    }

    fn log_location(&self) -> PathBuf {
        self.log.clone()
    }

    fn build_candidate(&self, value: u32) -> Result<u32> {
        let (_, report) = self.build_and_measure(value)?;
        Ok(self.entry.search.suggest(&report, value))
    }
}
