//! Timing feedback from post-route reports.

use crate::error::PipelineError;
use crate::project::ProjectLayout;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Worst and total negative slack of one routed build.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimingReport {
    /// Worst negative slack in ns; negative means the period was not met.
    pub wns_ns: f64,
    pub tns_ns: f64,
    /// Clock frequency the project was built at, in MHz.
    pub frequency_mhz: f64,
}

impl TimingReport {
    pub fn period_ns(&self) -> f64 {
        1e3 / self.frequency_mhz
    }

    pub fn meets_timing(&self) -> bool {
        self.wns_ns >= 0.0
    }

    /// Highest whole-MHz frequency the slack suggests is achievable.
    pub fn next_maximum_frequency(&self) -> u32 {
        if self.meets_timing() {
            return self.frequency_mhz as u32;
        }
        let next = (1e3 / (self.period_ns() - self.wns_ns)).floor() as u32;
        info!(
            frequency = self.frequency_mhz,
            wns_ns = self.wns_ns,
            next,
            "clock frequency too high"
        );
        next
    }

    /// Smallest divide ratio the slack suggests is achievable.
    pub fn next_minimum_clock_divide_by(&self, clock_divide_by: u32) -> u32 {
        if self.meets_timing() {
            return clock_divide_by;
        }
        let period = self.period_ns();
        let slow_period = period * clock_divide_by as f64 - self.wns_ns;
        let next = ((slow_period / period).ceil() as u32).max(clock_divide_by + 1);
        info!(
            frequency = self.frequency_mhz,
            clock_divide_by,
            wns_ns = self.wns_ns,
            next,
            "clock divide ratio not achievable"
        );
        next
    }

    /// Frequency at which the slack would be exactly zero, in MHz.
    pub fn estimate_maximum_frequency(&self) -> f64 {
        1e3 / (self.period_ns() - self.wns_ns)
    }
}

/// Read the routed timing summary of `layout` and check that it belongs to a
/// build at `requested_mhz`.
pub fn extract_timing(layout: &ProjectLayout, requested_mhz: f64) -> Result<TimingReport> {
    let makefile = layout.makefile();
    let reported = read_clock_frequency(&makefile)?;
    if (reported - requested_mhz).abs() > f64::EPSILON {
        return Err(PipelineError::FrequencyMismatch {
            project: layout.dir.clone(),
            requested: requested_mhz,
            reported,
        }
        .into());
    }

    let path = layout.routed_timing_summary();
    let text = fs::read_to_string(&path)
        .with_context(|| format!("reading timing summary {}", path.display()))?;
    let (wns_ns, tns_ns) = parse_timing_summary(&text).ok_or_else(|| {
        PipelineError::MalformedReport {
            path: path.clone(),
            detail: "no WNS/TNS row under Design Timing Summary".into(),
        }
    })?;
    debug!(project = %layout.name, wns_ns, tns_ns, "timing summary");

    Ok(TimingReport {
        wns_ns,
        tns_ns,
        frequency_mhz: reported,
    })
}

pub fn read_clock_frequency(makefile: &Path) -> Result<f64> {
    let text = fs::read_to_string(makefile)
        .with_context(|| format!("reading {}", makefile.display()))?;
    parse_clock_frequency(&text).ok_or_else(|| {
        PipelineError::MalformedReport {
            path: makefile.to_path_buf(),
            detail: "no `CLOCK_FREQUENCY ?=` assignment".into(),
        }
        .into()
    })
}

/// WNS and TNS from the first data row of the design timing summary table.
pub fn parse_timing_summary(text: &str) -> Option<(f64, f64)> {
    let start = text.find("Design Timing Summary")?;
    let mut lines = text[start..].lines().skip_while(|line| !line.contains("WNS(ns)"));
    lines.next()?;
    // dash separator under the header
    lines.next()?;
    let mut numbers = lines.next()?.split_whitespace().map_while(|word| word.parse::<f64>().ok());
    Some((numbers.next()?, numbers.next()?))
}

pub fn parse_clock_frequency(text: &str) -> Option<f64> {
    text.lines().find_map(|line| {
        line.trim_start()
            .strip_prefix("CLOCK_FREQUENCY ?=")
            .and_then(|value| value.trim().parse::<f64>().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTED: &str = "\
------------------------------------------------------------------------------------------------
| Design Timing Summary
| ---------------------
------------------------------------------------------------------------------------------------

    WNS(ns)      TNS(ns)  TNS Failing Endpoints  TNS Total Endpoints      WHS(ns)
    -------      -------  ---------------------  -------------------      -------
     -0.556     -123.456                    412                30211        0.010


All user specified timing constraints are met.
";

    fn write_project(root: &Path, frequency: &str, report: &str) -> ProjectLayout {
        let layout = ProjectLayout::new(root, "d_5_f250_c2-0123456789ab");
        fs::create_dir_all(layout.impl_dir()).unwrap();
        fs::write(
            layout.makefile(),
            format!("NAME = x\nCLOCK_FREQUENCY ?= {}\nCLOCK_DIVIDE_BY ?= 2\n", frequency),
        )
        .unwrap();
        fs::write(layout.routed_timing_summary(), report).unwrap();
        layout
    }

    #[test]
    fn test_parse_timing_summary() {
        assert_eq!(parse_timing_summary(ROUTED), Some((-0.556, -123.456)));
        assert_eq!(parse_timing_summary("WNS(ns)\n---\n1.0 2.0"), None);
    }

    #[test]
    fn test_extract_and_derive() {
        let dir = tempfile::tempdir().unwrap();
        let layout = write_project(dir.path(), "250", ROUTED);
        let report = extract_timing(&layout, 250.0).unwrap();
        assert_eq!(report.wns_ns, -0.556);
        assert!(!report.meets_timing());
        // 1 / (4ns + 0.556ns) = 219.49 MHz
        assert_eq!(report.next_maximum_frequency(), 219);
        assert!((report.estimate_maximum_frequency() - 219.49).abs() < 0.01);
        // (8ns + 0.556ns) / 4ns = 2.139
        assert_eq!(report.next_minimum_clock_divide_by(2), 3);
    }

    #[test]
    fn test_met_timing_keeps_frequency() {
        let report = TimingReport {
            wns_ns: 0.25,
            tns_ns: 0.0,
            frequency_mhz: 180.0,
        };
        assert_eq!(report.next_maximum_frequency(), 180);
        assert_eq!(report.next_minimum_clock_divide_by(4), 4);
        assert!(report.estimate_maximum_frequency() > 180.0);
    }

    #[test]
    fn test_tiny_violation_still_increments_divider() {
        let report = TimingReport {
            wns_ns: -0.001,
            tns_ns: -0.001,
            frequency_mhz: 100.0,
        };
        assert_eq!(report.next_minimum_clock_divide_by(2), 3);
    }

    #[test]
    fn test_frequency_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let layout = write_project(dir.path(), "200", ROUTED);
        let err = extract_timing(&layout, 250.0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::FrequencyMismatch { .. })
        ));
    }

    #[test]
    fn test_malformed_report() {
        let dir = tempfile::tempdir().unwrap();
        let layout = write_project(dir.path(), "250", "no summary here");
        let err = extract_timing(&layout, 250.0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MalformedReport { .. })
        ));
    }
}
