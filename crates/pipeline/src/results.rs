//! Best-frequency results table.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

pub const RESULTS_HEADER: &str =
    "# <name> <best value> <estimated frequency/MHz> <vertex num>";

/// What the `value` column of a row measures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueUnit {
    #[default]
    Megahertz,
    DivideRatio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub name: String,
    pub value: u32,
    #[serde(default)]
    pub unit: ValueUnit,
    pub estimated_frequency: f64,
    pub vertex_num: usize,
    pub converged: bool,
}

impl fmt::Display for ResultRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.name, self.value, self.estimated_frequency, self.vertex_num
        )?;
        let mut notes = Vec::new();
        if self.unit == ValueUnit::DivideRatio {
            notes.push("divide ratio");
        }
        if !self.converged {
            notes.push("not converged");
        }
        if !notes.is_empty() {
            write!(f, " # {}", notes.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultsTable {
    pub rows: Vec<ResultRow>,
}

impl ResultsTable {
    pub fn push(&mut self, row: ResultRow) {
        self.rows.push(row);
    }

    pub fn render(&self) -> String {
        let mut out = String::from(RESULTS_HEADER);
        for row in &self.rows {
            out.push('\n');
            out.push_str(&row.to_string());
        }
        out
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.render())
            .with_context(|| format!("writing results to {}", path.display()))
    }
}

#[derive(Deserialize)]
struct GraphSummary {
    vertex_num: usize,
}

/// Vertex count of a graph description written by the graph stage.
pub fn graph_vertex_count(graph_file: &Path) -> Result<usize> {
    let blob = fs::read_to_string(graph_file)
        .with_context(|| format!("reading graph {}", graph_file.display()))?;
    let summary: GraphSummary = serde_json::from_str(&blob)
        .with_context(|| format!("parsing graph {}", graph_file.display()))?;
    Ok(summary.vertex_num)
}
