//! Build configurations.
//!
//! A [`GraphConfiguration`] describes the decoding graph fed to hardware
//! generation; a [`ProjectConfiguration`] describes one hardware build variant.
//! Both are immutable values: deriving a variant (for example a new clock
//! frequency during a search) produces a new value.

use crate::error::PipelineError;
use crate::hash::artifact_stem;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Code topology handed to the syndrome generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodeType {
    RotatedPlanarCode,
    StandardPlanarCode,
    CodeCapacityPlanarCode,
    CodeCapacityRotatedCode,
}

impl CodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeType::RotatedPlanarCode => "rotated-planar-code",
            CodeType::StandardPlanarCode => "standard-planar-code",
            CodeType::CodeCapacityPlanarCode => "code-capacity-planar-code",
            CodeType::CodeCapacityRotatedCode => "code-capacity-rotated-code",
        }
    }

    /// Topology argument of the virtual-vertex merge, where one exists.
    pub fn transform_topology(&self) -> Option<&'static str> {
        match self {
            CodeType::RotatedPlanarCode => Some("qecp-rotated-planar-code"),
            _ => None,
        }
    }
}

impl fmt::Display for CodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of the syndrome trace and the graph derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfiguration {
    /// Human readable prefix of artifact names.
    pub label: String,
    /// Code distance.
    pub d: u32,
    /// Physical error rate.
    pub p: f64,
    pub noisy_measurements: u32,
    pub max_half_weight: u32,
    pub code_type: CodeType,
    pub noise_model: String,
    pub only_stab_z: bool,
    pub use_combined_probability: bool,
    /// Number of syndrome rounds written to the trace.
    pub test_syndrome_count: u32,
    /// Merge both sides of the virtual vertices to save hardware resources.
    pub transform_graph: bool,
    pub visualize_graph: bool,
}

impl Default for GraphConfiguration {
    fn default() -> Self {
        Self {
            label: "graph".into(),
            d: 3,
            p: 0.001,
            noisy_measurements: 0,
            max_half_weight: 1,
            code_type: CodeType::RotatedPlanarCode,
            noise_model: "stim-noise-model".into(),
            only_stab_z: true,
            use_combined_probability: true,
            test_syndrome_count: 100,
            transform_graph: true,
            visualize_graph: false,
        }
    }
}

#[derive(Serialize)]
struct DecoderConfig {
    only_stab_z: bool,
    use_combined_probability: bool,
    skip_decoding: bool,
    max_half_weight: u32,
}

impl GraphConfiguration {
    pub fn new(label: impl Into<String>, d: u32, p: f64) -> Self {
        Self {
            label: label.into(),
            d,
            p,
            ..Default::default()
        }
    }

    pub fn with_noisy_measurements(mut self, noisy_measurements: u32) -> Self {
        self.noisy_measurements = noisy_measurements;
        self
    }

    pub fn with_max_half_weight(mut self, max_half_weight: u32) -> Self {
        self.max_half_weight = max_half_weight;
        self
    }

    pub fn with_code_type(mut self, code_type: CodeType) -> Self {
        self.code_type = code_type;
        self
    }

    pub fn with_noise_model(mut self, noise_model: impl Into<String>) -> Self {
        self.noise_model = noise_model.into();
        self
    }

    pub fn with_transform(mut self, transform_graph: bool) -> Self {
        self.transform_graph = transform_graph;
        self
    }

    pub fn with_visualization(mut self, visualize_graph: bool) -> Self {
        self.visualize_graph = visualize_graph;
        self
    }

    /// Compact JSON passed as `--decoder-config`.
    pub fn decoder_config_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&DecoderConfig {
            only_stab_z: self.only_stab_z,
            use_combined_probability: self.use_combined_probability,
            skip_decoding: true,
            max_half_weight: self.max_half_weight,
        })?)
    }

    pub fn validate(&self) -> Result<()> {
        validate_label(&self.label)?;
        if self.d == 0 {
            return Err(invalid("code distance must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.p) {
            return Err(invalid(format!("error rate {} is outside [0, 1]", self.p)));
        }
        Ok(())
    }

    /// Artifact name shared by the syndrome and graph files.
    pub fn stem(&self) -> Result<String> {
        artifact_stem(&self.label, &self.artifact_key()?)
    }

    /// Fields that shape the generated artifacts. Visualization only adds a
    /// side file, so it is left out.
    fn artifact_key(&self) -> Result<serde_json::Value> {
        let mut key = serde_json::to_value(self)?;
        if let Some(fields) = key.as_object_mut() {
            fields.remove("visualize_graph");
        }
        Ok(key)
    }
}

/// One hardware build variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfiguration {
    /// Human readable prefix of the project name.
    pub label: String,
    /// Clock frequency in MHz.
    pub clock_frequency: u32,
    /// Ratio between the fast bus clock and the decoder clock.
    pub clock_divide_by: u32,
    /// Named pipeline stages that receive an extra register.
    pub inject_registers: BTreeSet<String>,
    pub broadcast_delay: u32,
    pub convergecast_delay: u32,
    pub context_depth: u32,
    /// Load edge weights at runtime instead of hard-coding them.
    pub dynamic_weights: bool,
    pub support_add_defect_vertex: bool,
    pub support_offloading: bool,
    pub support_layer_fusion: bool,
}

impl Default for ProjectConfiguration {
    fn default() -> Self {
        Self {
            label: "project".into(),
            clock_frequency: 200,
            clock_divide_by: 2,
            inject_registers: BTreeSet::new(),
            broadcast_delay: 0,
            convergecast_delay: 1,
            context_depth: 1,
            dynamic_weights: false,
            support_add_defect_vertex: true,
            support_offloading: false,
            support_layer_fusion: false,
        }
    }
}

impl ProjectConfiguration {
    pub fn new(label: impl Into<String>, clock_frequency: u32) -> Self {
        Self {
            label: label.into(),
            clock_frequency,
            ..Default::default()
        }
    }

    pub fn with_frequency(mut self, clock_frequency: u32) -> Self {
        self.clock_frequency = clock_frequency;
        self
    }

    pub fn with_divide_by(mut self, clock_divide_by: u32) -> Self {
        self.clock_divide_by = clock_divide_by;
        self
    }

    pub fn with_inject_registers<I, S>(mut self, registers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inject_registers = registers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_delays(mut self, broadcast_delay: u32, convergecast_delay: u32) -> Self {
        self.broadcast_delay = broadcast_delay;
        self.convergecast_delay = convergecast_delay;
        self
    }

    pub fn with_context_depth(mut self, context_depth: u32) -> Self {
        self.context_depth = context_depth;
        self
    }

    pub fn with_dynamic_weights(mut self, dynamic_weights: bool) -> Self {
        self.dynamic_weights = dynamic_weights;
        self
    }

    pub fn with_offloading(mut self, support_offloading: bool) -> Self {
        self.support_offloading = support_offloading;
        self
    }

    pub fn with_layer_fusion(mut self, support_layer_fusion: bool) -> Self {
        self.support_layer_fusion = support_layer_fusion;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_label(&self.label)?;
        if self.clock_frequency == 0 {
            return Err(invalid("clock frequency must be > 0"));
        }
        if self.clock_divide_by == 0 {
            return Err(invalid("clock divide ratio must be > 0"));
        }
        if self.context_depth == 0 {
            return Err(invalid("context depth must be > 0"));
        }
        for register in &self.inject_registers {
            let ok = !register.is_empty()
                && register
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
            if !ok {
                return Err(invalid(format!("invalid register injection {:?}", register)));
            }
        }
        Ok(())
    }

    /// Project name: readable parameters plus a digest over everything that
    /// affects the generated hardware, including the graph it is built from.
    pub fn stem(&self, graph: &GraphConfiguration) -> Result<String> {
        let label = format!(
            "{}_f{}_c{}",
            self.label, self.clock_frequency, self.clock_divide_by
        );
        artifact_stem(&label, &(graph.artifact_key()?, self))
    }

    /// Clock period in nanoseconds.
    pub fn period_ns(&self) -> f64 {
        1e3 / self.clock_frequency as f64
    }
}

fn validate_label(label: &str) -> Result<()> {
    let ok = !label.is_empty()
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(invalid(format!("invalid label {:?}", label)))
    }
}

fn invalid(detail: impl Into<String>) -> anyhow::Error {
    PipelineError::InvalidConfiguration(detail.into()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> GraphConfiguration {
        GraphConfiguration::new("d_5", 5, 0.001).with_noisy_measurements(4)
    }

    #[test]
    fn test_equal_configurations_share_stem() {
        let a = ProjectConfiguration::new("d_5", 200).with_inject_registers(["offload", "update"]);
        let b = ProjectConfiguration::new("d_5", 200).with_inject_registers(["update", "offload"]);
        assert_eq!(a, b);
        assert_eq!(a.stem(&graph()).unwrap(), b.stem(&graph()).unwrap());
    }

    #[test]
    fn test_every_field_changes_stem() {
        let base = ProjectConfiguration::new("d_5", 200);
        let variants = vec![
            base.clone().with_frequency(180),
            base.clone().with_divide_by(3),
            base.clone().with_inject_registers(["execute"]),
            base.clone().with_delays(1, 1),
            base.clone().with_context_depth(2),
            base.clone().with_dynamic_weights(true),
            base.clone().with_offloading(true),
            base.clone().with_layer_fusion(true),
        ];
        let base_stem = base.stem(&graph()).unwrap();
        let mut stems = std::collections::HashSet::new();
        for variant in &variants {
            let stem = variant.stem(&graph()).unwrap();
            assert_ne!(stem, base_stem, "{:?}", variant);
            stems.insert(stem);
        }
        assert_eq!(stems.len(), variants.len());

        let other_graph = graph().with_max_half_weight(7);
        assert_ne!(base.stem(&other_graph).unwrap(), base_stem);
    }

    #[test]
    fn test_graph_stem_tracks_parameters() {
        assert_eq!(graph().stem().unwrap(), graph().stem().unwrap());
        assert_ne!(
            graph().stem().unwrap(),
            GraphConfiguration::new("d_5", 5, 0.002)
                .with_noisy_measurements(4)
                .stem()
                .unwrap()
        );
    }

    #[test]
    fn test_visualization_does_not_change_stems() {
        let project = ProjectConfiguration::new("d_5", 200);
        let visualized = graph().with_visualization(true);
        assert_eq!(visualized.stem().unwrap(), graph().stem().unwrap());
        assert_eq!(
            project.stem(&visualized).unwrap(),
            project.stem(&graph()).unwrap()
        );
        assert_ne!(graph().with_transform(false).stem().unwrap(), graph().stem().unwrap());
    }

    #[test]
    fn test_decoder_config_json() {
        let json = graph().with_max_half_weight(7).decoder_config_json().unwrap();
        assert_eq!(
            json,
            r#"{"only_stab_z":true,"use_combined_probability":true,"skip_decoding":true,"max_half_weight":7}"#
        );
    }

    #[test]
    fn test_invalid_configurations() {
        assert!(ProjectConfiguration::new("d 5", 200).validate().is_err());
        assert!(ProjectConfiguration::new("d_5", 0).validate().is_err());
        assert!(ProjectConfiguration::new("d_5", 200)
            .with_inject_registers(["Offload!"])
            .validate()
            .is_err());
        assert!(GraphConfiguration::new("d_5", 0, 0.001).validate().is_err());
        assert!(ProjectConfiguration::new("d_5", 200).validate().is_ok());
    }

    #[test]
    fn test_plan_json_uses_defaults() {
        let project: ProjectConfiguration =
            serde_json::from_str(r#"{"label":"d_3","inject_registers":["execute"]}"#).unwrap();
        assert_eq!(project.clock_divide_by, 2);
        assert!(project.inject_registers.contains("execute"));

        let graph: GraphConfiguration =
            serde_json::from_str(r#"{"label":"d_3","d":3,"code_type":"standard-planar-code"}"#)
                .unwrap();
        assert_eq!(graph.code_type, CodeType::StandardPlanarCode);
        assert_eq!(graph.noise_model, "stim-noise-model");
    }
}
