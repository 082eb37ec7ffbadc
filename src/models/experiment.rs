use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Paused,
    Completed,
}

/// Opaque per-variant payload consumed by the page (copy, layout flags...).
pub type VariantConfig = Map<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: String,
    pub name: String,
    /// Share of participating traffic, in percent. Siblings sum to 100.
    pub traffic_weight: f64,
    #[serde(default)]
    pub is_control: bool,
    #[serde(default)]
    pub config: VariantConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub status: ExperimentStatus,
    /// Percent of all sessions eligible for the experiment (0-100).
    pub traffic_allocation: f64,
    pub variants: Vec<Variant>,
    pub target_metric: String,
    pub minimum_sample_size: u64,
    /// e.g. 0.95 for a 95% confidence requirement.
    pub confidence_level: f64,
}

impl Experiment {
    pub fn is_running(&self) -> bool {
        self.status == ExperimentStatus::Running
    }

    pub fn control(&self) -> Option<&Variant> {
        self.variants.iter().find(|v| v.is_control)
    }

    pub fn variant(&self, variant_id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }
}
