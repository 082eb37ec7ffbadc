use std::collections::{HashMap, HashSet};

use anyhow::{bail, ensure, Context, Result};
use serde_json::json;

use crate::models::{properties, Experiment, ExperimentStatus, Variant};

const WEIGHT_TOLERANCE: f64 = 0.01;

/// Immutable catalog of experiment definitions, validated on construction.
#[derive(Debug, Clone)]
pub struct ExperimentRegistry {
    experiments: Vec<Experiment>,
    index: HashMap<String, usize>,
}

impl ExperimentRegistry {
    pub fn new(experiments: Vec<Experiment>) -> Result<Self> {
        let mut index = HashMap::with_capacity(experiments.len());
        for (position, experiment) in experiments.iter().enumerate() {
            validate(experiment)
                .with_context(|| format!("invalid experiment '{}'", experiment.id))?;
            if index.insert(experiment.id.clone(), position).is_some() {
                bail!("duplicate experiment id '{}'", experiment.id);
            }
        }

        Ok(Self { experiments, index })
    }

    /// Parse a JSON array of experiments and validate it.
    pub fn from_json(raw: &str) -> Result<Self> {
        let experiments: Vec<Experiment> =
            serde_json::from_str(raw).context("failed to parse experiment catalog")?;
        Self::new(experiments)
    }

    /// Experiments shipped with the landing page.
    pub fn builtin() -> Result<Self> {
        Self::new(builtin_experiments())
    }

    pub fn get(&self, experiment_id: &str) -> Option<&Experiment> {
        self.index.get(experiment_id).map(|&i| &self.experiments[i])
    }

    pub fn running(&self) -> impl Iterator<Item = &Experiment> {
        self.experiments.iter().filter(|e| e.is_running())
    }

    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }
}

fn validate(experiment: &Experiment) -> Result<()> {
    ensure!(!experiment.variants.is_empty(), "no variants defined");
    ensure!(
        (0.0..=100.0).contains(&experiment.traffic_allocation),
        "traffic allocation {} outside 0-100",
        experiment.traffic_allocation
    );
    ensure!(
        experiment.confidence_level > 0.0 && experiment.confidence_level < 1.0,
        "confidence level {} outside (0, 1)",
        experiment.confidence_level
    );

    let mut seen = HashSet::new();
    for variant in &experiment.variants {
        ensure!(seen.insert(variant.id.as_str()), "duplicate variant id '{}'", variant.id);
        ensure!(
            variant.traffic_weight >= 0.0,
            "variant '{}' has negative weight {}",
            variant.id,
            variant.traffic_weight
        );
    }

    let total: f64 = experiment.variants.iter().map(|v| v.traffic_weight).sum();
    ensure!(
        (total - 100.0).abs() <= WEIGHT_TOLERANCE,
        "variant weights sum to {total}, expected 100"
    );

    let controls = experiment.variants.iter().filter(|v| v.is_control).count();
    ensure!(controls == 1, "expected exactly one control variant, found {controls}");

    Ok(())
}

fn variant(id: &str, name: &str, weight: f64, is_control: bool, config: serde_json::Value) -> Variant {
    Variant {
        id: id.into(),
        name: name.into(),
        traffic_weight: weight,
        is_control,
        config: properties(config),
    }
}

fn builtin_experiments() -> Vec<Experiment> {
    vec![
        Experiment {
            id: "hero_layout".into(),
            name: "Hero section layout".into(),
            status: ExperimentStatus::Running,
            traffic_allocation: 100.0,
            variants: vec![
                variant("control", "Centered hero", 50.0, true, json!({ "layout": "centered" })),
                variant(
                    "split_screen",
                    "Split screen hero",
                    50.0,
                    false,
                    json!({ "layout": "split", "showProductShot": true }),
                ),
            ],
            target_metric: "cta_click".into(),
            minimum_sample_size: 1_000,
            confidence_level: 0.95,
        },
        Experiment {
            id: "cta_copy".into(),
            name: "Primary CTA copy".into(),
            status: ExperimentStatus::Running,
            traffic_allocation: 80.0,
            variants: vec![
                variant("control", "Get started", 34.0, true, json!({ "text": "Get started" })),
                variant(
                    "urgency",
                    "Start free today",
                    33.0,
                    false,
                    json!({ "text": "Start your free trial today" }),
                ),
                variant(
                    "benefit",
                    "Close more deals",
                    33.0,
                    false,
                    json!({ "text": "Close more deals" }),
                ),
            ],
            target_metric: "conversion".into(),
            minimum_sample_size: 2_000,
            confidence_level: 0.95,
        },
        Experiment {
            id: "pricing_display".into(),
            name: "Pricing table billing period".into(),
            status: ExperimentStatus::Paused,
            traffic_allocation: 50.0,
            variants: vec![
                variant("control", "Monthly first", 50.0, true, json!({ "defaultPeriod": "monthly" })),
                variant("annual", "Annual first", 50.0, false, json!({ "defaultPeriod": "annual" })),
            ],
            target_metric: "form_complete".into(),
            minimum_sample_size: 500,
            confidence_level: 0.9,
        },
    ]
}
