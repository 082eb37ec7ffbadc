//! Significance testing for experiment results.

use serde::Serialize;

use crate::models::Experiment;

/// Two-tailed p-value of a two-proportion z-test.
///
/// Returns 1.0 (no evidence of a difference) when either sample is empty or the
/// pooled variance is zero.
pub fn calculate_significance(
    control_conversions: u64,
    control_sample: u64,
    test_conversions: u64,
    test_sample: u64,
) -> f64 {
    if control_sample == 0 || test_sample == 0 {
        return 1.0;
    }

    let n1 = control_sample as f64;
    let n2 = test_sample as f64;
    let p1 = control_conversions.min(control_sample) as f64 / n1;
    let p2 = test_conversions.min(test_sample) as f64 / n2;

    let pooled = (p1 * n1 + p2 * n2) / (n1 + n2);
    let standard_error = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    if !standard_error.is_finite() || standard_error == 0.0 {
        return 1.0;
    }

    let z = (p2 - p1) / standard_error;
    let p_value = 2.0 * (1.0 - normal_cdf(z.abs()));
    p_value.clamp(0.0, 1.0)
}

fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

// Abramowitz & Stegun 7.1.26, max error 1.5e-7.
fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254_829_592;
    const A2: f64 = -0.284_496_736;
    const A3: f64 = 1.421_413_741;
    const A4: f64 = -1.453_152_027;
    const A5: f64 = 1.061_405_429;
    const P: f64 = 0.327_591_1;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}

/// Observed counts for one arm of an experiment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArmStats {
    pub sample: u64,
    pub conversions: u64,
}

impl ArmStats {
    pub fn new(sample: u64, conversions: u64) -> Self {
        Self { sample, conversions }
    }

    pub fn rate(&self) -> f64 {
        if self.sample == 0 {
            return 0.0;
        }
        self.conversions.min(self.sample) as f64 / self.sample as f64
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentAnalysis {
    pub experiment_id: String,
    pub control_rate: f64,
    pub treatment_rate: f64,
    /// Relative change of the treatment over control; 0 when control never converts.
    pub relative_lift: f64,
    pub p_value: f64,
    pub sample_size_reached: bool,
    /// Significant at the experiment's confidence level with enough samples.
    pub significant: bool,
}

/// Compare one treatment arm against control under the experiment's own thresholds.
pub fn analyze(experiment: &Experiment, control: ArmStats, treatment: ArmStats) -> ExperimentAnalysis {
    let control_rate = control.rate();
    let treatment_rate = treatment.rate();
    let relative_lift = if control_rate > 0.0 {
        (treatment_rate - control_rate) / control_rate
    } else {
        0.0
    };
    let p_value = calculate_significance(
        control.conversions,
        control.sample,
        treatment.conversions,
        treatment.sample,
    );
    let sample_size_reached = control.sample >= experiment.minimum_sample_size
        && treatment.sample >= experiment.minimum_sample_size;
    let alpha = 1.0 - experiment.confidence_level;

    ExperimentAnalysis {
        experiment_id: experiment.id.clone(),
        control_rate,
        treatment_rate,
        relative_lift,
        p_value,
        sample_size_reached,
        significant: sample_size_reached && p_value < alpha,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiments::ExperimentRegistry;

    #[test]
    fn degenerate_inputs_are_not_significant() {
        assert_eq!(calculate_significance(0, 0, 0, 0), 1.0);
        assert_eq!(calculate_significance(5, 10, 0, 0), 1.0);
        // Zero pooled variance: nobody converted anywhere.
        assert_eq!(calculate_significance(0, 100, 0, 100), 1.0);
        // Everyone converted everywhere.
        assert_eq!(calculate_significance(100, 100, 50, 50), 1.0);
    }

    #[test]
    fn identical_rates_give_p_of_one() {
        let p = calculate_significance(50, 500, 50, 500);
        assert!((p - 1.0).abs() < 1e-6);
    }

    #[test]
    fn large_difference_is_significant() {
        // 10% vs 15% on 1000 each: z ~ 3.38, p ~ 0.0007.
        let p = calculate_significance(100, 1000, 150, 1000);
        assert!(p < 0.001, "p = {p}");
        assert!(p > 0.0);
    }

    #[test]
    fn small_difference_is_not_significant() {
        let p = calculate_significance(10, 100, 12, 100);
        assert!(p > 0.5, "p = {p}");
    }

    #[test]
    fn symmetric_in_direction() {
        let a = calculate_significance(100, 1000, 150, 1000);
        let b = calculate_significance(150, 1000, 100, 1000);
        assert!((a - b).abs() < 1e-12);
    }

    #[test]
    fn erf_matches_reference_points() {
        assert!(erf(0.0).abs() < 1e-7);
        assert!((erf(1.0) - 0.842_700_79).abs() < 1e-6);
        assert!((erf(-1.0) + 0.842_700_79).abs() < 1e-6);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
    }

    #[test]
    fn analysis_respects_minimum_sample_size() {
        let registry = ExperimentRegistry::builtin().unwrap();
        let hero = registry.get("hero_layout").unwrap();

        let early = analyze(hero, ArmStats::new(200, 20), ArmStats::new(200, 40));
        assert!(!early.sample_size_reached);
        assert!(!early.significant);
        assert!((early.relative_lift - 1.0).abs() < 1e-9);

        let mature = analyze(hero, ArmStats::new(2_000, 200), ArmStats::new(2_000, 300));
        assert!(mature.sample_size_reached);
        assert!(mature.significant);
    }

    #[test]
    fn analysis_handles_empty_arms() {
        let registry = ExperimentRegistry::builtin().unwrap();
        let hero = registry.get("hero_layout").unwrap();
        let result = analyze(hero, ArmStats::default(), ArmStats::default());
        assert_eq!(result.p_value, 1.0);
        assert_eq!(result.relative_lift, 0.0);
        assert!(!result.p_value.is_nan());
    }
}
