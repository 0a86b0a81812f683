//! Hybrid attack detection.
//!
//! Two independent opinions are combined with a logical OR: a fixed set
//! of statistical threshold rules, and an anomaly scorer standardized
//! against a small reference profile of normal traffic. False positives
//! are preferred over false negatives here, since every ban the
//! detector hands out is time-boxed and reversible.

use crate::core::features::FeatureVector;

/// Extreme volume: any single source this fast is almost certainly a flood
const EXTREME_RPS: f64 = 30.0;
/// Burst attack: many requests in one second hammering the same endpoints
const BURST_LIMIT: u32 = 15;
const BURST_DIVERSITY: f64 = 0.35;
/// Non-human pacing: sustained sub-50ms gaps
const MIN_HUMAN_GAP: f64 = 0.05;
const PACING_RPS: f64 = 10.0;
/// Error explosion: bots trip large 4xx/5xx ratios
const ERROR_LIMIT: f64 = 0.40;
/// Low diversity flood: the same path over and over
const FLOOD_DIVERSITY: f64 = 0.20;
const FLOOD_RPS: f64 = 12.0;
/// Tool traffic: medium rate but machine-regular intervals
const TOOL_RPS_LOW: f64 = 8.0;
const TOOL_RPS_HIGH: f64 = 15.0;
const TOOL_GAP: f64 = 0.08;

/// Hard sanity cap: above this rate the scorer flags regardless of the
/// model, guarding against a model trained on too little baseline data
const RPS_SANITY_CAP: f64 = 25.0;

/// Standard deviations beyond which a standardized signal is an outlier
const OUTLIER_SIGMA: f64 = 3.0;

/// Reference profile of normal traffic used to fit the anomaly scorer,
/// one row per sample: rps, burst, unique_path_ratio, avg_gap, error_rate
const BASELINE: [[f64; 5]; 5] = [
    [3.0, 2.0, 0.60, 0.30, 0.01],
    [4.0, 3.0, 0.70, 0.40, 0.00],
    [2.0, 1.0, 0.80, 0.50, 0.02],
    [3.0, 2.0, 0.75, 0.35, 0.01],
    [4.0, 2.0, 0.65, 0.30, 0.00],
];

/// Outcome of a single detector evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the request stream is considered an attack
    pub is_attack: bool,
    /// The rule engine fired
    pub via_rule: bool,
    /// The anomaly scorer fired
    pub via_model: bool,
}

/// Anomaly scorer fitted offline on the fixed baseline profile.
///
/// Live vectors are standardized with the baseline's mean and variance
/// and flagged when any signal deviates past [`OUTLIER_SIGMA`] in the
/// attack direction: high rate, high burst, low diversity, low gap,
/// high error rate. The one-sided check keeps slow or sparse traffic
/// from reading as anomalous.
#[derive(Debug, Clone)]
struct AnomalyModel {
    mean: [f64; 5],
    std: [f64; 5],
}

impl AnomalyModel {
    fn fit(samples: &[[f64; 5]]) -> Self {
        let n = samples.len() as f64;
        let mut mean = [0.0; 5];
        let mut std = [0.0; 5];

        for sample in samples {
            for (m, v) in mean.iter_mut().zip(sample) {
                *m += v / n;
            }
        }
        for sample in samples {
            for ((s, v), m) in std.iter_mut().zip(sample).zip(&mean) {
                *s += (v - m).powi(2) / n;
            }
        }
        for s in &mut std {
            *s = s.sqrt().max(f64::EPSILON);
        }

        Self { mean, std }
    }

    fn standardize(&self, v: &FeatureVector) -> [f64; 5] {
        let raw = [
            v.rps,
            v.burst as f64,
            v.unique_path_ratio,
            v.avg_gap,
            v.error_rate,
        ];
        let mut z = [0.0; 5];
        for ((z, raw), (m, s)) in z
            .iter_mut()
            .zip(&raw)
            .zip(self.mean.iter().zip(&self.std))
        {
            *z = (raw - m) / s;
        }
        z
    }

    fn is_outlier(&self, v: &FeatureVector) -> bool {
        if v.rps > RPS_SANITY_CAP {
            return true;
        }

        let [z_rps, z_burst, z_uniq, z_gap, z_err] = self.standardize(v);

        z_rps > OUTLIER_SIGMA
            || z_burst > OUTLIER_SIGMA
            || z_uniq < -OUTLIER_SIGMA
            || z_gap < -OUTLIER_SIGMA
            || z_err > OUTLIER_SIGMA
    }
}

/// Hybrid detector combining the rule engine and the anomaly scorer.
///
/// Evaluation is a pure function of the input vector and the parameters
/// fitted at startup; nothing on the request path mutates the model.
#[derive(Debug, Clone)]
pub struct Detector {
    model: AnomalyModel,
}

impl Detector {
    pub fn new() -> Self {
        Self {
            model: AnomalyModel::fit(&BASELINE),
        }
    }

    /// Evaluate a feature vector against both opinions
    pub fn evaluate(&self, v: &FeatureVector) -> Verdict {
        let via_rule = Self::stat_check(v);
        let via_model = self.model.is_outlier(v);

        Verdict {
            is_attack: via_rule || via_model,
            via_rule,
            via_model,
        }
    }

    /// Ordered set of fixed threshold predicates; any single hit triggers
    fn stat_check(v: &FeatureVector) -> bool {
        // extreme volume
        if v.rps > EXTREME_RPS {
            return true;
        }
        // burst with low diversity
        if v.burst > BURST_LIMIT && v.unique_path_ratio < BURST_DIVERSITY {
            return true;
        }
        // non-human pacing
        if v.avg_gap < MIN_HUMAN_GAP && v.rps > PACING_RPS {
            return true;
        }
        // error explosion
        if v.error_rate > ERROR_LIMIT {
            return true;
        }
        // low diversity flood
        if v.unique_path_ratio < FLOOD_DIVERSITY && v.rps > FLOOD_RPS {
            return true;
        }
        // regular-interval tool traffic
        if v.rps > TOOL_RPS_LOW && v.rps < TOOL_RPS_HIGH && v.avg_gap < TOOL_GAP {
            return true;
        }

        false
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::FeatureTracker;

    fn vector(rps: f64, burst: u32, uniq: f64, gap: f64, err: f64) -> FeatureVector {
        FeatureVector {
            rps,
            burst,
            unique_path_ratio: uniq,
            avg_gap: gap,
            error_rate: err,
        }
    }

    #[test]
    fn test_baseline_profile_scores_normal() {
        let detector = Detector::new();

        for row in BASELINE {
            let v = vector(row[0], row[1] as u32, row[2], row[3], row[4]);
            let verdict = detector.evaluate(&v);
            assert!(!verdict.is_attack, "baseline row flagged: {v:?}");
        }
    }

    #[test]
    fn test_extreme_volume_rule() {
        let detector = Detector::new();
        let verdict = detector.evaluate(&vector(31.0, 10, 0.9, 0.5, 0.0));

        assert!(verdict.is_attack);
        assert!(verdict.via_rule);
    }

    #[test]
    fn test_burst_with_low_diversity_rule() {
        let detector = Detector::new();
        assert!(Detector::stat_check(&vector(5.0, 16, 0.30, 0.5, 0.0)));
        // diverse bursts are tolerated by the rule engine
        assert!(!Detector::stat_check(&vector(5.0, 16, 0.80, 0.5, 0.0)));
    }

    #[test]
    fn test_non_human_pacing_rule() {
        assert!(Detector::stat_check(&vector(11.0, 5, 0.9, 0.04, 0.0)));
        assert!(!Detector::stat_check(&vector(5.0, 5, 0.9, 0.04, 0.0)));
    }

    #[test]
    fn test_error_explosion_rule() {
        assert!(Detector::stat_check(&vector(1.0, 1, 0.9, 1.0, 0.41)));
        assert!(!Detector::stat_check(&vector(1.0, 1, 0.9, 1.0, 0.39)));
    }

    #[test]
    fn test_low_diversity_flood_rule() {
        assert!(Detector::stat_check(&vector(13.0, 5, 0.19, 0.5, 0.0)));
        assert!(!Detector::stat_check(&vector(11.0, 5, 0.19, 0.5, 0.0)));
    }

    #[test]
    fn test_regular_interval_tool_traffic_rule() {
        assert!(Detector::stat_check(&vector(12.0, 5, 0.9, 0.07, 0.0)));
        assert!(!Detector::stat_check(&vector(12.0, 5, 0.9, 0.09, 0.0)));
    }

    #[test]
    fn test_sanity_cap_overrides_model() {
        let detector = Detector::new();
        // below the rule threshold but past the scorer's hard cap
        let verdict = detector.evaluate(&vector(26.0, 3, 0.7, 0.35, 0.01));

        assert!(verdict.is_attack);
        assert!(verdict.via_model);
    }

    #[test]
    fn test_model_flags_uniform_repeat_traffic() {
        let detector = Detector::new();
        // two fast hits on one path: diversity collapses past 3 sigma
        let verdict = detector.evaluate(&vector(0.4, 2, 0.33, 0.01, 0.0));

        assert!(verdict.via_model);
        assert!(!verdict.via_rule);
    }

    #[test]
    fn test_model_tolerates_slow_sparse_traffic() {
        let detector = Detector::new();
        // a lone request: neutral gap, damped diversity
        let verdict = detector.evaluate(&vector(0.2, 1, 0.5, 1.0, 0.0));

        assert!(!verdict.is_attack);
    }

    #[test]
    fn test_verdict_reports_both_opinions() {
        let detector = Detector::new();
        let verdict = detector.evaluate(&vector(40.0, 40, 0.02, 0.02, 0.0));

        assert!(verdict.is_attack);
        assert!(verdict.via_rule);
        assert!(verdict.via_model);
    }

    #[test]
    fn test_steady_distinct_path_browsing_passes_end_to_end() {
        let tracker = FeatureTracker::new(100);
        let detector = Detector::new();

        for (i, path) in ["/home", "/about", "/contact"].iter().enumerate() {
            tracker.record_at("10.1.1.1", path, 200, 100.0 + i as f64);
            let features = tracker.compute_features_at("10.1.1.1", 100.0 + i as f64);
            let verdict = detector.evaluate(&features);
            assert!(!verdict.is_attack, "legitimate request flagged: {features:?}");
        }
    }

    #[test]
    fn test_single_path_flood_flags_end_to_end() {
        let tracker = FeatureTracker::new(100);
        let detector = Detector::new();

        let mut flagged_at = None;
        for i in 0..40 {
            let now = 100.0 + i as f64 * 0.02;
            tracker.record_at("10.1.1.2", "/login", 200, now);
            let features = tracker.compute_features_at("10.1.1.2", now);
            if detector.evaluate(&features).is_attack {
                flagged_at = Some(i);
                break;
            }
        }

        // 40 same-path requests inside one second must not survive
        assert!(flagged_at.is_some());
    }
}
