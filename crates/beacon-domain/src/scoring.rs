//! Risk scoring computation
//!
//! Implements the deterministic composite score:
//! 1. Latest sample per factor (missing factors take the neutral value)
//! 2. Weighted risk: Σ weightₖ · (100 − valueₖ)
//! 3. Intervention mitigation subtracted and the result clamped to [0, 100]
//! 4. Band from thresholds, trend against the prior calendar period
//!
//! Every function here is pure: identical histories give identical profiles.

use crate::{
    BandThresholds, CalendarPeriod, FactorKind, FactorReading, FactorWeights, InterventionId,
    RiskFactorSample, RiskProfile, StudentId, Trend,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Neutral standing assumed for a factor with no samples
pub const NEUTRAL_VALUE: f64 = 50.0;

/// Minimum composite change that counts as a trend
pub const STABLE_DELTA: f64 = 5.0;

/// Configuration for profile computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Factor weights (sum to 1.0)
    pub weights: FactorWeights,
    /// Band thresholds
    pub thresholds: BandThresholds,
    /// Value imputed for missing factors
    pub neutral_value: f64,
    /// Minimum |Δ| against the prior period to report a trend
    pub stable_delta: f64,
    /// Period used for trend comparison
    pub trend_period: CalendarPeriod,
    /// Intervention mitigation settings
    pub mitigation: MitigationConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: FactorWeights::default(),
            thresholds: BandThresholds::default(),
            neutral_value: NEUTRAL_VALUE,
            stable_delta: STABLE_DELTA,
            trend_period: CalendarPeriod::Month,
            mitigation: MitigationConfig::default(),
        }
    }
}

/// How much active interventions lower a student's composite
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MitigationConfig {
    /// Points subtracted by one intervention at 100% progress
    pub per_intervention_points: f64,
    /// Cap on total mitigation points
    pub max_points: f64,
}

impl Default for MitigationConfig {
    fn default() -> Self {
        Self {
            per_intervention_points: 5.0,
            max_points: 10.0,
        }
    }
}

impl MitigationConfig {
    /// Mitigation disabled
    pub fn disabled() -> Self {
        Self {
            per_intervention_points: 0.0,
            max_points: 0.0,
        }
    }
}

/// Progress history of one intervention that lists the student
#[derive(Debug, Clone, PartialEq)]
pub struct MitigationSource {
    /// Intervention providing the signal
    pub intervention_id: InterventionId,
    /// (recorded_at, progress) pairs in any order
    pub progress_log: Vec<(DateTime<Utc>, f64)>,
    /// Cancellation instant; a cancelled intervention stops mitigating from then on
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Latest sample per factor observed strictly before `before` (all samples when `None`)
///
/// Ties on `observed_at` resolve to the lower standing value so the result does
/// not depend on the order samples arrived in.
pub fn latest_readings(
    samples: &[RiskFactorSample],
    before: Option<DateTime<Utc>>,
) -> BTreeMap<FactorKind, &RiskFactorSample> {
    let mut latest: BTreeMap<FactorKind, &RiskFactorSample> = BTreeMap::new();

    for sample in samples
        .iter()
        .filter(|s| before.map_or(true, |b| s.observed_at < b))
    {
        let replace = match latest.get(&sample.kind) {
            Some(current) => {
                sample.observed_at > current.observed_at
                    || (sample.observed_at == current.observed_at && sample.value < current.value)
            }
            None => true,
        };
        if replace {
            latest.insert(sample.kind, sample);
        }
    }

    latest
}

/// Weighted risk score of the given readings, imputing the neutral value for gaps
pub fn weighted_score(
    latest: &BTreeMap<FactorKind, &RiskFactorSample>,
    config: &ScoringConfig,
) -> f64 {
    FactorKind::ALL
        .iter()
        .map(|kind| {
            let value = latest
                .get(kind)
                .map(|s| s.value)
                .unwrap_or(config.neutral_value);
            config.weights.weight(*kind) * (100.0 - value)
        })
        .sum()
}

/// Mitigation points in effect just before `before` (now when `None`)
///
/// Returns the points and the newest input instant that influenced them.
pub fn mitigation_points(
    sources: &[MitigationSource],
    before: Option<DateTime<Utc>>,
    config: &MitigationConfig,
) -> (f64, Option<DateTime<Utc>>) {
    let mut total = 0.0;
    let mut newest: Option<DateTime<Utc>> = None;

    for source in sources {
        let in_effect = match (source.cancelled_at, before) {
            (None, _) => true,
            (Some(cancelled), Some(bound)) => cancelled >= bound,
            (Some(_), None) => false,
        };

        if !in_effect {
            // Cancellation changed the outcome, so it counts as an input
            newest = newest.max(source.cancelled_at);
            continue;
        }

        let latest = source
            .progress_log
            .iter()
            .filter(|(at, _)| before.map_or(true, |b| *at < b))
            .max_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));

        if let Some((at, progress)) = latest {
            total += config.per_intervention_points * progress.clamp(0.0, 100.0) / 100.0;
            newest = newest.max(Some(*at));
        }
    }

    (total.min(config.max_points).max(0.0), newest)
}

/// Compute a risk profile from history
///
/// Only samples observed strictly before `before` are used (all when `None`).
/// Returns `None` when no sample qualifies.
pub fn compute_profile(
    student_id: &StudentId,
    samples: &[RiskFactorSample],
    sources: &[MitigationSource],
    config: &ScoringConfig,
    before: Option<DateTime<Utc>>,
) -> Option<RiskProfile> {
    let latest = latest_readings(samples, before);
    let newest_sample = latest.values().map(|s| s.observed_at).max()?;

    let weighted = weighted_score(&latest, config);
    let (mitigation, newest_signal) = mitigation_points(sources, before, &config.mitigation);
    let score = round2((weighted - mitigation).clamp(0.0, 100.0));

    let computed_at = newest_signal.map_or(newest_sample, |s| s.max(newest_sample));

    // Prior period: everything observed before the start of the current period
    let boundary = config.trend_period.start_of(computed_at);
    let previous_score = composite_before(samples, sources, config, boundary);

    let trend = match previous_score {
        Some(prev) if score - prev >= config.stable_delta => Trend::Increasing,
        Some(prev) if prev - score >= config.stable_delta => Trend::Decreasing,
        _ => Trend::Stable,
    };

    let factors = FactorKind::ALL
        .iter()
        .map(|kind| {
            let reading = match latest.get(kind) {
                Some(sample) => FactorReading {
                    value: sample.value,
                    observed_at: Some(sample.observed_at),
                    imputed: false,
                },
                None => FactorReading {
                    value: config.neutral_value,
                    observed_at: None,
                    imputed: true,
                },
            };
            (*kind, reading)
        })
        .collect();

    Some(RiskProfile {
        student_id: student_id.clone(),
        score,
        weighted_score: round2(weighted),
        mitigation: round2(mitigation),
        band: config.thresholds.band_for(score),
        factors,
        trend,
        previous_score,
        computed_at,
    })
}

/// Composite score from inputs strictly before `boundary`
fn composite_before(
    samples: &[RiskFactorSample],
    sources: &[MitigationSource],
    config: &ScoringConfig,
    boundary: DateTime<Utc>,
) -> Option<f64> {
    let latest = latest_readings(samples, Some(boundary));
    if latest.is_empty() {
        return None;
    }
    let weighted = weighted_score(&latest, config);
    let (mitigation, _) = mitigation_points(sources, Some(boundary), &config.mitigation);
    Some(round2((weighted - mitigation).clamp(0.0, 100.0)))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
