//! Risk profile module - the derived per-student view

use crate::{DomainError, FactorKind, StudentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Discrete risk classification
///
/// Ordered from least to most severe so bands compare with `<`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    /// Composite below the medium threshold
    Low,
    /// Composite in [medium, high)
    Medium,
    /// Composite at or above the high threshold
    High,
}

impl RiskBand {
    /// Get the band name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBand::Low => "low",
            RiskBand::Medium => "medium",
            RiskBand::High => "high",
        }
    }

    /// Parse a band from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(RiskBand::Low),
            "medium" => Some(RiskBand::Medium),
            "high" => Some(RiskBand::High),
            _ => None,
        }
    }
}

/// Score thresholds separating the bands
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawThresholds")]
pub struct BandThresholds {
    /// Lowest score in the medium band (default 40)
    pub medium: f64,
    /// Lowest score in the high band (default 70)
    pub high: f64,
}

#[derive(Deserialize)]
struct RawThresholds {
    medium: f64,
    high: f64,
}

impl TryFrom<RawThresholds> for BandThresholds {
    type Error = DomainError;

    fn try_from(raw: RawThresholds) -> Result<Self, Self::Error> {
        Self::new(raw.medium, raw.high)
    }
}

impl BandThresholds {
    /// Create thresholds
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidValue`] unless `0 < medium < high <= 100`
    pub fn new(medium: f64, high: f64) -> Result<Self, DomainError> {
        if !(medium > 0.0 && medium < high && high <= 100.0) {
            return Err(DomainError::InvalidValue(format!(
                "band thresholds must satisfy 0 < medium < high <= 100, got medium={} high={}",
                medium, high
            )));
        }
        Ok(Self { medium, high })
    }

    /// Band for a composite score
    pub fn band_for(&self, score: f64) -> RiskBand {
        if score >= self.high {
            RiskBand::High
        } else if score >= self.medium {
            RiskBand::Medium
        } else {
            RiskBand::Low
        }
    }
}

impl Default for BandThresholds {
    fn default() -> Self {
        Self {
            medium: 40.0,
            high: 70.0,
        }
    }
}

/// Direction of the composite score relative to the prior calendar period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// Risk rose by at least the stable delta
    Increasing,
    /// Risk fell by at least the stable delta
    Decreasing,
    /// Change smaller than the stable delta, or no prior period data
    Stable,
}

/// Current reading for one factor inside a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorReading {
    /// Standing value used for scoring
    pub value: f64,
    /// Observation time, `None` when the neutral value was imputed
    pub observed_at: Option<DateTime<Utc>>,
    /// Whether the value was imputed because no sample exists
    pub imputed: bool,
}

/// Derived risk view for one student
///
/// Never authoritative; always recomputable from samples and intervention history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskProfile {
    /// Student this profile describes
    pub student_id: StudentId,
    /// Composite score after mitigation, in [0, 100]
    pub score: f64,
    /// Weighted factor score before mitigation
    pub weighted_score: f64,
    /// Points subtracted for active interventions
    pub mitigation: f64,
    /// Band of the composite score
    pub band: RiskBand,
    /// Per-factor readings
    pub factors: BTreeMap<FactorKind, FactorReading>,
    /// Direction relative to the prior calendar period
    pub trend: Trend,
    /// Composite score at the end of the prior calendar period, if known
    pub previous_score: Option<f64>,
    /// Instant of the newest input used
    pub computed_at: DateTime<Utc>,
}

impl RiskProfile {
    /// Snapshot of the current factor values
    pub fn factor_values(&self) -> BTreeMap<FactorKind, f64> {
        self.factors.iter().map(|(k, r)| (*k, r.value)).collect()
    }
}

/// Last band and score the alert manager evaluated for a student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskWatermark {
    /// Student the watermark belongs to
    pub student_id: StudentId,
    /// Band at last evaluation
    pub band: RiskBand,
    /// Composite score at last evaluation
    pub score: f64,
    /// When the evaluation happened
    pub evaluated_at: DateTime<Utc>,
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: band assignment is monotonic in score
        #[test]
        fn test_band_monotonic(a in 0.0f64..=100.0, b in 0.0f64..=100.0) {
            let t = BandThresholds::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(t.band_for(lo) <= t.band_for(hi));
        }
    }
}
