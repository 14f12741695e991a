//! Cohort trend points

use crate::{Effectiveness, RiskBand};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of students per risk band
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandCounts {
    /// Students in the low band
    pub low: u64,
    /// Students in the medium band
    pub medium: u64,
    /// Students in the high band
    pub high: u64,
}

impl BandCounts {
    /// Count one student in `band`
    pub fn add(&mut self, band: RiskBand) {
        match band {
            RiskBand::Low => self.low += 1,
            RiskBand::Medium => self.medium += 1,
            RiskBand::High => self.high += 1,
        }
    }

    /// Students counted across all bands
    pub fn total(&self) -> u64 {
        self.low + self.medium + self.high
    }
}

/// Cohort snapshot for one calendar period
///
/// Derived from durable history only, so a closed period always snapshots
/// to the same point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortTrendPoint {
    /// First instant of the period
    pub period_start: DateTime<Utc>,
    /// First instant after the period (exclusive)
    pub period_end: DateTime<Utc>,
    /// Students enrolled by period end and not archived before it
    pub enrolled: u64,
    /// Scored students per band
    pub bands: BandCounts,
    /// Enrolled students with no factor history by period end
    pub unscored: u64,
    /// Mean composite score of scored students
    pub average_score: Option<f64>,
    /// Mean latest attendance value of students with attendance samples
    pub average_attendance: Option<f64>,
    /// Alerts active at period end
    pub active_alerts: u64,
    /// Success across all interventions' outcomes recorded by period end
    pub intervention_success: Effectiveness,
}
