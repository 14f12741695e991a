//! Risk factors, samples and scoring weights

use crate::{DomainError, SampleId, StudentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tolerance used when checking that weights sum to 1.0
const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// A tracked risk factor
///
/// Declaration order is the canonical order used in profiles and snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FactorKind {
    /// Grades and coursework standing
    Academic,
    /// Attendance rate
    Attendance,
    /// Conduct rating
    Behavioral,
    /// Family engagement with the school
    FamilyEngagement,
    /// Peer relationships
    PeerRelationships,
    /// Economic stability
    Economic,
}

impl FactorKind {
    /// All factor kinds in canonical order
    pub const ALL: [FactorKind; 6] = [
        FactorKind::Academic,
        FactorKind::Attendance,
        FactorKind::Behavioral,
        FactorKind::FamilyEngagement,
        FactorKind::PeerRelationships,
        FactorKind::Economic,
    ];

    /// Get the factor name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            FactorKind::Academic => "academic",
            FactorKind::Attendance => "attendance",
            FactorKind::Behavioral => "behavioral",
            FactorKind::FamilyEngagement => "family-engagement",
            FactorKind::PeerRelationships => "peer-relationships",
            FactorKind::Economic => "economic",
        }
    }

    /// Parse a factor kind from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "academic" => Some(FactorKind::Academic),
            "attendance" => Some(FactorKind::Attendance),
            "behavioral" => Some(FactorKind::Behavioral),
            "family-engagement" | "family" => Some(FactorKind::FamilyEngagement),
            "peer-relationships" | "peer" => Some(FactorKind::PeerRelationships),
            "economic" => Some(FactorKind::Economic),
            _ => None,
        }
    }
}

impl std::str::FromStr for FactorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Invalid factor kind: {}", s))
    }
}

/// A single standing measurement for one factor
///
/// Values are in [0, 100] where 100 is the best standing (full attendance,
/// top grades). Samples are immutable; new observations append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFactorSample {
    /// Unique identifier
    pub id: SampleId,
    /// Student this sample belongs to
    pub student_id: StudentId,
    /// Which factor was observed
    pub kind: FactorKind,
    /// Standing value in [0, 100]
    pub value: f64,
    /// When the observation was made
    pub observed_at: DateTime<Utc>,
}

impl RiskFactorSample {
    /// Create a validated sample
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidValue`] if the value is not a finite number in [0, 100]
    pub fn new(
        student_id: StudentId,
        kind: FactorKind,
        value: f64,
        observed_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return Err(DomainError::InvalidValue(format!(
                "{} sample value {} is outside [0, 100]",
                kind.as_str(),
                value
            )));
        }

        Ok(Self {
            id: SampleId::new(),
            student_id,
            kind,
            value,
            observed_at,
        })
    }

    /// Risk contribution of this sample (100 minus the standing value)
    pub fn risk(&self) -> f64 {
        100.0 - self.value
    }
}

/// Per-factor weights used for the composite score
///
/// Weights are non-negative and always sum to 1.0; this is checked at
/// construction and on deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WeightTable", into = "WeightTable")]
pub struct FactorWeights {
    weights: BTreeMap<FactorKind, f64>,
}

/// Serialized form of [`FactorWeights`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightTable {
    /// Academic weight
    pub academic: f64,
    /// Attendance weight
    pub attendance: f64,
    /// Behavioral weight
    pub behavioral: f64,
    /// Family engagement weight
    pub family_engagement: f64,
    /// Peer relationships weight
    pub peer_relationships: f64,
    /// Economic weight
    pub economic: f64,
}

impl FactorWeights {
    /// Create a weight set
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidValue`] if a weight is negative or not finite,
    /// or the weights do not sum to 1.0
    pub fn new(table: WeightTable) -> Result<Self, DomainError> {
        let weights: BTreeMap<FactorKind, f64> = [
            (FactorKind::Academic, table.academic),
            (FactorKind::Attendance, table.attendance),
            (FactorKind::Behavioral, table.behavioral),
            (FactorKind::FamilyEngagement, table.family_engagement),
            (FactorKind::PeerRelationships, table.peer_relationships),
            (FactorKind::Economic, table.economic),
        ]
        .into_iter()
        .collect();

        if let Some((kind, w)) = weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return Err(DomainError::InvalidValue(format!(
                "weight for {} must be a non-negative number, got {}",
                kind.as_str(),
                w
            )));
        }

        let sum: f64 = weights.values().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(DomainError::InvalidValue(format!(
                "factor weights must sum to 1.0, got {}",
                sum
            )));
        }

        Ok(Self { weights })
    }

    /// Weight for a factor
    pub fn weight(&self, kind: FactorKind) -> f64 {
        self.weights.get(&kind).copied().unwrap_or(0.0)
    }

    /// Sum of all weights (1.0 within tolerance)
    pub fn sum(&self) -> f64 {
        self.weights.values().sum()
    }
}

impl Default for FactorWeights {
    /// academic 0.25, attendance 0.20, behavioral 0.15, family 0.15, peer 0.10, economic 0.15
    fn default() -> Self {
        let weights = [
            (FactorKind::Academic, 0.25),
            (FactorKind::Attendance, 0.20),
            (FactorKind::Behavioral, 0.15),
            (FactorKind::FamilyEngagement, 0.15),
            (FactorKind::PeerRelationships, 0.10),
            (FactorKind::Economic, 0.15),
        ]
        .into_iter()
        .collect();
        Self { weights }
    }
}

impl TryFrom<WeightTable> for FactorWeights {
    type Error = DomainError;

    fn try_from(table: WeightTable) -> Result<Self, Self::Error> {
        Self::new(table)
    }
}

impl From<FactorWeights> for WeightTable {
    fn from(w: FactorWeights) -> Self {
        Self {
            academic: w.weight(FactorKind::Academic),
            attendance: w.weight(FactorKind::Attendance),
            behavioral: w.weight(FactorKind::Behavioral),
            family_engagement: w.weight(FactorKind::FamilyEngagement),
            peer_relationships: w.weight(FactorKind::PeerRelationships),
            economic: w.weight(FactorKind::Economic),
        }
    }
}
