//! Intervention module - staff actions tracked separately from students
//!
//! Interventions reference students by id (many-to-many, no ownership).
//! Progress and outcomes are recorded as an append-only log of
//! [`ProgressEntry`] values; the tally on [`Intervention`] is the fold of that log.

use crate::{DomainError, InterventionId, StudentId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Category of intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterventionKind {
    /// Tutoring or academic support
    AcademicTutoring,
    /// Attendance improvement plan
    AttendancePlan,
    /// Counseling sessions
    Counseling,
    /// Mentoring program
    Mentoring,
    /// Family outreach
    FamilyOutreach,
    /// Financial assistance
    FinancialAid,
    /// Anything else
    Other,
}

impl InterventionKind {
    /// Get the kind name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            InterventionKind::AcademicTutoring => "academic-tutoring",
            InterventionKind::AttendancePlan => "attendance-plan",
            InterventionKind::Counseling => "counseling",
            InterventionKind::Mentoring => "mentoring",
            InterventionKind::FamilyOutreach => "family-outreach",
            InterventionKind::FinancialAid => "financial-aid",
            InterventionKind::Other => "other",
        }
    }

    /// Parse a kind from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "academic-tutoring" => Some(InterventionKind::AcademicTutoring),
            "attendance-plan" => Some(InterventionKind::AttendancePlan),
            "counseling" => Some(InterventionKind::Counseling),
            "mentoring" => Some(InterventionKind::Mentoring),
            "family-outreach" => Some(InterventionKind::FamilyOutreach),
            "financial-aid" => Some(InterventionKind::FinancialAid),
            "other" => Some(InterventionKind::Other),
            _ => None,
        }
    }
}

/// Intervention lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterventionStatus {
    /// Being prepared
    Planning,
    /// Running
    Active,
    /// Finished
    Completed,
    /// Stopped before completion
    Cancelled,
}

impl InterventionStatus {
    /// Get the status name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            InterventionStatus::Planning => "planning",
            InterventionStatus::Active => "active",
            InterventionStatus::Completed => "completed",
            InterventionStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a status from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "planning" => Some(InterventionStatus::Planning),
            "active" => Some(InterventionStatus::Active),
            "completed" => Some(InterventionStatus::Completed),
            "cancelled" => Some(InterventionStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether moving from `self` to `to` is permitted
    pub fn can_transition_to(&self, to: InterventionStatus) -> bool {
        matches!(
            (self, to),
            (InterventionStatus::Planning, InterventionStatus::Active)
                | (InterventionStatus::Planning, InterventionStatus::Cancelled)
                | (InterventionStatus::Active, InterventionStatus::Completed)
                | (InterventionStatus::Active, InterventionStatus::Cancelled)
        )
    }

    /// Whether the intervention still accepts progress updates
    pub fn accepts_progress(&self) -> bool {
        *self == InterventionStatus::Active
    }
}

/// Running outcome counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeTally {
    /// Students whose risk improved
    pub improved: u64,
    /// Students with no change
    pub no_change: u64,
    /// Students whose risk worsened
    pub declined: u64,
}

impl OutcomeTally {
    /// Total outcomes recorded
    pub fn total(&self) -> u64 {
        self.improved + self.no_change + self.declined
    }

    /// Tally after applying a delta
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidValue`] if a correction would make a counter negative
    pub fn apply(&self, delta: &OutcomeDelta) -> Result<OutcomeTally, DomainError> {
        let add = |current: u64, change: i64, name: &str| -> Result<u64, DomainError> {
            let next = current as i128 + change as i128;
            if next < 0 {
                return Err(DomainError::InvalidValue(format!(
                    "correction would make {} outcomes negative ({} {:+})",
                    name, current, change
                )));
            }
            u64::try_from(next)
                .map_err(|_| DomainError::InvalidValue(format!("{} outcomes overflow", name)))
        };

        Ok(OutcomeTally {
            improved: add(self.improved, delta.improved, "improved")?,
            no_change: add(self.no_change, delta.no_change, "no-change")?,
            declined: add(self.declined, delta.declined, "declined")?,
        })
    }
}

/// Change to the outcome counters carried by one log entry
///
/// Negative values are corrections; they never rewrite earlier entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutcomeDelta {
    /// Change in improved count
    pub improved: i64,
    /// Change in no-change count
    pub no_change: i64,
    /// Change in declined count
    pub declined: i64,
}

impl OutcomeDelta {
    /// Whether the delta changes nothing
    pub fn is_zero(&self) -> bool {
        self.improved == 0 && self.no_change == 0 && self.declined == 0
    }
}

/// One append-only progress/outcome log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    /// Intervention the entry belongs to
    pub intervention_id: InterventionId,
    /// Progress after this entry, in [0, 100]
    pub progress: f64,
    /// Outcome change
    pub outcome: OutcomeDelta,
    /// When the entry was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Derived effectiveness of an intervention (or a set of them)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Effectiveness {
    /// No outcomes recorded yet
    Undefined,
    /// At least one outcome recorded
    Measured {
        /// improved / total, in [0, 1]
        success_rate: f64,
        /// spent / improved, `None` when nothing improved
        cost_per_success: Option<f64>,
        /// Total outcomes recorded
        outcomes: u64,
    },
}

impl Effectiveness {
    /// Derive effectiveness from a tally and spending
    pub fn from_tally(tally: &OutcomeTally, spent: f64) -> Self {
        let total = tally.total();
        if total == 0 {
            return Effectiveness::Undefined;
        }

        Effectiveness::Measured {
            success_rate: tally.improved as f64 / total as f64,
            cost_per_success: (tally.improved > 0).then(|| spent / tally.improved as f64),
            outcomes: total,
        }
    }

    /// Success rate, if defined
    pub fn success_rate(&self) -> Option<f64> {
        match self {
            Effectiveness::Undefined => None,
            Effectiveness::Measured { success_rate, .. } => Some(*success_rate),
        }
    }
}

/// Request to create an intervention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIntervention {
    /// Short title
    pub title: String,
    /// Category
    #[serde(rename = "type")]
    pub kind: InterventionKind,
    /// Students receiving the intervention
    #[serde(default)]
    pub student_ids: Vec<StudentId>,
    /// Staff responsible
    #[serde(default)]
    pub staff: Vec<String>,
    /// First day
    pub start_date: NaiveDate,
    /// Last day, if planned
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Approved budget
    #[serde(default)]
    pub budget: f64,
}

/// An intervention aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intervention {
    /// Unique identifier
    pub id: InterventionId,
    /// Short title
    pub title: String,
    /// Category
    #[serde(rename = "type")]
    pub kind: InterventionKind,
    /// Students receiving the intervention (sorted, unique)
    pub student_ids: Vec<StudentId>,
    /// Staff responsible
    pub staff: Vec<String>,
    /// Lifecycle status
    pub status: InterventionStatus,
    /// First day
    pub start_date: NaiveDate,
    /// Last day, if planned
    pub end_date: Option<NaiveDate>,
    /// Approved budget
    pub budget: f64,
    /// Amount spent so far (never above budget)
    pub spent: f64,
    /// Progress in [0, 100]
    pub progress: f64,
    /// Outcome counters (fold of the progress log)
    pub outcomes: OutcomeTally,
    /// Optimistic concurrency version, bumped on every write
    pub version: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last write time
    pub updated_at: DateTime<Utc>,
    /// When the intervention was cancelled, if it was
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Intervention {
    /// Create an intervention in the planning state
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidValue`] for a blank title, a negative budget,
    /// or an end date before the start date
    pub fn plan(request: NewIntervention, at: DateTime<Utc>) -> Result<Self, DomainError> {
        if request.title.trim().is_empty() {
            return Err(DomainError::InvalidValue(
                "intervention title cannot be empty".to_string(),
            ));
        }
        check_amount(request.budget, "budget")?;
        if let Some(end) = request.end_date {
            if end < request.start_date {
                return Err(DomainError::InvalidValue(format!(
                    "end date {} is before start date {}",
                    end, request.start_date
                )));
            }
        }

        let mut student_ids = request.student_ids;
        student_ids.sort();
        student_ids.dedup();

        Ok(Self {
            id: InterventionId::new(),
            title: request.title,
            kind: request.kind,
            student_ids,
            staff: request.staff,
            status: InterventionStatus::Planning,
            start_date: request.start_date,
            end_date: request.end_date,
            budget: request.budget,
            spent: 0.0,
            progress: 0.0,
            outcomes: OutcomeTally::default(),
            version: 1,
            created_at: at,
            updated_at: at,
            cancelled_at: None,
        })
    }

    /// Apply a progress update, producing the new state and its log entry
    ///
    /// Progress is clamped to [0, 100].
    pub fn record_progress(
        &self,
        progress: f64,
        outcome: OutcomeDelta,
        at: DateTime<Utc>,
    ) -> Result<(Intervention, ProgressEntry), DomainError> {
        if !self.status.accepts_progress() {
            return Err(DomainError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: "progress update".to_string(),
            });
        }
        if !progress.is_finite() {
            return Err(DomainError::InvalidValue(format!(
                "progress must be a number, got {}",
                progress
            )));
        }

        let progress = progress.clamp(0.0, 100.0);
        let outcomes = self.outcomes.apply(&outcome)?;

        let mut next = self.clone();
        next.progress = progress;
        next.outcomes = outcomes;
        next.updated_at = at;

        let entry = ProgressEntry {
            intervention_id: self.id,
            progress,
            outcome,
            recorded_at: at,
        };
        Ok((next, entry))
    }

    /// Record spending against the budget
    ///
    /// # Errors
    /// Returns [`DomainError::BudgetExceeded`] if the budget would be exceeded;
    /// the amount is never clamped
    pub fn record_expense(&self, amount: f64, at: DateTime<Utc>) -> Result<Intervention, DomainError> {
        check_amount(amount, "expense")?;
        if self.spent + amount > self.budget {
            return Err(DomainError::BudgetExceeded {
                budget: self.budget,
                spent: self.spent,
                requested: amount,
            });
        }

        let mut next = self.clone();
        next.spent += amount;
        next.updated_at = at;
        Ok(next)
    }

    /// Raise the approved budget (the explicit override for budget rejections)
    pub fn increase_budget(&self, budget: f64, at: DateTime<Utc>) -> Result<Intervention, DomainError> {
        check_amount(budget, "budget")?;
        if budget < self.budget {
            return Err(DomainError::InvalidValue(format!(
                "budget can only be increased ({} -> {})",
                self.budget, budget
            )));
        }

        let mut next = self.clone();
        next.budget = budget;
        next.updated_at = at;
        Ok(next)
    }

    /// Move to another lifecycle status
    pub fn transition(&self, to: InterventionStatus, at: DateTime<Utc>) -> Result<Intervention, DomainError> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        let mut next = self.clone();
        next.status = to;
        next.updated_at = at;
        if to == InterventionStatus::Cancelled {
            next.cancelled_at = Some(at);
        }
        Ok(next)
    }

    /// Derived effectiveness
    pub fn effectiveness(&self) -> Effectiveness {
        Effectiveness::from_tally(&self.outcomes, self.spent)
    }

    /// Whether the student is assigned to this intervention
    pub fn includes(&self, student_id: &StudentId) -> bool {
        self.student_ids.binary_search(student_id).is_ok()
    }
}

fn check_amount(amount: f64, what: &str) -> Result<(), DomainError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(DomainError::InvalidValue(format!(
            "{} must be a non-negative number, got {}",
            what, amount
        )));
    }
    Ok(())
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: success rate is in [0, 1] and undefined exactly when there are no outcomes
        #[test]
        fn test_success_rate_bounds(improved in 0u64..1000, no_change in 0u64..1000, declined in 0u64..1000) {
            let tally = OutcomeTally { improved, no_change, declined };
            let effectiveness = Effectiveness::from_tally(&tally, 0.0);
            match effectiveness.success_rate() {
                None => prop_assert_eq!(tally.total(), 0),
                Some(rate) => {
                    prop_assert!(tally.total() > 0);
                    prop_assert!((0.0..=1.0).contains(&rate));
                }
            }
        }
    }
}
