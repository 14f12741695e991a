//! Trait definitions for external interactions
//!
//! These traits define the boundaries between domain logic and infrastructure.
//! The storage implementation lives in `beacon-store`; engines receive it as
//! an `Arc<dyn RiskStore>`.

use crate::{
    Alert, AlertId, AlertSeverity, AlertStatus, AlertTransition, AlertType, AttemptId,
    ChannelAttempt, CohortTrendPoint, Intervention, InterventionId, ProgressEntry, RepoError,
    RiskFactorSample, RiskWatermark, Student, StudentId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Students and their append-only factor history
///
/// Implemented by the infrastructure layer (beacon-store)
pub trait StudentRepo: Send + Sync {
    /// Insert a new student; `Conflict` if the id is taken
    fn insert_student(&self, student: &Student) -> Result<(), RepoError>;

    /// Overwrite a student's mutable fields; `NotFound` if absent
    fn update_student(&self, student: &Student) -> Result<(), RepoError>;

    /// Get a student by id
    fn get_student(&self, id: &StudentId) -> Result<Option<Student>, RepoError>;

    /// All students, archived ones included, ordered by id
    fn list_students(&self) -> Result<Vec<Student>, RepoError>;

    /// Append a factor sample (never overwrites)
    fn append_sample(&self, sample: &RiskFactorSample) -> Result<(), RepoError>;

    /// Append a batch of samples atomically: all are stored or none are
    fn append_samples(&self, samples: &[RiskFactorSample]) -> Result<(), RepoError>;

    /// Samples for one student observed strictly before `before` (all when `None`)
    fn samples_for(
        &self,
        id: &StudentId,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<RiskFactorSample>, RepoError>;
}

/// Outcome of an atomic check-and-create
#[derive(Debug, Clone, PartialEq)]
pub enum AlertUpsert {
    /// No active alert existed for the (subject, type, dedup key); this one was stored
    Created(Alert),
    /// An active alert existed and was refreshed in place
    Refreshed(Alert),
}

impl AlertUpsert {
    /// The stored alert
    pub fn alert(&self) -> &Alert {
        match self {
            AlertUpsert::Created(alert) | AlertUpsert::Refreshed(alert) => alert,
        }
    }

    /// Consume into the stored alert
    pub fn into_alert(self) -> Alert {
        match self {
            AlertUpsert::Created(alert) | AlertUpsert::Refreshed(alert) => alert,
        }
    }
}

/// Filter for alert listings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertQuery {
    /// Only alerts in this status
    pub status: Option<AlertStatus>,
    /// Only alerts with this severity
    pub severity: Option<AlertSeverity>,
    /// Only alerts of this type
    #[serde(rename = "type")]
    pub alert_type: Option<AlertType>,
    /// Only alerts for this student
    pub student_id: Option<StudentId>,
    /// Maximum results to return
    pub limit: Option<usize>,
}

impl AlertQuery {
    /// Whether an alert passes the filters (ignores `limit`)
    pub fn matches(&self, alert: &Alert) -> bool {
        self.status.map_or(true, |s| alert.status == s)
            && self.severity.map_or(true, |s| alert.severity == s)
            && self.alert_type.map_or(true, |t| alert.alert_type == t)
            && self
                .student_id
                .as_ref()
                .map_or(true, |id| alert.student_id.as_ref() == Some(id))
    }
}

/// Alerts, their transition log and the evaluation watermark
pub trait AlertRepo: Send + Sync {
    /// Store `alert` unless an active alert exists for its (subject, type,
    /// dedup key); in that case refresh the existing one's snapshot and
    /// `updated_at`. Must be a single atomic operation.
    fn upsert_active_alert(&self, alert: &Alert) -> Result<AlertUpsert, RepoError>;

    /// Get an alert by id
    fn get_alert(&self, id: AlertId) -> Result<Option<Alert>, RepoError>;

    /// Alerts matching the filters (order unspecified, `limit` ignored)
    fn query_alerts(&self, query: &AlertQuery) -> Result<Vec<Alert>, RepoError>;

    /// Apply a status change if the alert is still in `transition.from`,
    /// appending the transition record in the same operation.
    /// `Conflict` when the stored status differs.
    fn transition_alert(&self, transition: &AlertTransition) -> Result<Alert, RepoError>;

    /// Set the assignee
    fn assign_alert(
        &self,
        id: AlertId,
        assignee: &str,
        at: DateTime<Utc>,
    ) -> Result<Alert, RepoError>;

    /// Alerts created strictly before `before`
    fn alerts_created_before(&self, before: DateTime<Utc>) -> Result<Vec<Alert>, RepoError>;

    /// Transition records strictly before `before`
    fn transitions_before(&self, before: DateTime<Utc>)
        -> Result<Vec<AlertTransition>, RepoError>;

    /// Last evaluated band and score for a student
    fn watermark(&self, id: &StudentId) -> Result<Option<RiskWatermark>, RepoError>;

    /// Replace the watermark for a student
    fn save_watermark(&self, watermark: &RiskWatermark) -> Result<(), RepoError>;
}

/// Intervention aggregates with optimistic versioning
pub trait InterventionRepo: Send + Sync {
    /// Insert a new intervention
    fn insert_intervention(&self, intervention: &Intervention) -> Result<(), RepoError>;

    /// Get an intervention by id
    fn get_intervention(&self, id: InterventionId) -> Result<Option<Intervention>, RepoError>;

    /// Write `intervention` if the stored version equals `expected_version`.
    /// The stored version becomes `expected_version + 1`; the stored state is returned.
    /// `Conflict` on a version mismatch.
    fn update_intervention(
        &self,
        intervention: &Intervention,
        expected_version: u64,
    ) -> Result<Intervention, RepoError>;

    /// Like [`InterventionRepo::update_intervention`], also appending `entry`
    /// to the progress log in the same transaction
    fn record_progress(
        &self,
        intervention: &Intervention,
        entry: &ProgressEntry,
        expected_version: u64,
    ) -> Result<Intervention, RepoError>;

    /// Like [`InterventionRepo::update_intervention`], also appending `expense`
    /// to the spending ledger in the same transaction
    fn record_expense(
        &self,
        intervention: &Intervention,
        expense: &ExpenseEntry,
        expected_version: u64,
    ) -> Result<Intervention, RepoError>;

    /// Interventions listing the student
    fn interventions_for_student(&self, id: &StudentId) -> Result<Vec<Intervention>, RepoError>;

    /// All interventions, oldest first
    fn list_interventions(&self) -> Result<Vec<Intervention>, RepoError>;

    /// Progress log of one intervention strictly before `before` (all when `None`)
    fn progress_entries(
        &self,
        id: InterventionId,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProgressEntry>, RepoError>;

    /// Progress log of every intervention strictly before `before`
    fn all_progress_entries(&self, before: DateTime<Utc>)
        -> Result<Vec<ProgressEntry>, RepoError>;

    /// Spending ledger of every intervention strictly before `before`
    fn all_expenses(&self, before: DateTime<Utc>) -> Result<Vec<ExpenseEntry>, RepoError>;
}

/// One append-only spending record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseEntry {
    /// Intervention charged
    pub intervention_id: InterventionId,
    /// Amount spent
    pub amount: f64,
    /// When the expense was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Durable record of dispatch decisions
pub trait DispatchRepo: Send + Sync {
    /// Record an attempt unless its (alert, recipient, channel, slot) key exists.
    /// Returns `false` when the key was already recorded.
    fn record_attempt(&self, attempt: &ChannelAttempt) -> Result<bool, RepoError>;

    /// Scheduled attempts whose slot is at or before `now`
    fn due_attempts(&self, now: DateTime<Utc>) -> Result<Vec<ChannelAttempt>, RepoError>;

    /// Mark a scheduled attempt as released
    fn mark_released(&self, id: AttemptId, at: DateTime<Utc>) -> Result<(), RepoError>;

    /// All attempts recorded for an alert
    fn attempts_for_alert(&self, id: AlertId) -> Result<Vec<ChannelAttempt>, RepoError>;
}

/// Cache of computed cohort trend points
pub trait TrendRepo: Send + Sync {
    /// Cached point for the period starting at `period_start`
    fn cached_point(
        &self,
        period_start: DateTime<Utc>,
    ) -> Result<Option<CohortTrendPoint>, RepoError>;

    /// Store a point, replacing any cached point for the same period
    fn save_point(&self, point: &CohortTrendPoint) -> Result<(), RepoError>;

    /// Drop every cached point whose period a write at `at` could affect
    /// (period end after `at`). Returns the number removed.
    fn invalidate_points_after(&self, at: DateTime<Utc>) -> Result<usize, RepoError>;
}

/// Everything the engines need from storage
pub trait RiskStore: StudentRepo + AlertRepo + InterventionRepo + DispatchRepo + TrendRepo {}

impl<T> RiskStore for T where T: StudentRepo + AlertRepo + InterventionRepo + DispatchRepo + TrendRepo
{}
