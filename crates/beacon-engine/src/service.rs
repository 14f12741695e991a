//! Risk service facade
//!
//! Wires the engines together over one store and clock. Sample writes and
//! alert evaluation for a student run under that student's lock; reads
//! never take it.

use crate::alerts::AlertManager;
use crate::config::EngineConfig;
use crate::interventions::InterventionTracker;
use crate::locks::StudentLocks;
use crate::notify::{DeliveryQueue, NotificationDispatcher};
use crate::scoring::RiskScoringEngine;
use crate::{stamp, truncate_millis, EngineError};
use beacon_domain::{
    Alert, AlertId, AlertQuery, AlertSeverity, AlertStatus, AlertUpsert, ChannelAttempt, Clock,
    Effectiveness, FactorKind, Intervention, InterventionId, InterventionStatus, NewIntervention,
    NotificationPreference, OutcomeDelta, RiskFactorSample, RiskProfile, RiskStore, Student,
    StudentId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One factor observation to record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleInput {
    /// Factor observed
    pub kind: FactorKind,
    /// Standing value in [0, 100]
    pub value: f64,
    /// When the observation was made
    pub observed_at: DateTime<Utc>,
}

/// Result of recording samples
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleOutcome {
    /// Samples as stored
    pub samples: Vec<RiskFactorSample>,
    /// Profile after the write
    pub profile: RiskProfile,
    /// Alerts created or refreshed by the write
    pub alerts: Vec<Alert>,
    /// Notification attempts for those alerts
    pub attempts: Vec<ChannelAttempt>,
}

/// Student risk operations over one store
pub struct RiskService {
    store: Arc<dyn RiskStore>,
    clock: Arc<dyn Clock>,
    scoring: Arc<RiskScoringEngine>,
    alerts: AlertManager,
    interventions: Arc<InterventionTracker>,
    dispatcher: NotificationDispatcher,
    preferences: Vec<NotificationPreference>,
    locks: StudentLocks,
}

impl RiskService {
    /// Build the engines from configuration
    pub fn new(
        store: Arc<dyn RiskStore>,
        config: EngineConfig,
        preferences: Vec<NotificationPreference>,
        queue: DeliveryQueue,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let scoring = Arc::new(RiskScoringEngine::new(
            Arc::clone(&store),
            config.scoring,
            config.cache.max_profiles,
        ));
        let alerts = AlertManager::new(Arc::clone(&store), config.alerts, Arc::clone(&clock));
        let interventions = Arc::new(InterventionTracker::new(
            Arc::clone(&store),
            Arc::clone(&scoring),
            Arc::clone(&clock),
        ));
        let dispatcher = NotificationDispatcher::new(Arc::clone(&store), queue, Arc::clone(&clock));

        Self {
            store,
            clock,
            scoring,
            alerts,
            interventions,
            dispatcher,
            preferences,
            locks: StudentLocks::new(),
        }
    }

    // ---- students ----

    /// Enroll a student (`enrolled_at` defaults to now)
    ///
    /// # Errors
    /// - [`EngineError::InvalidValue`] for a grade level above 12
    /// - [`EngineError::ConcurrentModification`] if the id is already enrolled
    pub fn enroll_student(
        &self,
        id: StudentId,
        grade_level: u8,
        enrolled_at: Option<DateTime<Utc>>,
    ) -> Result<Student, EngineError> {
        let enrolled_at = enrolled_at
            .map(truncate_millis)
            .unwrap_or_else(|| stamp(self.clock.as_ref()));
        let student = Student::enroll(id, grade_level, enrolled_at)?;

        self.locks.with(&student.id, || -> Result<(), EngineError> {
            self.store.insert_student(&student)?;
            self.invalidate_trends(enrolled_at)
        })?;

        tracing::info!(student = %student.id, grade_level, "Student enrolled");
        Ok(student)
    }

    /// Get a student
    pub fn get_student(&self, id: &StudentId) -> Result<Student, EngineError> {
        self.store
            .get_student(id)?
            .ok_or_else(|| EngineError::NotFound(format!("student {}", id)))
    }

    /// All students ordered by id
    pub fn list_students(&self) -> Result<Vec<Student>, EngineError> {
        Ok(self.store.list_students()?)
    }

    /// Soft-archive a student (idempotent); history is kept
    pub fn archive_student(&self, id: &StudentId) -> Result<Student, EngineError> {
        self.locks.with(id, || -> Result<Student, EngineError> {
            let mut student = self.get_student(id)?;
            if student.archived_at.is_some() {
                return Ok(student);
            }

            let now = stamp(self.clock.as_ref());
            student.archive(now);
            self.store.update_student(&student)?;
            self.invalidate_trends(now)?;

            tracing::info!(student = %id, "Student archived");
            Ok(student)
        })
    }

    // ---- samples and profiles ----

    /// Record one factor observation
    pub fn record_sample(
        &self,
        id: &StudentId,
        kind: FactorKind,
        value: f64,
        observed_at: DateTime<Utc>,
    ) -> Result<SampleOutcome, EngineError> {
        self.record_samples(
            id,
            vec![SampleInput {
                kind,
                value,
                observed_at,
            }],
        )
    }

    /// Record a batch of observations for one student
    ///
    /// Every value is validated before anything is written and the batch is
    /// stored atomically. The profile is recomputed once, alert rules run for each new sample, and created or
    /// refreshed alerts are dispatched to the configured recipients.
    ///
    /// # Errors
    /// - [`EngineError::NotFound`] if the student does not exist
    /// - [`EngineError::InvalidValue`] if any value is outside [0, 100]
    pub fn record_samples(
        &self,
        id: &StudentId,
        inputs: Vec<SampleInput>,
    ) -> Result<SampleOutcome, EngineError> {
        if inputs.is_empty() {
            return Err(EngineError::InvalidValue(
                "at least one sample is required".to_string(),
            ));
        }

        let samples = inputs
            .into_iter()
            .map(|input| {
                RiskFactorSample::new(
                    id.clone(),
                    input.kind,
                    input.value,
                    truncate_millis(input.observed_at),
                )
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                tracing::warn!(student = %id, error = %e, "Rejected factor sample");
                EngineError::from(e)
            })?;

        self.locks.with(id, || -> Result<SampleOutcome, EngineError> {
            self.get_student(id)?;

            self.store.append_samples(&samples)?;
            self.scoring.invalidate(id);
            if let Some(earliest) = samples.iter().map(|s| s.observed_at).min() {
                self.invalidate_trends(earliest)?;
            }

            let profile = self.scoring.compute_profile(id)?;
            let upserts = self.alerts.evaluate(&profile, &samples)?;
            let (alerts, attempts) = self.dispatch_all(upserts)?;

            tracing::info!(
                student = %id,
                samples = samples.len(),
                score = profile.score,
                band = profile.band.as_str(),
                alerts = alerts.len(),
                "Factor samples recorded"
            );

            Ok(SampleOutcome {
                samples,
                profile,
                alerts,
                attempts,
            })
        })
    }

    /// Current risk profile
    pub fn profile(&self, id: &StudentId) -> Result<RiskProfile, EngineError> {
        self.scoring.compute_profile(id)
    }

    // ---- alerts ----

    /// Get an alert
    pub fn get_alert(&self, id: AlertId) -> Result<Alert, EngineError> {
        self.alerts.get(id)
    }

    /// Alerts matching `query`, severity descending then newest first
    pub fn query_alerts(&self, query: &AlertQuery) -> Result<Vec<Alert>, EngineError> {
        self.alerts.query(query)
    }

    /// Move an alert through its lifecycle
    pub fn transition_alert(
        &self,
        id: AlertId,
        to: AlertStatus,
        actor: Option<&str>,
    ) -> Result<Alert, EngineError> {
        let alert = self.alerts.transition(id, to, actor)?;
        self.invalidate_trends(alert.updated_at)?;
        Ok(alert)
    }

    /// Assign an alert
    pub fn assign_alert(&self, id: AlertId, assignee: &str) -> Result<Alert, EngineError> {
        self.alerts.assign(id, assignee)
    }

    /// Raise a system-level alert and dispatch it
    pub fn raise_system_alert(
        &self,
        message: &str,
        source: &str,
        severity: AlertSeverity,
    ) -> Result<Alert, EngineError> {
        let upsert = self.alerts.raise_system_alert(message, source, severity)?;
        self.invalidate_trends(upsert.alert().updated_at)?;
        let (mut alerts, _) = self.dispatch_all(vec![upsert])?;
        alerts
            .pop()
            .ok_or_else(|| EngineError::Store("system alert was not stored".to_string()))
    }

    // ---- interventions ----

    /// Plan an intervention
    pub fn create_intervention(
        &self,
        request: NewIntervention,
    ) -> Result<Intervention, EngineError> {
        self.interventions.create(request)
    }

    /// Get an intervention
    pub fn get_intervention(&self, id: InterventionId) -> Result<Intervention, EngineError> {
        self.interventions.get(id)
    }

    /// Record intervention progress
    ///
    /// Mitigation moves with progress, so every listed student's alert rules
    /// are evaluated again against the new profile.
    pub fn record_progress(
        &self,
        id: InterventionId,
        progress: f64,
        outcome: OutcomeDelta,
        expected_version: u64,
    ) -> Result<Intervention, EngineError> {
        let stored = self
            .interventions
            .record_progress(id, progress, outcome, expected_version)?;
        self.invalidate_trends(stored.updated_at)?;
        self.reevaluate_students(&stored)?;
        Ok(stored)
    }

    /// Record intervention spending
    pub fn record_expense(
        &self,
        id: InterventionId,
        amount: f64,
        expected_version: u64,
    ) -> Result<Intervention, EngineError> {
        let stored = self
            .interventions
            .record_expense(id, amount, expected_version)?;
        self.invalidate_trends(stored.updated_at)?;
        Ok(stored)
    }

    /// Raise an intervention's budget
    pub fn increase_budget(
        &self,
        id: InterventionId,
        budget: f64,
        expected_version: u64,
    ) -> Result<Intervention, EngineError> {
        self.interventions.increase_budget(id, budget, expected_version)
    }

    /// Move an intervention through its lifecycle
    ///
    /// Starting, completing or cancelling changes mitigation, so listed
    /// students are evaluated again as in [`Self::record_progress`].
    pub fn transition_intervention(
        &self,
        id: InterventionId,
        to: InterventionStatus,
        expected_version: u64,
    ) -> Result<Intervention, EngineError> {
        let stored = self.interventions.transition(id, to, expected_version)?;
        self.invalidate_trends(stored.updated_at)?;
        self.reevaluate_students(&stored)?;
        Ok(stored)
    }

    /// Effectiveness of one intervention
    pub fn effectiveness(&self, id: InterventionId) -> Result<Effectiveness, EngineError> {
        self.interventions.effectiveness(id)
    }

    // ---- accessors ----

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn RiskStore> {
        &self.store
    }

    /// Clock used for write timestamps
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Scoring engine
    pub fn scoring(&self) -> &Arc<RiskScoringEngine> {
        &self.scoring
    }

    /// Alert manager
    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    /// Intervention tracker
    pub fn interventions(&self) -> &Arc<InterventionTracker> {
        &self.interventions
    }

    /// Notification dispatcher
    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Configured notification recipients
    pub fn preferences(&self) -> &[NotificationPreference] {
        &self.preferences
    }

    fn dispatch_all(
        &self,
        upserts: Vec<AlertUpsert>,
    ) -> Result<(Vec<Alert>, Vec<ChannelAttempt>), EngineError> {
        let mut alerts = Vec::with_capacity(upserts.len());
        let mut attempts = Vec::new();
        for upsert in upserts {
            let alert = upsert.into_alert();
            attempts.extend(self.dispatcher.dispatch(&alert, &self.preferences)?);
            alerts.push(alert);
        }
        Ok((alerts, attempts))
    }

    /// Recompute each listed student's profile and run the band rule on it
    fn reevaluate_students(&self, intervention: &Intervention) -> Result<(), EngineError> {
        for student_id in &intervention.student_ids {
            self.locks.with(student_id, || -> Result<(), EngineError> {
                let profile = match self.scoring.compute_profile(student_id) {
                    Ok(profile) => profile,
                    // no samples yet, nothing to evaluate
                    Err(EngineError::NotFound(_)) => return Ok(()),
                    Err(e) => return Err(e),
                };
                let upserts = self.alerts.evaluate(&profile, &[])?;
                let (alerts, attempts) = self.dispatch_all(upserts)?;
                if !alerts.is_empty() {
                    tracing::info!(
                        student = %student_id,
                        intervention = %intervention.id,
                        band = profile.band.as_str(),
                        alerts = alerts.len(),
                        attempts = attempts.len(),
                        "Alerts raised after intervention change"
                    );
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    fn invalidate_trends(&self, at: DateTime<Utc>) -> Result<(), EngineError> {
        let removed = self.store.invalidate_points_after(at)?;
        if removed > 0 {
            tracing::debug!(removed, at = %at, "Invalidated cached trend points");
        }
        Ok(())
    }
}
