//! Alert manager
//!
//! Evaluates creation rules against new samples and profiles, deduplicates
//! through the store's atomic upsert, and drives the alert lifecycle.

pub mod rules;

use crate::config::AlertRules;
use crate::{stamp, EngineError};
use beacon_domain::ordering::sort_alerts;
use beacon_domain::{
    Alert, AlertDetails, AlertId, AlertQuery, AlertSeverity, AlertStatus, AlertTransition,
    AlertType, AlertUpsert, Clock, FactorKind, RiskFactorSample, RiskProfile, RiskStore,
    RiskWatermark,
};
use chrono::{DateTime, Utc};
use rules::Firing;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Creates, deduplicates and transitions alerts
pub struct AlertManager {
    store: Arc<dyn RiskStore>,
    rules: AlertRules,
    clock: Arc<dyn Clock>,
}

impl AlertManager {
    /// Create a manager with the given rules
    pub fn new(store: Arc<dyn RiskStore>, rules: AlertRules, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            rules,
            clock,
        }
    }

    /// Rules in use
    pub fn rules(&self) -> &AlertRules {
        &self.rules
    }

    /// Run every creation rule for a freshly computed profile
    ///
    /// `new_samples` are the samples that triggered the evaluation. The
    /// band watermark is updated whether or not anything fired. Callers must
    /// serialize evaluations per student.
    pub fn evaluate(
        &self,
        profile: &RiskProfile,
        new_samples: &[RiskFactorSample],
    ) -> Result<Vec<AlertUpsert>, EngineError> {
        let student_id = &profile.student_id;
        let now = stamp(self.clock.as_ref());

        let mut firings = Vec::new();
        if !new_samples.is_empty() {
            let history = self.store.samples_for(student_id, None)?;
            for sample in new_samples {
                firings.extend(rules::single_factor(sample, &history, &self.rules));
            }
        }

        let watermark = self.store.watermark(student_id)?;
        if let Some(firing) = rules::band_escalation(profile, watermark.as_ref(), &self.rules) {
            firings.push(firing);
        }
        self.store.save_watermark(&RiskWatermark {
            student_id: student_id.clone(),
            band: profile.band,
            score: profile.score,
            evaluated_at: now,
        })?;

        let snapshot = profile.factor_values();
        let mut results = Vec::with_capacity(firings.len());
        for firing in firings {
            let alert = raise(Some(profile), firing, snapshot.clone(), now);
            let outcome = self.store.upsert_active_alert(&alert)?;
            log_upsert(&outcome);
            results.push(outcome);
        }

        tracing::debug!(
            student = %student_id,
            band = profile.band.as_str(),
            score = profile.score,
            fired = results.len(),
            "Evaluated alert rules"
        );
        Ok(results)
    }

    /// Raise (or refresh) an alert not tied to a student
    pub fn raise_system_alert(
        &self,
        message: &str,
        source: &str,
        severity: AlertSeverity,
    ) -> Result<AlertUpsert, EngineError> {
        if message.trim().is_empty() {
            return Err(EngineError::InvalidValue(
                "system alert message cannot be empty".to_string(),
            ));
        }

        let firing = Firing {
            alert_type: AlertType::System,
            severity,
            message: message.to_string(),
            details: AlertDetails::System {
                source: source.to_string(),
            },
        };
        let alert = raise(None, firing, BTreeMap::new(), stamp(self.clock.as_ref()));
        let outcome = self.store.upsert_active_alert(&alert)?;
        log_upsert(&outcome);
        Ok(outcome)
    }

    /// Get an alert
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] if the alert does not exist
    pub fn get(&self, id: AlertId) -> Result<Alert, EngineError> {
        self.store
            .get_alert(id)?
            .ok_or_else(|| EngineError::NotFound(format!("alert {}", id)))
    }

    /// Alerts matching `query`, severity descending then newest first
    pub fn query(&self, query: &AlertQuery) -> Result<Vec<Alert>, EngineError> {
        let mut alerts = self.store.query_alerts(query)?;
        sort_alerts(&mut alerts);
        if let Some(limit) = query.limit {
            alerts.truncate(limit);
        }
        Ok(alerts)
    }

    /// Move an alert to another lifecycle status
    ///
    /// # Errors
    /// - [`EngineError::InvalidTransition`] if the lifecycle forbids the move
    /// - [`EngineError::ConcurrentModification`] if another writer changed the
    ///   status between the read and the write
    pub fn transition(
        &self,
        id: AlertId,
        to: AlertStatus,
        actor: Option<&str>,
    ) -> Result<Alert, EngineError> {
        let current = self.get(id)?;
        if let Err(e) = current.status.transition(to) {
            tracing::warn!(
                alert = %id,
                from = current.status.as_str(),
                to = to.as_str(),
                "Rejected alert transition"
            );
            return Err(e.into());
        }

        let transition = AlertTransition {
            alert_id: id,
            from: current.status,
            to,
            at: stamp(self.clock.as_ref()),
            actor: actor.map(str::to_string),
        };
        let updated = self.store.transition_alert(&transition)?;

        tracing::info!(
            alert = %id,
            from = transition.from.as_str(),
            to = to.as_str(),
            "Alert transitioned"
        );
        Ok(updated)
    }

    /// Assign an alert to a staff member
    pub fn assign(&self, id: AlertId, assignee: &str) -> Result<Alert, EngineError> {
        let assignee = assignee.trim();
        if assignee.is_empty() {
            return Err(EngineError::InvalidValue(
                "assignee cannot be empty".to_string(),
            ));
        }

        let alert = self
            .store
            .assign_alert(id, assignee, stamp(self.clock.as_ref()))?;
        tracing::info!(alert = %id, assignee, "Alert assigned");
        Ok(alert)
    }
}

fn raise(
    profile: Option<&RiskProfile>,
    firing: Firing,
    snapshot: BTreeMap<FactorKind, f64>,
    at: DateTime<Utc>,
) -> Alert {
    Alert::raise(
        profile.map(|p| p.student_id.clone()),
        firing.alert_type,
        firing.severity,
        firing.message,
        firing.details,
        snapshot,
        at,
    )
}

fn log_upsert(outcome: &AlertUpsert) {
    match outcome {
        AlertUpsert::Created(alert) => tracing::info!(
            alert = %alert.id,
            subject = alert.subject_key(),
            alert_type = alert.alert_type.as_str(),
            severity = alert.severity.as_str(),
            "Alert created"
        ),
        AlertUpsert::Refreshed(alert) => tracing::debug!(
            alert = %alert.id,
            subject = alert.subject_key(),
            alert_type = alert.alert_type.as_str(),
            severity = alert.severity.as_str(),
            "Active alert refreshed"
        ),
    }
}
