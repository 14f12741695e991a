//! Intervention tracker
//!
//! Every write names the version it was based on. The version is checked
//! here for a clear error and again by the store's compare-and-set, so a
//! racing writer still loses with [`EngineError::ConcurrentModification`].

use crate::scoring::RiskScoringEngine;
use crate::{stamp, EngineError};
use beacon_domain::{
    Clock, Effectiveness, ExpenseEntry, Intervention, InterventionId, InterventionStatus,
    NewIntervention, OutcomeDelta, OutcomeTally, RiskStore,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Lifecycle, progress log and budget of interventions
pub struct InterventionTracker {
    store: Arc<dyn RiskStore>,
    scoring: Arc<RiskScoringEngine>,
    clock: Arc<dyn Clock>,
}

impl InterventionTracker {
    /// Create a tracker; profile caches of affected students are invalidated
    /// through `scoring`
    pub fn new(
        store: Arc<dyn RiskStore>,
        scoring: Arc<RiskScoringEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            scoring,
            clock,
        }
    }

    /// Plan a new intervention (status planning, version 1)
    ///
    /// # Errors
    /// - [`EngineError::InvalidValue`] for invalid input
    /// - [`EngineError::NotFound`] if a listed student does not exist
    pub fn create(&self, request: NewIntervention) -> Result<Intervention, EngineError> {
        for student_id in &request.student_ids {
            if self.store.get_student(student_id)?.is_none() {
                return Err(EngineError::NotFound(format!("student {}", student_id)));
            }
        }

        let intervention = Intervention::plan(request, stamp(self.clock.as_ref()))?;
        self.store.insert_intervention(&intervention)?;

        tracing::info!(
            intervention = %intervention.id,
            kind = intervention.kind.as_str(),
            students = intervention.student_ids.len(),
            budget = intervention.budget,
            "Intervention planned"
        );
        Ok(intervention)
    }

    /// Get an intervention
    pub fn get(&self, id: InterventionId) -> Result<Intervention, EngineError> {
        self.store
            .get_intervention(id)?
            .ok_or_else(|| EngineError::NotFound(format!("intervention {}", id)))
    }

    /// All interventions, oldest first
    pub fn list(&self) -> Result<Vec<Intervention>, EngineError> {
        Ok(self.store.list_interventions()?)
    }

    /// Record progress and an outcome change
    ///
    /// Progress is clamped to [0, 100]; negative outcome deltas are corrections.
    pub fn record_progress(
        &self,
        id: InterventionId,
        progress: f64,
        outcome: OutcomeDelta,
        expected_version: u64,
    ) -> Result<Intervention, EngineError> {
        let current = self.load_version(id, expected_version)?;
        let (next, entry) = current
            .record_progress(progress, outcome, stamp(self.clock.as_ref()))
            .map_err(|e| rejected(id, "progress", e.into()))?;

        let stored = self.store.record_progress(&next, &entry, expected_version)?;
        self.touch_students(&stored);

        tracing::info!(
            intervention = %id,
            progress = stored.progress,
            improved = stored.outcomes.improved,
            no_change = stored.outcomes.no_change,
            declined = stored.outcomes.declined,
            version = stored.version,
            "Intervention progress recorded"
        );
        Ok(stored)
    }

    /// Record spending
    ///
    /// # Errors
    /// Returns [`EngineError::BudgetExceeded`] if the budget would be exceeded;
    /// nothing is written
    pub fn record_expense(
        &self,
        id: InterventionId,
        amount: f64,
        expected_version: u64,
    ) -> Result<Intervention, EngineError> {
        let current = self.load_version(id, expected_version)?;
        let at = stamp(self.clock.as_ref());
        let next = current
            .record_expense(amount, at)
            .map_err(|e| rejected(id, "expense", e.into()))?;

        let expense = ExpenseEntry {
            intervention_id: id,
            amount,
            recorded_at: at,
        };
        let stored = self.store.record_expense(&next, &expense, expected_version)?;

        tracing::info!(
            intervention = %id,
            amount,
            spent = stored.spent,
            budget = stored.budget,
            "Intervention expense recorded"
        );
        Ok(stored)
    }

    /// Raise the approved budget
    pub fn increase_budget(
        &self,
        id: InterventionId,
        budget: f64,
        expected_version: u64,
    ) -> Result<Intervention, EngineError> {
        let current = self.load_version(id, expected_version)?;
        let next = current
            .increase_budget(budget, stamp(self.clock.as_ref()))
            .map_err(|e| rejected(id, "budget increase", e.into()))?;

        let stored = self.store.update_intervention(&next, expected_version)?;
        tracing::info!(
            intervention = %id,
            from = current.budget,
            to = stored.budget,
            "Intervention budget increased"
        );
        Ok(stored)
    }

    /// Move an intervention to another lifecycle status
    pub fn transition(
        &self,
        id: InterventionId,
        to: InterventionStatus,
        expected_version: u64,
    ) -> Result<Intervention, EngineError> {
        let current = self.load_version(id, expected_version)?;
        let next = current
            .transition(to, stamp(self.clock.as_ref()))
            .map_err(|e| rejected(id, "transition", e.into()))?;

        let stored = self.store.update_intervention(&next, expected_version)?;
        self.touch_students(&stored);

        tracing::info!(
            intervention = %id,
            from = current.status.as_str(),
            to = stored.status.as_str(),
            "Intervention transitioned"
        );
        Ok(stored)
    }

    /// Effectiveness of one intervention
    pub fn effectiveness(&self, id: InterventionId) -> Result<Effectiveness, EngineError> {
        Ok(self.get(id)?.effectiveness())
    }

    /// Effectiveness across every intervention, from logs recorded strictly
    /// before `before`
    pub fn cohort_effectiveness(&self, before: DateTime<Utc>) -> Result<Effectiveness, EngineError> {
        let mut tally = OutcomeTally::default();
        for entry in self.store.all_progress_entries(before)? {
            tally = tally.apply(&entry.outcome)?;
        }

        let spent: f64 = self
            .store
            .all_expenses(before)?
            .iter()
            .map(|e| e.amount)
            .sum();

        Ok(Effectiveness::from_tally(&tally, spent))
    }

    fn load_version(
        &self,
        id: InterventionId,
        expected_version: u64,
    ) -> Result<Intervention, EngineError> {
        let current = self.get(id)?;
        if current.version != expected_version {
            tracing::warn!(
                intervention = %id,
                expected = expected_version,
                actual = current.version,
                "Stale intervention write rejected"
            );
            return Err(EngineError::ConcurrentModification(format!(
                "intervention {} is at version {}, not {}",
                id, current.version, expected_version
            )));
        }
        Ok(current)
    }

    // Progress and status feed mitigation, so listed students' profiles change
    fn touch_students(&self, intervention: &Intervention) {
        for student_id in &intervention.student_ids {
            self.scoring.invalidate(student_id);
        }
    }
}

fn rejected(id: InterventionId, what: &str, error: EngineError) -> EngineError {
    tracing::warn!(intervention = %id, error = %error, "Rejected intervention {}", what);
    error
}
