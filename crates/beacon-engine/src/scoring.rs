//! Risk scoring engine
//!
//! Wraps the pure computation in `beacon_domain::scoring` with history
//! loading and a generation-tagged profile cache.

use crate::EngineError;
use beacon_domain::scoring::{compute_profile as compute, MitigationSource};
use beacon_domain::{RiskFactorSample, RiskProfile, RiskStore, ScoringConfig, StudentId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use moka::sync::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct CachedProfile {
    generation: u64,
    profile: RiskProfile,
}

/// Computes risk profiles from stored history
pub struct RiskScoringEngine {
    store: Arc<dyn RiskStore>,
    config: ScoringConfig,
    cache: Cache<StudentId, CachedProfile>,
    generations: DashMap<StudentId, u64>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RiskScoringEngine {
    /// Create an engine caching at most `max_profiles` profiles
    pub fn new(store: Arc<dyn RiskStore>, config: ScoringConfig, max_profiles: u64) -> Self {
        Self {
            store,
            config,
            cache: Cache::builder().max_capacity(max_profiles).build(),
            generations: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Scoring configuration in use
    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Current profile for a student
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] if the student is unknown or has no factor history
    pub fn compute_profile(&self, student_id: &StudentId) -> Result<RiskProfile, EngineError> {
        let generation = self.generation(student_id);

        if let Some(cached) = self.cache.get(student_id) {
            if cached.generation == generation {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(cached.profile);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let profile = self
            .profile_before(student_id, None)?
            .ok_or_else(|| no_history(student_id))?;

        // A write that landed while computing makes this profile stale
        if self.generation(student_id) == generation {
            self.cache.insert(
                student_id.clone(),
                CachedProfile {
                    generation,
                    profile: profile.clone(),
                },
            );
        }
        Ok(profile)
    }

    /// Profile from inputs recorded strictly before `before` (never cached)
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] if the student is unknown or had no
    /// factor history at that point
    pub fn compute_profile_before(
        &self,
        student_id: &StudentId,
        before: DateTime<Utc>,
    ) -> Result<RiskProfile, EngineError> {
        self.profile_before(student_id, Some(before))?
            .ok_or_else(|| no_history(student_id))
    }

    /// Like [`RiskScoringEngine::compute_profile_before`], with `None` for a
    /// known student that had no samples yet
    pub fn try_profile_before(
        &self,
        student_id: &StudentId,
        before: DateTime<Utc>,
    ) -> Result<Option<RiskProfile>, EngineError> {
        self.profile_before(student_id, Some(before))
    }

    /// Mark the student's history as changed; cached profiles become stale
    pub fn invalidate(&self, student_id: &StudentId) {
        *self.generations.entry(student_id.clone()).or_insert(0) += 1;
        self.cache.invalidate(student_id);
    }

    /// Cache (hits, misses)
    pub fn cache_stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    fn generation(&self, student_id: &StudentId) -> u64 {
        self.generations.get(student_id).map(|g| *g).unwrap_or(0)
    }

    fn profile_before(
        &self,
        student_id: &StudentId,
        before: Option<DateTime<Utc>>,
    ) -> Result<Option<RiskProfile>, EngineError> {
        if self.store.get_student(student_id)?.is_none() {
            return Err(EngineError::NotFound(format!("student {}", student_id)));
        }

        let (samples, sources) = self.history(student_id, before)?;
        let profile = compute(student_id, &samples, &sources, &self.config, before);

        if let Some(profile) = &profile {
            tracing::debug!(
                student = %student_id,
                score = profile.score,
                band = profile.band.as_str(),
                samples = samples.len(),
                "Computed risk profile"
            );
        }
        Ok(profile)
    }

    fn history(
        &self,
        student_id: &StudentId,
        before: Option<DateTime<Utc>>,
    ) -> Result<(Vec<RiskFactorSample>, Vec<MitigationSource>), EngineError> {
        let samples = self.store.samples_for(student_id, before)?;

        let mut sources = Vec::new();
        for intervention in self.store.interventions_for_student(student_id)? {
            let progress_log = self
                .store
                .progress_entries(intervention.id, before)?
                .into_iter()
                .map(|entry| (entry.recorded_at, entry.progress))
                .collect();
            sources.push(MitigationSource {
                intervention_id: intervention.id,
                progress_log,
                cancelled_at: intervention.cancelled_at,
            });
        }

        Ok((samples, sources))
    }
}

fn no_history(student_id: &StudentId) -> EngineError {
    EngineError::NotFound(format!("no factor history for student {}", student_id))
}
