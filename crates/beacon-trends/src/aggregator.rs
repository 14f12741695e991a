//! Cohort trend aggregation over durable history

use crate::TrendError;
use beacon_domain::{
    status_before, AlertStatus, BandCounts, CalendarPeriod, Clock, CohortTrendPoint, FactorKind,
    RiskStore,
};
use beacon_engine::{InterventionTracker, RiskScoringEngine};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Builds cohort trend points
///
/// A point uses only inputs recorded strictly before its period end, so a
/// closed period always snapshots to the same point. Closed periods are
/// cached in the store; the open period is always recomputed.
///
/// # Examples
///
/// ```no_run
/// use beacon_trends::TrendAggregator;
/// use tokio_util::sync::CancellationToken;
///
/// # fn demo(aggregator: &TrendAggregator) -> Result<(), beacon_trends::TrendError> {
/// # let (from, to) = (chrono::Utc::now(), chrono::Utc::now());
/// let points = aggregator.trends(from, to, &CancellationToken::new())?;
/// for point in points {
///     println!("{}: {} high-risk", point.period_start, point.bands.high);
/// }
/// # Ok(())
/// # }
/// ```
pub struct TrendAggregator {
    store: Arc<dyn RiskStore>,
    scoring: Arc<RiskScoringEngine>,
    interventions: Arc<InterventionTracker>,
    clock: Arc<dyn Clock>,
    period: CalendarPeriod,
}

impl TrendAggregator {
    /// Create an aggregator rolling up by `period`
    pub fn new(
        store: Arc<dyn RiskStore>,
        scoring: Arc<RiskScoringEngine>,
        interventions: Arc<InterventionTracker>,
        clock: Arc<dyn Clock>,
        period: CalendarPeriod,
    ) -> Self {
        Self {
            store,
            scoring,
            interventions,
            clock,
            period,
        }
    }

    /// Roll-up period
    pub fn period(&self) -> CalendarPeriod {
        self.period
    }

    /// Bounds of the most recently closed period
    pub fn last_closed_period(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let now = self.clock.now();
        (self.period.previous_start(now), self.period.start_of(now))
    }

    /// Cached point for the period starting at `period_start`
    pub fn cached_point(
        &self,
        period_start: DateTime<Utc>,
    ) -> Result<Option<CohortTrendPoint>, TrendError> {
        Ok(self.store.cached_point(period_start)?)
    }

    /// Compute the point for `[period_start, period_end)`
    ///
    /// The token is checked once per student. A cancelled snapshot returns
    /// [`TrendError::Cancelled`] and writes nothing. A closed period is
    /// written to the cache in one store operation after the whole point
    /// has been computed.
    pub fn snapshot(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<CohortTrendPoint, TrendError> {
        let students: Vec<_> = self
            .store
            .list_students()?
            .into_iter()
            .filter(|s| s.enrolled_before(period_end))
            .collect();

        let mut bands = BandCounts::default();
        let mut unscored = 0;
        let mut score_sum = 0.0;
        let mut attendance = Vec::new();

        for student in &students {
            if cancel.is_cancelled() {
                tracing::info!(period_start = %period_start, "Trend snapshot cancelled");
                return Err(TrendError::Cancelled);
            }

            match self.scoring.try_profile_before(&student.id, period_end)? {
                Some(profile) => {
                    bands.add(profile.band);
                    score_sum += profile.score;
                    if let Some(reading) = profile.factors.get(&FactorKind::Attendance) {
                        if !reading.imputed {
                            attendance.push(reading.value);
                        }
                    }
                }
                None => unscored += 1,
            }
        }

        let active_alerts = self.active_alerts_before(period_end)?;
        let intervention_success = self.interventions.cohort_effectiveness(period_end)?;

        if cancel.is_cancelled() {
            return Err(TrendError::Cancelled);
        }

        let scored = bands.total();
        let point = CohortTrendPoint {
            period_start,
            period_end,
            enrolled: students.len() as u64,
            bands,
            unscored,
            average_score: (scored > 0).then(|| round2(score_sum / scored as f64)),
            average_attendance: mean(&attendance),
            active_alerts,
            intervention_success,
        };

        if period_end <= self.clock.now() {
            self.store.save_point(&point)?;
            tracing::info!(
                period_start = %period_start,
                enrolled = point.enrolled,
                high = point.bands.high,
                active_alerts,
                "Trend point written"
            );
        }
        Ok(point)
    }

    /// One point per period overlapping `[from, to]`, ascending
    pub fn trends(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<CohortTrendPoint>, TrendError> {
        let mut points = Vec::new();
        for (start, end) in self.period.periods_between(from, to) {
            let point = match self.store.cached_point(start)? {
                Some(cached) if cached.period_end == end => cached,
                _ => self.snapshot(start, end, cancel)?,
            };
            points.push(point);
        }
        Ok(points)
    }

    fn active_alerts_before(&self, before: DateTime<Utc>) -> Result<u64, TrendError> {
        let alerts = self.store.alerts_created_before(before)?;
        let transitions = self.store.transitions_before(before)?;
        let active = alerts
            .iter()
            .filter(|a| status_before(a, &transitions, before) == Some(AlertStatus::Active))
            .count();
        Ok(active as u64)
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(round2(values.iter().sum::<f64>() / values.len() as f64))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
