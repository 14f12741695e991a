//! Cached cohort trend points

use crate::codec::to_millis;
use crate::{SqliteStore, StoreError};
use beacon_domain::traits::TrendRepo;
use beacon_domain::{CohortTrendPoint, RepoError};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl SqliteStore {
    fn load_point(
        &self,
        period_start: DateTime<Utc>,
    ) -> Result<Option<CohortTrendPoint>, StoreError> {
        let conn = self.conn()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM trend_points WHERE period_start = ?1",
                params![to_millis(period_start)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload
            .map(|p| serde_json::from_str::<CohortTrendPoint>(&p))
            .transpose()?)
    }

    fn store_point(&self, point: &CohortTrendPoint) -> Result<(), StoreError> {
        if point.period_end <= point.period_start {
            return Err(StoreError::InvalidData(format!(
                "trend period ends at {} before it starts at {}",
                point.period_end, point.period_start
            )));
        }
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO trend_points (period_start, period_end, payload) VALUES (?1, ?2, ?3)
             ON CONFLICT(period_start) DO UPDATE SET
             period_end = excluded.period_end, payload = excluded.payload",
            params![
                to_millis(point.period_start),
                to_millis(point.period_end),
                serde_json::to_string(point)?,
            ],
        )?;
        Ok(())
    }

    fn drop_points_after(&self, at: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM trend_points WHERE period_end > ?1",
            params![to_millis(at)],
        )?;
        if removed > 0 {
            tracing::debug!(removed, at = %at, "Invalidated cached trend points");
        }
        Ok(removed)
    }
}

impl TrendRepo for SqliteStore {
    fn cached_point(
        &self,
        period_start: DateTime<Utc>,
    ) -> Result<Option<CohortTrendPoint>, RepoError> {
        Ok(self.load_point(period_start)?)
    }

    fn save_point(&self, point: &CohortTrendPoint) -> Result<(), RepoError> {
        Ok(self.store_point(point)?)
    }

    fn invalidate_points_after(&self, at: DateTime<Utc>) -> Result<usize, RepoError> {
        Ok(self.drop_points_after(at)?)
    }
}
