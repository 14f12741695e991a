//! Dispatch attempt log

use crate::codec::{bytes_to_id, from_millis, id_to_bytes, parse_enum, to_millis};
use crate::{SqliteStore, StoreError};
use beacon_domain::traits::DispatchRepo;
use beacon_domain::{
    AlertId, AlertSeverity, AttemptId, AttemptStatus, Channel, ChannelAttempt, DeliveryIntent,
    RepoError,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

const ATTEMPT_COLUMNS: &str =
    "id, alert_id, recipient, channel, slot, severity, subject, body, status, recorded_at";

struct AttemptRow {
    id: Vec<u8>,
    alert_id: Vec<u8>,
    recipient: String,
    channel: String,
    slot: i64,
    severity: String,
    subject: String,
    body: String,
    status: String,
    recorded_at: i64,
}

impl AttemptRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            alert_id: row.get(1)?,
            recipient: row.get(2)?,
            channel: row.get(3)?,
            slot: row.get(4)?,
            severity: row.get(5)?,
            subject: row.get(6)?,
            body: row.get(7)?,
            status: row.get(8)?,
            recorded_at: row.get(9)?,
        })
    }

    fn decode(self) -> Result<ChannelAttempt, StoreError> {
        Ok(ChannelAttempt {
            intent: DeliveryIntent {
                attempt_id: AttemptId::from_value(bytes_to_id(&self.id)?),
                alert_id: AlertId::from_value(bytes_to_id(&self.alert_id)?),
                recipient: self.recipient,
                channel: parse_enum(&self.channel, "channel", Channel::parse)?,
                severity: parse_enum(&self.severity, "severity", AlertSeverity::parse)?,
                subject: self.subject,
                body: self.body,
                slot: from_millis(self.slot)?,
            },
            status: parse_enum(&self.status, "attempt status", AttemptStatus::parse)?,
            recorded_at: from_millis(self.recorded_at)?,
        })
    }
}

impl SqliteStore {
    fn insert_attempt(&self, attempt: &ChannelAttempt) -> Result<bool, StoreError> {
        let intent = &attempt.intent;
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO dispatch_attempts (id, alert_id, recipient, channel, slot, severity,
             subject, body, status, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(alert_id, recipient, channel, slot) DO NOTHING",
            params![
                id_to_bytes(intent.attempt_id.value()),
                id_to_bytes(intent.alert_id.value()),
                &intent.recipient,
                intent.channel.as_str(),
                to_millis(intent.slot),
                intent.severity.as_str(),
                &intent.subject,
                &intent.body,
                attempt.status.as_str(),
                to_millis(attempt.recorded_at),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn load_attempts(
        &self,
        filter: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ChannelAttempt>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM dispatch_attempts WHERE {} ORDER BY slot, recorded_at, id",
            ATTEMPT_COLUMNS, filter
        ))?;
        let rows = stmt
            .query_map(params, AttemptRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(AttemptRow::decode).collect()
    }
}

impl DispatchRepo for SqliteStore {
    fn record_attempt(&self, attempt: &ChannelAttempt) -> Result<bool, RepoError> {
        Ok(self.insert_attempt(attempt)?)
    }

    fn due_attempts(&self, now: DateTime<Utc>) -> Result<Vec<ChannelAttempt>, RepoError> {
        Ok(self.load_attempts(
            "status = 'scheduled' AND slot <= ?1",
            params![to_millis(now)],
        )?)
    }

    fn mark_released(&self, id: AttemptId, at: DateTime<Utc>) -> Result<(), RepoError> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE dispatch_attempts SET status = 'released', recorded_at = ?2
                 WHERE id = ?1 AND status = 'scheduled'",
                params![id_to_bytes(id.value()), to_millis(at)],
            )
            .map_err(StoreError::from)?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("scheduled attempt {}", id)).into());
        }
        Ok(())
    }

    fn attempts_for_alert(&self, id: AlertId) -> Result<Vec<ChannelAttempt>, RepoError> {
        Ok(self.load_attempts("alert_id = ?1", params![id_to_bytes(id.value())])?)
    }
}
