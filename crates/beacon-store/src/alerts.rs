//! Alerts, transition log and evaluation watermarks

use crate::codec::{bytes_to_id, from_millis, id_to_bytes, parse_enum, to_millis};
use crate::{SqliteStore, StoreError};
use beacon_domain::traits::{AlertQuery, AlertRepo, AlertUpsert};
use beacon_domain::{
    Alert, AlertId, AlertSeverity, AlertStatus, AlertTransition, AlertType, RepoError, RiskBand,
    RiskWatermark, StudentId,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

const ALERT_COLUMNS: &str = "id, student_id, alert_type, severity, status, created_at, \
                             updated_at, assigned_to, message, details, factor_snapshot";

struct AlertRow {
    id: Vec<u8>,
    student_id: Option<String>,
    alert_type: String,
    severity: String,
    status: String,
    created_at: i64,
    updated_at: i64,
    assigned_to: Option<String>,
    message: String,
    details: String,
    factor_snapshot: String,
}

impl AlertRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            student_id: row.get(1)?,
            alert_type: row.get(2)?,
            severity: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            assigned_to: row.get(7)?,
            message: row.get(8)?,
            details: row.get(9)?,
            factor_snapshot: row.get(10)?,
        })
    }

    fn decode(self) -> Result<Alert, StoreError> {
        Ok(Alert {
            id: AlertId::from_value(bytes_to_id(&self.id)?),
            student_id: self
                .student_id
                .map(StudentId::new)
                .transpose()
                .map_err(StoreError::InvalidData)?,
            alert_type: parse_enum(&self.alert_type, "alert type", AlertType::parse)?,
            severity: parse_enum(&self.severity, "severity", AlertSeverity::parse)?,
            status: parse_enum(&self.status, "alert status", AlertStatus::parse)?,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
            assigned_to: self.assigned_to,
            message: self.message,
            details: serde_json::from_str(&self.details)?,
            factor_snapshot: serde_json::from_str(&self.factor_snapshot)?,
        })
    }
}

fn load_alert(conn: &Connection, id: AlertId) -> Result<Option<Alert>, StoreError> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM alerts WHERE id = ?1", ALERT_COLUMNS),
            params![id_to_bytes(id.value())],
            AlertRow::read,
        )
        .optional()?;
    row.map(AlertRow::decode).transpose()
}

fn load_many(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Alert>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, AlertRow::read)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(AlertRow::decode).collect()
}

impl SqliteStore {
    fn upsert_alert_row(&self, alert: &Alert) -> Result<AlertUpsert, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {} FROM alerts
                     WHERE subject = ?1 AND alert_type = ?2 AND dedup_key = ?3
                     AND status = 'active'",
                    ALERT_COLUMNS
                ),
                params![
                    alert.subject_key(),
                    alert.alert_type.as_str(),
                    alert.dedup_key()
                ],
                AlertRow::read,
            )
            .optional()?;

        let outcome = match existing {
            Some(row) => {
                let mut current = row.decode()?;
                current.refresh_from(alert);
                tx.execute(
                    "UPDATE alerts SET factor_snapshot = ?2, updated_at = ?3 WHERE id = ?1",
                    params![
                        id_to_bytes(current.id.value()),
                        serde_json::to_string(&current.factor_snapshot)?,
                        to_millis(current.updated_at),
                    ],
                )?;
                AlertUpsert::Refreshed(current)
            }
            None => {
                tx.execute(
                    "INSERT INTO alerts (id, student_id, subject, alert_type, dedup_key, severity,
                     status, created_at, updated_at, assigned_to, message, details,
                     factor_snapshot)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        id_to_bytes(alert.id.value()),
                        alert.student_id.as_ref().map(StudentId::as_str),
                        alert.subject_key(),
                        alert.alert_type.as_str(),
                        alert.dedup_key(),
                        alert.severity.as_str(),
                        alert.status.as_str(),
                        to_millis(alert.created_at),
                        to_millis(alert.updated_at),
                        alert.assigned_to.as_deref(),
                        &alert.message,
                        serde_json::to_string(&alert.details)?,
                        serde_json::to_string(&alert.factor_snapshot)?,
                    ],
                )?;
                AlertUpsert::Created(alert.clone())
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn query_alert_rows(&self, query: &AlertQuery) -> Result<Vec<Alert>, StoreError> {
        let mut sql = format!("SELECT {} FROM alerts WHERE 1=1", ALERT_COLUMNS);
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(severity) = query.severity {
            sql.push_str(" AND severity = ?");
            params.push(Box::new(severity.as_str()));
        }

        if let Some(alert_type) = query.alert_type {
            sql.push_str(" AND alert_type = ?");
            params.push(Box::new(alert_type.as_str()));
        }

        if let Some(student_id) = &query.student_id {
            sql.push_str(" AND student_id = ?");
            params.push(Box::new(student_id.as_str().to_string()));
        }

        let conn = self.conn()?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        load_many(&conn, &sql, &param_refs)
    }

    fn transition_alert_row(&self, transition: &AlertTransition) -> Result<Alert, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id_bytes = id_to_bytes(transition.alert_id.value());

        let updated = tx.execute(
            "UPDATE alerts SET status = ?3, updated_at = MAX(updated_at, ?4)
             WHERE id = ?1 AND status = ?2",
            params![
                &id_bytes,
                transition.from.as_str(),
                transition.to.as_str(),
                to_millis(transition.at),
            ],
        )?;

        if updated == 0 {
            return match load_alert(&tx, transition.alert_id)? {
                None => Err(StoreError::NotFound(format!("alert {}", transition.alert_id))),
                Some(current) => Err(StoreError::ConcurrentModification(format!(
                    "alert {} is {}, expected {}",
                    transition.alert_id,
                    current.status.as_str(),
                    transition.from.as_str()
                ))),
            };
        }

        tx.execute(
            "INSERT INTO alert_transitions (alert_id, from_status, to_status, at, actor)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &id_bytes,
                transition.from.as_str(),
                transition.to.as_str(),
                to_millis(transition.at),
                transition.actor.as_deref(),
            ],
        )?;

        let alert = load_alert(&tx, transition.alert_id)?
            .ok_or_else(|| StoreError::NotFound(format!("alert {}", transition.alert_id)))?;
        tx.commit()?;
        Ok(alert)
    }

    fn assign_alert_row(
        &self,
        id: AlertId,
        assignee: &str,
        at: DateTime<Utc>,
    ) -> Result<Alert, StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE alerts SET assigned_to = ?2, updated_at = MAX(updated_at, ?3) WHERE id = ?1",
            params![id_to_bytes(id.value()), assignee, to_millis(at)],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("alert {}", id)));
        }
        load_alert(&conn, id)?.ok_or_else(|| StoreError::NotFound(format!("alert {}", id)))
    }

    fn load_transitions_before(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<AlertTransition>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT alert_id, from_status, to_status, at, actor FROM alert_transitions
             WHERE at < ?1 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![to_millis(before)], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, from, to, at, actor)| {
                Ok(AlertTransition {
                    alert_id: AlertId::from_value(bytes_to_id(&id)?),
                    from: parse_enum(&from, "alert status", AlertStatus::parse)?,
                    to: parse_enum(&to, "alert status", AlertStatus::parse)?,
                    at: from_millis(at)?,
                    actor,
                })
            })
            .collect()
    }

    fn load_watermark(&self, id: &StudentId) -> Result<Option<RiskWatermark>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT band, score, evaluated_at FROM risk_watermarks WHERE student_id = ?1",
                params![id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(band, score, evaluated_at)| {
            Ok(RiskWatermark {
                student_id: id.clone(),
                band: parse_enum(&band, "risk band", RiskBand::parse)?,
                score,
                evaluated_at: from_millis(evaluated_at)?,
            })
        })
        .transpose()
    }

    fn store_watermark(&self, watermark: &RiskWatermark) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO risk_watermarks (student_id, band, score, evaluated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(student_id) DO UPDATE SET
             band = excluded.band, score = excluded.score, evaluated_at = excluded.evaluated_at",
            params![
                watermark.student_id.as_str(),
                watermark.band.as_str(),
                watermark.score,
                to_millis(watermark.evaluated_at),
            ],
        )?;
        Ok(())
    }
}

impl AlertRepo for SqliteStore {
    fn upsert_active_alert(&self, alert: &Alert) -> Result<AlertUpsert, RepoError> {
        Ok(self.upsert_alert_row(alert)?)
    }

    fn get_alert(&self, id: AlertId) -> Result<Option<Alert>, RepoError> {
        let conn = self.conn()?;
        Ok(load_alert(&conn, id)?)
    }

    fn query_alerts(&self, query: &AlertQuery) -> Result<Vec<Alert>, RepoError> {
        Ok(self.query_alert_rows(query)?)
    }

    fn transition_alert(&self, transition: &AlertTransition) -> Result<Alert, RepoError> {
        Ok(self.transition_alert_row(transition)?)
    }

    fn assign_alert(
        &self,
        id: AlertId,
        assignee: &str,
        at: DateTime<Utc>,
    ) -> Result<Alert, RepoError> {
        Ok(self.assign_alert_row(id, assignee, at)?)
    }

    fn alerts_created_before(&self, before: DateTime<Utc>) -> Result<Vec<Alert>, RepoError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM alerts WHERE created_at < ?1 ORDER BY created_at, id",
            ALERT_COLUMNS
        );
        Ok(load_many(&conn, &sql, params![to_millis(before)])?)
    }

    fn transitions_before(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<AlertTransition>, RepoError> {
        Ok(self.load_transitions_before(before)?)
    }

    fn watermark(&self, id: &StudentId) -> Result<Option<RiskWatermark>, RepoError> {
        Ok(self.load_watermark(id)?)
    }

    fn save_watermark(&self, watermark: &RiskWatermark) -> Result<(), RepoError> {
        Ok(self.store_watermark(watermark)?)
    }
}
