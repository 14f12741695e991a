//! Interventions, their progress log and spending ledger

use crate::codec::{
    bytes_to_id, from_count, from_millis, id_to_bytes, parse_date, parse_enum, to_count, to_millis,
};
use crate::{SqliteStore, StoreError};
use beacon_domain::traits::{ExpenseEntry, InterventionRepo};
use beacon_domain::{
    Intervention, InterventionId, InterventionKind, InterventionStatus, OutcomeDelta,
    OutcomeTally, ProgressEntry, RepoError, StudentId,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

const INTERVENTION_COLUMNS: &str = "id, title, kind, staff, status, start_date, end_date, \
                                    budget, spent, progress, improved, no_change, declined, \
                                    version, created_at, updated_at, cancelled_at";

struct InterventionRow {
    id: Vec<u8>,
    title: String,
    kind: String,
    staff: String,
    status: String,
    start_date: String,
    end_date: Option<String>,
    budget: f64,
    spent: f64,
    progress: f64,
    improved: i64,
    no_change: i64,
    declined: i64,
    version: i64,
    created_at: i64,
    updated_at: i64,
    cancelled_at: Option<i64>,
}

impl InterventionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            kind: row.get(2)?,
            staff: row.get(3)?,
            status: row.get(4)?,
            start_date: row.get(5)?,
            end_date: row.get(6)?,
            budget: row.get(7)?,
            spent: row.get(8)?,
            progress: row.get(9)?,
            improved: row.get(10)?,
            no_change: row.get(11)?,
            declined: row.get(12)?,
            version: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
            cancelled_at: row.get(16)?,
        })
    }

    fn decode(self, student_ids: Vec<StudentId>) -> Result<Intervention, StoreError> {
        Ok(Intervention {
            id: InterventionId::from_value(bytes_to_id(&self.id)?),
            title: self.title,
            kind: parse_enum(&self.kind, "intervention kind", InterventionKind::parse)?,
            student_ids,
            staff: serde_json::from_str(&self.staff)?,
            status: parse_enum(&self.status, "intervention status", InterventionStatus::parse)?,
            start_date: parse_date(&self.start_date)?,
            end_date: self.end_date.as_deref().map(parse_date).transpose()?,
            budget: self.budget,
            spent: self.spent,
            progress: self.progress,
            outcomes: OutcomeTally {
                improved: from_count(self.improved)?,
                no_change: from_count(self.no_change)?,
                declined: from_count(self.declined)?,
            },
            version: from_count(self.version)?,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
            cancelled_at: self.cancelled_at.map(from_millis).transpose()?,
        })
    }
}

fn students_of(conn: &Connection, id_bytes: &[u8]) -> Result<Vec<StudentId>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT student_id FROM intervention_students WHERE intervention_id = ?1
         ORDER BY student_id",
    )?;
    let ids = stmt
        .query_map(params![id_bytes], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    ids.into_iter()
        .map(|id| StudentId::new(id).map_err(StoreError::InvalidData))
        .collect()
}

fn load_intervention(
    conn: &Connection,
    id: InterventionId,
) -> Result<Option<Intervention>, StoreError> {
    let id_bytes = id_to_bytes(id.value());
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM interventions WHERE id = ?1",
                INTERVENTION_COLUMNS
            ),
            params![&id_bytes],
            InterventionRow::read,
        )
        .optional()?;

    match row {
        Some(row) => {
            let students = students_of(conn, &id_bytes)?;
            Ok(Some(row.decode(students)?))
        }
        None => Ok(None),
    }
}

fn load_interventions(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Intervention>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, InterventionRow::read)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|row| {
            let students = students_of(conn, &row.id)?;
            row.decode(students)
        })
        .collect()
}

/// Versioned write of the mutable columns; the stored version becomes
/// `expected_version + 1`
fn write_versioned(
    tx: &Transaction<'_>,
    intervention: &Intervention,
    expected_version: u64,
) -> Result<(), StoreError> {
    let updated = tx.execute(
        "UPDATE interventions SET title = ?3, staff = ?4, status = ?5, end_date = ?6,
         budget = ?7, spent = ?8, progress = ?9, improved = ?10, no_change = ?11,
         declined = ?12, version = version + 1, updated_at = ?13, cancelled_at = ?14
         WHERE id = ?1 AND version = ?2",
        params![
            id_to_bytes(intervention.id.value()),
            to_count(expected_version)?,
            &intervention.title,
            serde_json::to_string(&intervention.staff)?,
            intervention.status.as_str(),
            intervention.end_date.map(|d| d.to_string()),
            intervention.budget,
            intervention.spent,
            intervention.progress,
            to_count(intervention.outcomes.improved)?,
            to_count(intervention.outcomes.no_change)?,
            to_count(intervention.outcomes.declined)?,
            to_millis(intervention.updated_at),
            intervention.cancelled_at.map(to_millis),
        ],
    )?;

    if updated == 0 {
        return match load_intervention(tx, intervention.id)? {
            None => Err(StoreError::NotFound(format!("intervention {}", intervention.id))),
            Some(current) => Err(StoreError::ConcurrentModification(format!(
                "intervention {} is at version {}, expected {}",
                intervention.id, current.version, expected_version
            ))),
        };
    }
    Ok(())
}

fn reload(tx: &Transaction<'_>, id: InterventionId) -> Result<Intervention, StoreError> {
    load_intervention(tx, id)?.ok_or_else(|| StoreError::NotFound(format!("intervention {}", id)))
}

impl SqliteStore {
    fn insert_intervention_row(&self, intervention: &Intervention) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id_bytes = id_to_bytes(intervention.id.value());

        let inserted = tx.execute(
            "INSERT INTO interventions (id, title, kind, staff, status, start_date, end_date,
             budget, spent, progress, improved, no_change, declined, version, created_at,
             updated_at, cancelled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT(id) DO NOTHING",
            params![
                &id_bytes,
                &intervention.title,
                intervention.kind.as_str(),
                serde_json::to_string(&intervention.staff)?,
                intervention.status.as_str(),
                intervention.start_date.to_string(),
                intervention.end_date.map(|d| d.to_string()),
                intervention.budget,
                intervention.spent,
                intervention.progress,
                to_count(intervention.outcomes.improved)?,
                to_count(intervention.outcomes.no_change)?,
                to_count(intervention.outcomes.declined)?,
                to_count(intervention.version)?,
                to_millis(intervention.created_at),
                to_millis(intervention.updated_at),
                intervention.cancelled_at.map(to_millis),
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::Duplicate(format!("intervention {}", intervention.id)));
        }

        for student_id in &intervention.student_ids {
            tx.execute(
                "INSERT OR IGNORE INTO intervention_students (intervention_id, student_id)
                 VALUES (?1, ?2)",
                params![&id_bytes, student_id.as_str()],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn update_intervention_row(
        &self,
        intervention: &Intervention,
        expected_version: u64,
    ) -> Result<Intervention, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        write_versioned(&tx, intervention, expected_version)?;
        let stored = reload(&tx, intervention.id)?;
        tx.commit()?;
        Ok(stored)
    }

    fn record_progress_row(
        &self,
        intervention: &Intervention,
        entry: &ProgressEntry,
        expected_version: u64,
    ) -> Result<Intervention, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        write_versioned(&tx, intervention, expected_version)?;
        tx.execute(
            "INSERT INTO intervention_entries (intervention_id, progress, improved, no_change,
             declined, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id_to_bytes(entry.intervention_id.value()),
                entry.progress,
                entry.outcome.improved,
                entry.outcome.no_change,
                entry.outcome.declined,
                to_millis(entry.recorded_at),
            ],
        )?;
        let stored = reload(&tx, intervention.id)?;
        tx.commit()?;
        Ok(stored)
    }

    fn record_expense_row(
        &self,
        intervention: &Intervention,
        expense: &ExpenseEntry,
        expected_version: u64,
    ) -> Result<Intervention, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        write_versioned(&tx, intervention, expected_version)?;
        tx.execute(
            "INSERT INTO intervention_expenses (intervention_id, amount, recorded_at)
             VALUES (?1, ?2, ?3)",
            params![
                id_to_bytes(expense.intervention_id.value()),
                expense.amount,
                to_millis(expense.recorded_at),
            ],
        )?;
        let stored = reload(&tx, intervention.id)?;
        tx.commit()?;
        Ok(stored)
    }

    fn load_entries(
        &self,
        id: Option<InterventionId>,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProgressEntry>, StoreError> {
        let conn = self.conn()?;
        let bound = before.map(to_millis).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(
            "SELECT intervention_id, progress, improved, no_change, declined, recorded_at
             FROM intervention_entries
             WHERE (?1 IS NULL OR intervention_id = ?1) AND recorded_at < ?2
             ORDER BY recorded_at, seq",
        )?;
        let filter = id.map(|id| id_to_bytes(id.value()));
        let rows = stmt
            .query_map(params![filter, bound], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, progress, improved, no_change, declined, recorded_at)| {
                Ok(ProgressEntry {
                    intervention_id: InterventionId::from_value(bytes_to_id(&id)?),
                    progress,
                    outcome: OutcomeDelta {
                        improved,
                        no_change,
                        declined,
                    },
                    recorded_at: from_millis(recorded_at)?,
                })
            })
            .collect()
    }

    fn load_expenses(&self, before: DateTime<Utc>) -> Result<Vec<ExpenseEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT intervention_id, amount, recorded_at FROM intervention_expenses
             WHERE recorded_at < ?1 ORDER BY recorded_at, seq",
        )?;
        let rows = stmt
            .query_map(params![to_millis(before)], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, amount, recorded_at)| {
                Ok(ExpenseEntry {
                    intervention_id: InterventionId::from_value(bytes_to_id(&id)?),
                    amount,
                    recorded_at: from_millis(recorded_at)?,
                })
            })
            .collect()
    }
}

impl InterventionRepo for SqliteStore {
    fn insert_intervention(&self, intervention: &Intervention) -> Result<(), RepoError> {
        Ok(self.insert_intervention_row(intervention)?)
    }

    fn get_intervention(&self, id: InterventionId) -> Result<Option<Intervention>, RepoError> {
        let conn = self.conn()?;
        Ok(load_intervention(&conn, id)?)
    }

    fn update_intervention(
        &self,
        intervention: &Intervention,
        expected_version: u64,
    ) -> Result<Intervention, RepoError> {
        Ok(self.update_intervention_row(intervention, expected_version)?)
    }

    fn record_progress(
        &self,
        intervention: &Intervention,
        entry: &ProgressEntry,
        expected_version: u64,
    ) -> Result<Intervention, RepoError> {
        Ok(self.record_progress_row(intervention, entry, expected_version)?)
    }

    fn record_expense(
        &self,
        intervention: &Intervention,
        expense: &ExpenseEntry,
        expected_version: u64,
    ) -> Result<Intervention, RepoError> {
        Ok(self.record_expense_row(intervention, expense, expected_version)?)
    }

    fn interventions_for_student(&self, id: &StudentId) -> Result<Vec<Intervention>, RepoError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM interventions WHERE id IN
             (SELECT intervention_id FROM intervention_students WHERE student_id = ?1)
             ORDER BY created_at, id",
            INTERVENTION_COLUMNS
        );
        Ok(load_interventions(&conn, &sql, params![id.as_str()])?)
    }

    fn list_interventions(&self) -> Result<Vec<Intervention>, RepoError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM interventions ORDER BY created_at, id",
            INTERVENTION_COLUMNS
        );
        Ok(load_interventions(&conn, &sql, params![])?)
    }

    fn progress_entries(
        &self,
        id: InterventionId,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProgressEntry>, RepoError> {
        Ok(self.load_entries(Some(id), before)?)
    }

    fn all_progress_entries(&self, before: DateTime<Utc>) -> Result<Vec<ProgressEntry>, RepoError> {
        Ok(self.load_entries(None, Some(before))?)
    }

    fn all_expenses(&self, before: DateTime<Utc>) -> Result<Vec<ExpenseEntry>, RepoError> {
        Ok(self.load_expenses(before)?)
    }
}
