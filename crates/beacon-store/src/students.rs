//! Students and factor samples

use crate::codec::{bytes_to_id, from_millis, id_to_bytes, parse_enum, to_millis};
use crate::{SqliteStore, StoreError};
use beacon_domain::traits::StudentRepo;
use beacon_domain::{
    EnrollmentStatus, FactorKind, RepoError, RiskFactorSample, SampleId, Student, StudentId,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

struct StudentRow {
    id: String,
    grade_level: i64,
    status: String,
    enrolled_at: i64,
    archived_at: Option<i64>,
}

impl StudentRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            grade_level: row.get(1)?,
            status: row.get(2)?,
            enrolled_at: row.get(3)?,
            archived_at: row.get(4)?,
        })
    }

    fn decode(self) -> Result<Student, StoreError> {
        Ok(Student {
            id: StudentId::new(self.id).map_err(StoreError::InvalidData)?,
            grade_level: u8::try_from(self.grade_level).map_err(|_| {
                StoreError::InvalidData(format!("Grade level out of range: {}", self.grade_level))
            })?,
            status: parse_enum(&self.status, "enrollment status", EnrollmentStatus::parse)?,
            enrolled_at: from_millis(self.enrolled_at)?,
            archived_at: self.archived_at.map(from_millis).transpose()?,
        })
    }
}

const STUDENT_COLUMNS: &str = "id, grade_level, status, enrolled_at, archived_at";

struct SampleRow {
    id: Vec<u8>,
    student_id: String,
    kind: String,
    value: f64,
    observed_at: i64,
}

impl SampleRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            student_id: row.get(1)?,
            kind: row.get(2)?,
            value: row.get(3)?,
            observed_at: row.get(4)?,
        })
    }

    fn decode(self) -> Result<RiskFactorSample, StoreError> {
        Ok(RiskFactorSample {
            id: SampleId::from_value(bytes_to_id(&self.id)?),
            student_id: StudentId::new(self.student_id).map_err(StoreError::InvalidData)?,
            kind: parse_enum(&self.kind, "factor kind", FactorKind::parse)?,
            value: self.value,
            observed_at: from_millis(self.observed_at)?,
        })
    }
}

fn write_sample(conn: &Connection, sample: &RiskFactorSample) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO factor_samples (id, student_id, kind, value, observed_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            id_to_bytes(sample.id.value()),
            sample.student_id.as_str(),
            sample.kind.as_str(),
            sample.value,
            to_millis(sample.observed_at),
        ],
    )?;
    Ok(())
}

impl SqliteStore {
    fn insert_student_row(&self, student: &Student) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO students (id, grade_level, status, enrolled_at, archived_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO NOTHING",
            params![
                student.id.as_str(),
                i64::from(student.grade_level),
                student.status.as_str(),
                to_millis(student.enrolled_at),
                student.archived_at.map(to_millis),
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::Duplicate(format!("student {}", student.id)));
        }
        Ok(())
    }

    fn update_student_row(&self, student: &Student) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE students SET grade_level = ?2, status = ?3, archived_at = ?4 WHERE id = ?1",
            params![
                student.id.as_str(),
                i64::from(student.grade_level),
                student.status.as_str(),
                student.archived_at.map(to_millis),
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("student {}", student.id)));
        }
        Ok(())
    }

    fn load_student(&self, id: &StudentId) -> Result<Option<Student>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM students WHERE id = ?1", STUDENT_COLUMNS),
                params![id.as_str()],
                StudentRow::read,
            )
            .optional()?;
        row.map(StudentRow::decode).transpose()
    }

    fn load_students(&self) -> Result<Vec<Student>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM students ORDER BY id",
            STUDENT_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], StudentRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(StudentRow::decode).collect()
    }

    fn insert_sample(&self, sample: &RiskFactorSample) -> Result<(), StoreError> {
        let conn = self.conn()?;
        write_sample(&conn, sample)
    }

    fn insert_samples(&self, samples: &[RiskFactorSample]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for sample in samples {
            write_sample(&tx, sample)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_samples(
        &self,
        id: &StudentId,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<RiskFactorSample>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, student_id, kind, value, observed_at FROM factor_samples
             WHERE student_id = ?1 AND observed_at < ?2
             ORDER BY observed_at, id",
        )?;
        let bound = before.map(to_millis).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![id.as_str(), bound], SampleRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(SampleRow::decode).collect()
    }
}

impl StudentRepo for SqliteStore {
    fn insert_student(&self, student: &Student) -> Result<(), RepoError> {
        Ok(self.insert_student_row(student)?)
    }

    fn update_student(&self, student: &Student) -> Result<(), RepoError> {
        Ok(self.update_student_row(student)?)
    }

    fn get_student(&self, id: &StudentId) -> Result<Option<Student>, RepoError> {
        Ok(self.load_student(id)?)
    }

    fn list_students(&self) -> Result<Vec<Student>, RepoError> {
        Ok(self.load_students()?)
    }

    fn append_sample(&self, sample: &RiskFactorSample) -> Result<(), RepoError> {
        Ok(self.insert_sample(sample)?)
    }

    fn append_samples(&self, samples: &[RiskFactorSample]) -> Result<(), RepoError> {
        Ok(self.insert_samples(samples)?)
    }

    fn samples_for(
        &self,
        id: &StudentId,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<RiskFactorSample>, RepoError> {
        Ok(self.load_samples(id, before)?)
    }
}
