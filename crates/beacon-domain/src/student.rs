//! Student module - the aggregate root for samples and alerts

use crate::{DomainError, StudentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Enrollment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    /// Currently enrolled
    Active,
    /// Withdrawn or archived
    Inactive,
}

impl EnrollmentStatus {
    /// Get the status name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Inactive => "inactive",
        }
    }

    /// Parse a status from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(EnrollmentStatus::Active),
            "inactive" => Some(EnrollmentStatus::Inactive),
            _ => None,
        }
    }
}

/// A student - identity anchor for risk history
///
/// Students are never deleted; archiving marks them inactive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    /// Registrar identifier
    pub id: StudentId,
    /// Grade level (0 = kindergarten, up to 12)
    pub grade_level: u8,
    /// Enrollment status
    pub status: EnrollmentStatus,
    /// When the student enrolled
    pub enrolled_at: DateTime<Utc>,
    /// When the student was archived, if ever
    pub archived_at: Option<DateTime<Utc>>,
}

/// Highest supported grade level
pub const MAX_GRADE_LEVEL: u8 = 12;

impl Student {
    /// Enroll a new student
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidValue`] if the grade level is above 12
    pub fn enroll(
        id: StudentId,
        grade_level: u8,
        enrolled_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        check_grade(grade_level)?;
        Ok(Self {
            id,
            grade_level,
            status: EnrollmentStatus::Active,
            enrolled_at,
            archived_at: None,
        })
    }

    /// Move the student to another grade level
    pub fn change_grade(&mut self, grade_level: u8) -> Result<(), DomainError> {
        check_grade(grade_level)?;
        self.grade_level = grade_level;
        Ok(())
    }

    /// Soft-archive the student (idempotent)
    pub fn archive(&mut self, at: DateTime<Utc>) {
        if self.archived_at.is_none() {
            self.status = EnrollmentStatus::Inactive;
            self.archived_at = Some(at);
        }
    }

    /// Whether the student belonged to the cohort just before `at`
    pub fn enrolled_before(&self, at: DateTime<Utc>) -> bool {
        self.enrolled_at < at && self.archived_at.map_or(true, |archived| archived >= at)
    }
}

fn check_grade(grade_level: u8) -> Result<(), DomainError> {
    if grade_level > MAX_GRADE_LEVEL {
        return Err(DomainError::InvalidValue(format!(
            "grade level {} is above {}",
            grade_level, MAX_GRADE_LEVEL
        )));
    }
    Ok(())
}
