//! Alert module - threshold crossings with a forward-only lifecycle

use crate::{AlertId, DomainError, FactorKind, RiskBand, StudentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Subject key used for system-level alerts in uniqueness checks
pub const SYSTEM_SUBJECT: &str = "system";

/// What kind of concern an alert signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertType {
    /// Composite band moved to a higher band
    BandEscalation,
    /// Attendance fell sharply within a short window
    AttendanceDrop,
    /// Academic standing fell sharply
    AcademicDecline,
    /// A behavioral incident was recorded
    BehavioralIncident,
    /// System-level condition not tied to a student
    System,
}

impl AlertType {
    /// Get the type name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::BandEscalation => "band-escalation",
            AlertType::AttendanceDrop => "attendance-drop",
            AlertType::AcademicDecline => "academic-decline",
            AlertType::BehavioralIncident => "behavioral-incident",
            AlertType::System => "system",
        }
    }

    /// Parse a type from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "band-escalation" => Some(AlertType::BandEscalation),
            "attendance-drop" => Some(AlertType::AttendanceDrop),
            "academic-decline" => Some(AlertType::AcademicDecline),
            "behavioral-incident" => Some(AlertType::BehavioralIncident),
            "system" => Some(AlertType::System),
            _ => None,
        }
    }
}

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational
    Low,
    /// Needs attention
    Medium,
    /// Needs prompt attention
    High,
    /// Needs immediate attention
    Critical,
}

impl AlertSeverity {
    /// Get the severity name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }

    /// Parse a severity from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(AlertSeverity::Low),
            "medium" => Some(AlertSeverity::Medium),
            "high" => Some(AlertSeverity::High),
            "critical" => Some(AlertSeverity::Critical),
            _ => None,
        }
    }
}

/// Alert lifecycle status
///
/// ```text
/// active ──> acknowledged ──> resolved ──> archived
///    └──────────────────────────^
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Newly raised
    Active,
    /// Seen by staff
    Acknowledged,
    /// Concern addressed
    Resolved,
    /// Retained for history only
    Archived,
}

impl AlertStatus {
    /// Get the status name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Archived => "archived",
        }
    }

    /// Parse a status from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(AlertStatus::Active),
            "acknowledged" => Some(AlertStatus::Acknowledged),
            "resolved" => Some(AlertStatus::Resolved),
            "archived" => Some(AlertStatus::Archived),
            _ => None,
        }
    }

    /// Whether moving from `self` to `to` is permitted
    pub fn can_transition_to(&self, to: AlertStatus) -> bool {
        matches!(
            (self, to),
            (AlertStatus::Active, AlertStatus::Acknowledged)
                | (AlertStatus::Active, AlertStatus::Resolved)
                | (AlertStatus::Acknowledged, AlertStatus::Resolved)
                | (AlertStatus::Resolved, AlertStatus::Archived)
        )
    }

    /// Validate a transition
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidTransition`] if the change is not permitted
    pub fn transition(&self, to: AlertStatus) -> Result<AlertStatus, DomainError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(DomainError::InvalidTransition {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Invalid alert status: {}", s))
    }
}

/// Typed supporting details, one variant per alert family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum AlertDetails {
    /// Attendance drop details
    Attendance {
        /// Highest attendance value inside the window
        baseline: f64,
        /// Newly observed value
        current: f64,
        /// Window length in days
        window_days: u32,
    },
    /// Academic decline details
    Academic {
        /// Highest academic value inside the window
        baseline: f64,
        /// Newly observed value
        current: f64,
        /// Window length in days
        window_days: u32,
    },
    /// Behavioral incident details
    Behavioral {
        /// Recorded conduct value
        value: f64,
        /// Incident threshold the value fell to
        threshold: f64,
    },
    /// Composite band escalation details
    MultiFactor {
        /// Band before the evaluation
        previous_band: RiskBand,
        /// Band after the evaluation
        band: RiskBand,
        /// Score before the evaluation, if any
        previous_score: Option<f64>,
        /// Score after the evaluation
        score: f64,
    },
    /// System-level details
    System {
        /// Component that raised the alert
        source: String,
    },
}

impl AlertDetails {
    /// Size of the drop for single-factor declines
    pub fn drop(&self) -> Option<f64> {
        match self {
            AlertDetails::Attendance {
                baseline, current, ..
            }
            | AlertDetails::Academic {
                baseline, current, ..
            } => Some(baseline - current),
            _ => None,
        }
    }
}

/// An alert raised for a student (or the system)
///
/// After creation only status, assignee, factor snapshot and `updated_at`
/// change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Unique identifier
    pub id: AlertId,
    /// Student concerned, `None` for system-level alerts
    pub student_id: Option<StudentId>,
    /// Alert type
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    /// Severity
    pub severity: AlertSeverity,
    /// Lifecycle status
    pub status: AlertStatus,
    /// When the alert was raised
    pub created_at: DateTime<Utc>,
    /// Last refresh or status change
    pub updated_at: DateTime<Utc>,
    /// Staff member handling the alert
    pub assigned_to: Option<String>,
    /// Human-readable message
    pub message: String,
    /// Typed supporting details
    pub details: AlertDetails,
    /// Factor values when the alert last fired
    pub factor_snapshot: BTreeMap<FactorKind, f64>,
}

impl Alert {
    /// Raise a new active alert
    pub fn raise(
        student_id: Option<StudentId>,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: String,
        details: AlertDetails,
        factor_snapshot: BTreeMap<FactorKind, f64>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AlertId::new(),
            student_id,
            alert_type,
            severity,
            status: AlertStatus::Active,
            created_at: at,
            updated_at: at,
            assigned_to: None,
            message,
            details,
            factor_snapshot,
        }
    }

    /// Key used for the one-active-alert-per-(subject, type) rule
    pub fn subject_key(&self) -> &str {
        self.student_id
            .as_ref()
            .map(StudentId::as_str)
            .unwrap_or(SYSTEM_SUBJECT)
    }

    /// Discriminator within (subject, type) for the one-active-alert rule
    ///
    /// Band escalations are keyed by the band entered, so a move from medium
    /// into high raises its own alert. Other types use a single key.
    pub fn dedup_key(&self) -> &'static str {
        match &self.details {
            AlertDetails::MultiFactor { band, .. } => band.as_str(),
            _ => "",
        }
    }

    /// Refresh an active alert with a newer firing of the same rule
    ///
    /// Only the factor snapshot and `updated_at` move; severity, message and
    /// details stay as first raised.
    pub fn refresh_from(&mut self, newer: &Alert) {
        self.factor_snapshot = newer.factor_snapshot.clone();
        self.updated_at = newer.updated_at.max(self.updated_at);
    }
}

/// Append-only record of an accepted status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertTransition {
    /// Alert that changed
    pub alert_id: AlertId,
    /// Status before
    pub from: AlertStatus,
    /// Status after
    pub to: AlertStatus,
    /// When the change happened
    pub at: DateTime<Utc>,
    /// Who requested it
    pub actor: Option<String>,
}

/// Status of an alert just before `before`, replaying its transitions
///
/// Returns `None` if the alert did not exist yet.
pub fn status_before(
    alert: &Alert,
    transitions: &[AlertTransition],
    before: DateTime<Utc>,
) -> Option<AlertStatus> {
    if alert.created_at >= before {
        return None;
    }

    let mut applicable: Vec<&AlertTransition> = transitions
        .iter()
        .filter(|t| t.alert_id == alert.id && t.at < before)
        .collect();
    applicable.sort_by_key(|t| t.at);

    Some(
        applicable
            .last()
            .map(|t| t.to)
            .unwrap_or(AlertStatus::Active),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn alert(at: DateTime<Utc>) -> Alert {
        Alert::raise(
            Some(StudentId::new("S-1").unwrap()),
            AlertType::AttendanceDrop,
            AlertSeverity::High,
            "attendance fell".to_string(),
            AlertDetails::Attendance {
                baseline: 85.0,
                current: 65.0,
                window_days: 7,
            },
            BTreeMap::new(),
            at,
        )
    }

    #[test]
    fn test_allowed_transitions() {
        use AlertStatus::*;
        assert!(Active.can_transition_to(Acknowledged));
        assert!(Active.can_transition_to(Resolved));
        assert!(Acknowledged.can_transition_to(Resolved));
        assert!(Resolved.can_transition_to(Archived));
    }

    #[test]
    fn test_backward_and_skipping_transitions_rejected() {
        use AlertStatus::*;
        assert!(Resolved.transition(Active).is_err());
        assert!(Acknowledged.transition(Active).is_err());
        assert!(Archived.transition(Resolved).is_err());
        assert!(Active.transition(Archived).is_err());
        assert!(Active.transition(Active).is_err());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Low < AlertSeverity::Medium);
        assert!(AlertSeverity::High < AlertSeverity::Critical);
    }

    #[test]
    fn test_subject_key() {
        let mut a = alert(Utc::now());
        assert_eq!(a.subject_key(), "S-1");
        a.student_id = None;
        assert_eq!(a.subject_key(), SYSTEM_SUBJECT);
    }

    #[test]
    fn test_refresh_moves_only_snapshot_and_timestamp() {
        let t = Utc::now();
        let mut original = alert(t);
        let mut newer = alert(t + Duration::hours(1));
        newer.severity = AlertSeverity::Critical;
        newer.message = "attendance fell again".to_string();
        newer.details = AlertDetails::Attendance {
            baseline: 85.0,
            current: 50.0,
            window_days: 7,
        };
        newer.factor_snapshot.insert(FactorKind::Attendance, 50.0);

        let before = original.clone();
        original.refresh_from(&newer);
        assert_eq!(original.id, before.id);
        assert_eq!(original.created_at, t);
        assert_eq!(original.updated_at, t + Duration::hours(1));
        assert_eq!(original.severity, AlertSeverity::High);
        assert_eq!(original.message, "attendance fell");
        assert_eq!(original.details, before.details);
        assert_eq!(original.factor_snapshot, newer.factor_snapshot);

        // an out-of-order refresh never moves the timestamp back
        original.refresh_from(&alert(t));
        assert_eq!(original.updated_at, t + Duration::hours(1));
    }

    #[test]
    fn test_dedup_key_separates_escalation_bands() {
        let escalation = |band| {
            Alert::raise(
                Some(StudentId::new("S-1").unwrap()),
                AlertType::BandEscalation,
                AlertSeverity::Medium,
                "band rose".to_string(),
                AlertDetails::MultiFactor {
                    previous_band: RiskBand::Low,
                    band,
                    previous_score: None,
                    score: 60.0,
                },
                BTreeMap::new(),
                Utc::now(),
            )
        };
        assert_eq!(escalation(RiskBand::Medium).dedup_key(), "medium");
        assert_eq!(escalation(RiskBand::High).dedup_key(), "high");
        assert_eq!(alert(Utc::now()).dedup_key(), "");
    }

    #[test]
    fn test_details_drop() {
        assert_eq!(alert(Utc::now()).details.drop(), Some(20.0));
    }

    #[test]
    fn test_status_before_replays_transitions() {
        let t = Utc::now();
        let a = alert(t);
        let transitions = vec![
            AlertTransition {
                alert_id: a.id,
                from: AlertStatus::Active,
                to: AlertStatus::Acknowledged,
                at: t + Duration::hours(1),
                actor: None,
            },
            AlertTransition {
                alert_id: a.id,
                from: AlertStatus::Acknowledged,
                to: AlertStatus::Resolved,
                at: t + Duration::hours(3),
                actor: Some("counselor".to_string()),
            },
        ];

        assert_eq!(status_before(&a, &transitions, t), None);
        assert_eq!(
            status_before(&a, &transitions, t + Duration::minutes(30)),
            Some(AlertStatus::Active)
        );
        assert_eq!(
            status_before(&a, &transitions, t + Duration::hours(2)),
            Some(AlertStatus::Acknowledged)
        );
        assert_eq!(
            status_before(&a, &transitions, t + Duration::hours(4)),
            Some(AlertStatus::Resolved)
        );
    }
}
