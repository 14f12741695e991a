//! Engine configuration
//!
//! Every tunable has a serde default, so a partial TOML section only
//! overrides what it names.

use beacon_domain::{AlertSeverity, ScoringConfig};
use serde::{Deserialize, Serialize};

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Profile computation
    pub scoring: ScoringConfig,
    /// Alert creation rules
    pub alerts: AlertRules,
    /// Profile cache sizing
    pub cache: CacheConfig,
}

/// Profile cache sizing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached profiles
    pub max_profiles: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_profiles: 10_000,
        }
    }
}

/// A sharp fall of one factor within a look-back window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DropRule {
    /// Whether the rule fires at all
    pub enabled: bool,
    /// Fall (in points) that must be exceeded
    pub min_drop: f64,
    /// Look-back window in days
    pub window_days: u32,
    /// Severity of the alert
    pub severity: AlertSeverity,
}

impl Default for DropRule {
    fn default() -> Self {
        Self {
            enabled: true,
            min_drop: 15.0,
            window_days: 7,
            severity: AlertSeverity::High,
        }
    }
}

/// A single low reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentRule {
    /// Whether the rule fires at all
    pub enabled: bool,
    /// Values at or below this count as an incident
    pub threshold: f64,
    /// Severity of the alert
    pub severity: AlertSeverity,
}

impl Default for IncidentRule {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 30.0,
            severity: AlertSeverity::High,
        }
    }
}

/// Alert creation rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertRules {
    /// Raise band-escalation alerts
    pub band_escalation: bool,
    /// Score jump (points) above which a high-band escalation is critical
    pub abrupt_jump: f64,
    /// Attendance drop rule
    pub attendance_drop: DropRule,
    /// Academic decline rule
    pub academic_decline: DropRule,
    /// Behavioral incident rule
    pub behavioral_incident: IncidentRule,
}

impl Default for AlertRules {
    fn default() -> Self {
        Self {
            band_escalation: true,
            abrupt_jump: 20.0,
            attendance_drop: DropRule::default(),
            academic_decline: DropRule {
                enabled: true,
                min_drop: 15.0,
                window_days: 30,
                severity: AlertSeverity::Medium,
            },
            behavioral_incident: IncidentRule::default(),
        }
    }
}

impl AlertRules {
    /// Fire earlier on smaller changes
    pub fn strict() -> Self {
        Self {
            band_escalation: true,
            abrupt_jump: 15.0,
            attendance_drop: DropRule {
                enabled: true,
                min_drop: 10.0,
                window_days: 14,
                severity: AlertSeverity::High,
            },
            academic_decline: DropRule {
                enabled: true,
                min_drop: 10.0,
                window_days: 30,
                severity: AlertSeverity::High,
            },
            behavioral_incident: IncidentRule {
                enabled: true,
                threshold: 40.0,
                severity: AlertSeverity::High,
            },
        }
    }

    /// Fire only on large changes
    pub fn lenient() -> Self {
        Self {
            band_escalation: true,
            abrupt_jump: 25.0,
            attendance_drop: DropRule {
                enabled: true,
                min_drop: 20.0,
                window_days: 7,
                severity: AlertSeverity::Medium,
            },
            academic_decline: DropRule {
                enabled: true,
                min_drop: 20.0,
                window_days: 30,
                severity: AlertSeverity::Low,
            },
            behavioral_incident: IncidentRule {
                enabled: true,
                threshold: 20.0,
                severity: AlertSeverity::Medium,
            },
        }
    }

    /// Look up a preset by name (`default`, `strict`, `lenient`)
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            "strict" => Some(Self::strict()),
            "lenient" => Some(Self::lenient()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules() {
        let rules = AlertRules::default();
        assert_eq!(rules.attendance_drop.min_drop, 15.0);
        assert_eq!(rules.attendance_drop.window_days, 7);
        assert_eq!(rules.academic_decline.window_days, 30);
        assert_eq!(rules.academic_decline.severity, AlertSeverity::Medium);
        assert_eq!(rules.behavioral_incident.threshold, 30.0);
        assert_eq!(rules.abrupt_jump, 20.0);
    }

    #[test]
    fn test_presets() {
        assert!(AlertRules::strict().attendance_drop.min_drop < AlertRules::default().attendance_drop.min_drop);
        assert!(AlertRules::lenient().behavioral_incident.threshold < 30.0);
        assert_eq!(AlertRules::preset("strict"), Some(AlertRules::strict()));
        assert!(AlertRules::preset("paranoid").is_none());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: EngineConfig = toml::from_str(
            r#"
            [alerts.attendance_drop]
            min_drop = 12.5

            [scoring.thresholds]
            medium = 35.0
            high = 65.0
            "#,
        )
        .unwrap();

        assert_eq!(config.alerts.attendance_drop.min_drop, 12.5);
        assert_eq!(config.alerts.attendance_drop.window_days, 7);
        assert_eq!(config.scoring.thresholds.medium, 35.0);
        assert_eq!(config.scoring.weights.sum(), 1.0);
    }

    #[test]
    fn test_bad_weights_rejected() {
        let result: Result<EngineConfig, _> = toml::from_str(
            r#"
            [scoring.weights]
            academic = 0.5
            attendance = 0.5
            behavioral = 0.5
            family_engagement = 0.0
            peer_relationships = 0.0
            economic = 0.0
            "#,
        );
        assert!(result.is_err());
    }
}
