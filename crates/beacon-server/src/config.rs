//! Configuration file parsing for the Beacon server.
//!
//! Loads settings from TOML files including bind address, database path,
//! scoring and alert rules, trend rollups, and notification recipients.

use beacon_domain::{NotificationPreference, ScoringConfig};
use beacon_engine::{AlertRules, CacheConfig, EngineConfig};
use beacon_trends::TrendConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Server configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Preset name not recognized
    #[error("Unknown {section} preset: {name}")]
    UnknownPreset {
        /// Section the preset was requested for
        section: &'static str,
        /// Requested name
        name: String,
    },

    /// Field present but unusable
    #[error("Invalid configuration field {field}: {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Server configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Bind port (e.g., 8080)
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// SQLite database file (":memory:" for an ephemeral store)
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// How often scheduled notifications are released (in seconds)
    #[serde(default = "default_release_interval")]
    pub release_interval_secs: u64,

    /// Named alert rule preset; replaces the `[alerts]` section when set
    #[serde(default)]
    pub alert_preset: Option<String>,

    /// Named trend preset; replaces the `[trends]` section when set
    #[serde(default)]
    pub trend_preset: Option<String>,

    /// Profile computation
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Alert creation rules
    #[serde(default)]
    pub alerts: AlertRules,

    /// Profile cache sizing
    #[serde(default)]
    pub cache: CacheConfig,

    /// Cohort trend rollups
    #[serde(default)]
    pub trends: TrendConfig,

    /// Notification recipients
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

/// `[notifications]` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationsConfig {
    /// Per-recipient preferences
    #[serde(default)]
    pub recipients: Vec<NotificationPreference>,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    8080
}

fn default_database_path() -> PathBuf {
    PathBuf::from("beacon.db")
}

/// Default release interval: 1 minute
fn default_release_interval() -> u64 {
    60
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text and resolve presets
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let mut config: ServerConfig = toml::from_str(contents)?;

        if let Some(name) = &config.alert_preset {
            config.alerts = AlertRules::preset(name).ok_or_else(|| ConfigError::UnknownPreset {
                section: "alerts",
                name: name.clone(),
            })?;
        }
        if let Some(name) = &config.trend_preset {
            config.trends = TrendConfig::preset(name).ok_or_else(|| ConfigError::UnknownPreset {
                section: "trends",
                name: name.clone(),
            })?;
        }
        if config.release_interval_secs == 0 {
            return Err(ConfigError::InvalidField {
                field: "release_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        for preference in &config.notifications.recipients {
            if preference.recipient.trim().is_empty() {
                return Err(ConfigError::InvalidField {
                    field: "notifications.recipients.recipient",
                    reason: "cannot be empty".to_string(),
                });
            }
        }

        Ok(config)
    }

    /// Create a default configuration for testing
    pub fn default_test_config() -> Self {
        ServerConfig {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            database_path: PathBuf::from(":memory:"),
            release_interval_secs: default_release_interval(),
            alert_preset: None,
            trend_preset: None,
            scoring: ScoringConfig::default(),
            alerts: AlertRules::default(),
            cache: CacheConfig::default(),
            trends: TrendConfig::default(),
            notifications: NotificationsConfig::default(),
        }
    }

    /// Get the full bind address (address:port)
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.bind_port)
    }

    /// Release interval as a `Duration`
    pub fn release_interval(&self) -> Duration {
        Duration::from_secs(self.release_interval_secs)
    }

    /// Engine settings drawn from this configuration
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            scoring: self.scoring.clone(),
            alerts: self.alerts.clone(),
            cache: self.cache,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_domain::{AlertSeverity, CalendarPeriod, Schedule};

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default_test_config();
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.bind_port, 8080);
        assert_eq!(config.database_path, PathBuf::from(":memory:"));
        assert!(config.notifications.recipients.is_empty());
    }

    #[test]
    fn test_bind_addr() {
        let config = ServerConfig::default_test_config();
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config.bind_port, 8080);
        assert_eq!(config.database_path, PathBuf::from("beacon.db"));
        assert_eq!(config.release_interval(), Duration::from_secs(60));
        assert_eq!(config.alerts, AlertRules::default());
        assert_eq!(config.trends, TrendConfig::default());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            bind_address = "0.0.0.0"
            bind_port = 9000
            database_path = "/var/lib/beacon/beacon.db"

            [alerts]
            abrupt_jump = 25.0

            [alerts.attendance_drop]
            min_drop = 12.0

            [trends]
            period = "week"

            [[notifications.recipients]]
            recipient = "counselor-1"
            min_severity = "high"
            channels = { dashboard = true, email = true, sms = false }

            [[notifications.recipients]]
            recipient = "principal"
            schedule = { mode = "recurring", cadence = { every = "daily" }, time_of_day = "17:00:00" }
        "#;

        let config = ServerConfig::from_toml(toml).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
        assert_eq!(config.alerts.abrupt_jump, 25.0);
        assert_eq!(config.alerts.attendance_drop.min_drop, 12.0);
        assert_eq!(config.alerts.attendance_drop.window_days, 7);
        assert_eq!(config.trends.period, CalendarPeriod::Week);
        assert_eq!(config.notifications.recipients.len(), 2);
        assert_eq!(
            config.notifications.recipients[0].min_severity,
            AlertSeverity::High
        );
        assert!(matches!(
            config.notifications.recipients[1].schedule,
            Schedule::Recurring { .. }
        ));
    }

    #[test]
    fn test_presets_replace_sections() {
        let config = ServerConfig::from_toml(
            r#"
            alert_preset = "strict"
            trend_preset = "frequent"
        "#,
        )
        .unwrap();
        assert_eq!(config.alerts, AlertRules::strict());
        assert_eq!(config.trends, TrendConfig::frequent());
    }

    #[test]
    fn test_unknown_preset_rejected() {
        let err = ServerConfig::from_toml(r#"alert_preset = "paranoid""#).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPreset { section: "alerts", .. }));
    }

    #[test]
    fn test_zero_release_interval_rejected() {
        let err = ServerConfig::from_toml("release_interval_secs = 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { .. }));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beacon.toml");
        std::fs::write(&path, "bind_port = 9100\n").unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.bind_port, 9100);

        let missing = ServerConfig::from_file(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::FileRead(_))));
    }
}
