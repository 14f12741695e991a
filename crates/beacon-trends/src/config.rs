//! Configuration for trend aggregation
//!
//! Defines the roll-up period, how often the worker runs, and the snapshot time budget.

use beacon_domain::CalendarPeriod;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the trend worker
///
/// # Examples
///
/// ```
/// use beacon_trends::TrendConfig;
///
/// let config = TrendConfig::default();
/// assert_eq!(config.interval_minutes, 60);
///
/// // Weekly roll-ups checked every 15 minutes
/// let config = TrendConfig::frequent();
/// assert_eq!(config.interval_minutes, 15);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Calendar period of one trend point
    /// Default: month
    pub period: CalendarPeriod,

    /// How often the worker checks for a newly closed period (in minutes)
    /// Default: 60
    pub interval_minutes: u64,

    /// Time budget for one snapshot (in seconds)
    /// Default: 300
    pub snapshot_timeout_secs: u64,

    /// Run the background worker at all
    /// Default: true
    pub enabled: bool,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            period: CalendarPeriod::Month,
            interval_minutes: 60,
            snapshot_timeout_secs: 300,
            enabled: true,
        }
    }
}

impl TrendConfig {
    /// Weekly points, checked often, with a short budget
    pub fn frequent() -> Self {
        Self {
            period: CalendarPeriod::Week,
            interval_minutes: 15,
            snapshot_timeout_secs: 60,
            enabled: true,
        }
    }

    /// Monthly points, checked rarely, with a generous budget
    pub fn relaxed() -> Self {
        Self {
            period: CalendarPeriod::Month,
            interval_minutes: 360,
            snapshot_timeout_secs: 1_800,
            enabled: true,
        }
    }

    /// Look up a preset by name (`default`, `frequent`, `relaxed`)
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            "frequent" => Some(Self::frequent()),
            "relaxed" => Some(Self::relaxed()),
            _ => None,
        }
    }

    /// Worker interval as Duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    /// Snapshot time budget as Duration
    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_secs(self.snapshot_timeout_secs)
    }
}
