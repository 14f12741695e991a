//! Notification preferences and delivery records

use crate::{AlertId, AlertSeverity, AttemptId};
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// In-app dashboard notice
    Dashboard,
    /// Email gateway
    Email,
    /// SMS gateway
    Sms,
}

impl Channel {
    /// Get the channel name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Dashboard => "dashboard",
            Channel::Email => "email",
            Channel::Sms => "sms",
        }
    }

    /// Parse a channel from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dashboard" => Some(Channel::Dashboard),
            "email" => Some(Channel::Email),
            "sms" => Some(Channel::Sms),
            _ => None,
        }
    }
}

/// Enabled channels for one recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelFlags {
    /// Dashboard notices
    pub dashboard: bool,
    /// Email
    pub email: bool,
    /// SMS
    pub sms: bool,
}

impl Default for ChannelFlags {
    fn default() -> Self {
        Self {
            dashboard: true,
            email: false,
            sms: false,
        }
    }
}

impl ChannelFlags {
    /// Enabled channels in a fixed order
    pub fn enabled(&self) -> Vec<Channel> {
        [
            (self.dashboard, Channel::Dashboard),
            (self.email, Channel::Email),
            (self.sms, Channel::Sms),
        ]
        .into_iter()
        .filter_map(|(on, channel)| on.then_some(channel))
        .collect()
    }
}

/// Recurrence of a digest schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "every", rename_all = "lowercase")]
pub enum Cadence {
    /// Every day
    Daily,
    /// Once a week on the given weekday
    Weekly {
        /// Day of the week
        weekday: Weekday,
    },
}

/// When notifications go out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Schedule {
    /// As soon as the alert fires
    Immediate,
    /// At the next recurring slot
    Recurring {
        /// Recurrence
        cadence: Cadence,
        /// Time of day (UTC)
        time_of_day: NaiveTime,
    },
}

impl Schedule {
    /// Next slot at or after `now`; `None` for immediate delivery
    pub fn next_slot(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let Schedule::Recurring {
            cadence,
            time_of_day,
        } = self
        else {
            return None;
        };

        let today = now.date_naive();
        let slot_on = |date: chrono::NaiveDate| Utc.from_utc_datetime(&date.and_time(*time_of_day));

        let slot = match cadence {
            Cadence::Daily => {
                let candidate = slot_on(today);
                if candidate >= now {
                    candidate
                } else {
                    slot_on(today + Duration::days(1))
                }
            }
            Cadence::Weekly { weekday } => {
                let ahead = (7 + i64::from(weekday.num_days_from_monday())
                    - i64::from(today.weekday().num_days_from_monday()))
                    % 7;
                let candidate = slot_on(today + Duration::days(ahead));
                if candidate >= now {
                    candidate
                } else {
                    slot_on(today + Duration::days(ahead + 7))
                }
            }
        };
        Some(slot)
    }
}

/// Per-recipient notification preference
///
/// Loaded from configuration, so fields keep their snake_case names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreference {
    /// Recipient address book id (staff member, role mailbox...)
    pub recipient: String,
    /// Enabled channels
    #[serde(default)]
    pub channels: ChannelFlags,
    /// Alerts below this severity are not sent
    #[serde(default = "default_min_severity")]
    pub min_severity: AlertSeverity,
    /// Delivery schedule
    #[serde(default = "default_schedule")]
    pub schedule: Schedule,
}

fn default_min_severity() -> AlertSeverity {
    AlertSeverity::Low
}

fn default_schedule() -> Schedule {
    Schedule::Immediate
}

/// Fully specified delivery request handed to the external sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryIntent {
    /// Attempt this intent belongs to
    pub attempt_id: AttemptId,
    /// Alert being delivered
    pub alert_id: AlertId,
    /// Recipient
    pub recipient: String,
    /// Channel
    pub channel: Channel,
    /// Alert severity
    pub severity: AlertSeverity,
    /// Subject line
    pub subject: String,
    /// Message body
    pub body: String,
    /// Time slot the delivery belongs to
    pub slot: DateTime<Utc>,
}

/// State of a dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    /// Handed to the delivery queue immediately
    Queued,
    /// Waiting for its recurring slot
    Scheduled,
    /// Scheduled attempt handed to the delivery queue
    Released,
    /// Same (alert, recipient, channel, slot) already recorded; nothing sent
    Duplicate,
}

impl AttemptStatus {
    /// Get the status name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Queued => "queued",
            AttemptStatus::Scheduled => "scheduled",
            AttemptStatus::Released => "released",
            AttemptStatus::Duplicate => "duplicate",
        }
    }

    /// Parse a status from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(AttemptStatus::Queued),
            "scheduled" => Some(AttemptStatus::Scheduled),
            "released" => Some(AttemptStatus::Released),
            "duplicate" => Some(AttemptStatus::Duplicate),
            _ => None,
        }
    }
}

/// Record of one dispatch decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAttempt {
    /// What is (or will be) delivered
    pub intent: DeliveryIntent,
    /// Attempt state
    pub status: AttemptStatus,
    /// When the decision was recorded
    pub recorded_at: DateTime<Utc>,
}
