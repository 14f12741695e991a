//! Beacon Engine
//!
//! Risk scoring, alerting, intervention tracking and notification dispatch
//! over a [`beacon_domain::RiskStore`].
//!
//! The engine provides:
//! - Composite risk profiles with a generation-tagged cache
//! - Alert creation rules with per-(subject, type) deduplication
//! - Intervention lifecycle, outcome log and budget enforcement
//! - Fire-and-record notification dispatch
//!
//! # Examples
//!
//! ```no_run
//! use beacon_engine::{delivery_channel, EngineConfig, RiskService};
//! use beacon_domain::SystemClock;
//! use std::sync::Arc;
//!
//! // let store: Arc<dyn RiskStore> = Arc::new(SqliteStore::open("beacon.db")?);
//! let (queue, _rx) = delivery_channel();
//! let clock = Arc::new(SystemClock);
//! // let service = RiskService::new(store, EngineConfig::default(), vec![], queue, clock);
//! ```

#![warn(missing_docs)]

mod alerts;
mod config;
mod error;
mod interventions;
mod locks;
mod notify;
mod scoring;
mod service;

pub use alerts::rules::{self as alert_rules, Firing};
pub use alerts::AlertManager;
pub use config::{AlertRules, CacheConfig, DropRule, EngineConfig, IncidentRule};
pub use error::EngineError;
pub use interventions::InterventionTracker;
pub use locks::StudentLocks;
pub use notify::{
    delivery_channel, run_delivery, DeliveryQueue, DeliverySink, LogSink, NotificationDispatcher,
    SinkError,
};
pub use scoring::RiskScoringEngine;
pub use service::{RiskService, SampleInput, SampleOutcome};

use beacon_domain::Clock;
use chrono::{DateTime, SubsecRound, Utc};

/// Drop sub-millisecond precision so instants survive storage unchanged
pub fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

pub(crate) fn stamp(clock: &dyn Clock) -> DateTime<Utc> {
    truncate_millis(clock.now())
}
