//! Beacon Trends
//!
//! Cohort trend aggregation and the background worker that keeps closed
//! periods cached.
//!
//! # Overview
//!
//! A trend point summarizes the cohort for one calendar period:
//! - **Enrollment**: students enrolled by period end and not archived before it
//! - **Risk bands**: profiles computed from inputs recorded before period end
//! - **Alerts**: alerts active at period end, replayed from the transition log
//! - **Interventions**: success rate across outcomes recorded before period end
//!
//! Points depend only on durable history, so a closed period snapshots to
//! the same point every time. Any write stamped before a cached period end
//! drops that point from the cache.
//!
//! # Usage
//!
//! ## Background Worker
//!
//! ```no_run
//! use beacon_trends::{TrendAggregator, TrendConfig, TrendWorker};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo(aggregator: Arc<TrendAggregator>) -> Result<(), beacon_trends::TrendError> {
//! let shutdown = CancellationToken::new();
//! let mut worker = TrendWorker::new(aggregator, TrendConfig::default());
//! worker.run(shutdown).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Presets
//!
//! ```
//! use beacon_trends::TrendConfig;
//!
//! // Default: monthly points, hourly checks
//! let config = TrendConfig::default();
//!
//! // Frequent: weekly points, checked every 15 minutes
//! let config = TrendConfig::frequent();
//!
//! // Relaxed: monthly points, checked every 6 hours
//! let config = TrendConfig::relaxed();
//! ```
//!
//! # Configuration
//!
//! ```toml
//! [trends]
//! period = "month"
//! interval_minutes = 60
//! snapshot_timeout_secs = 300
//! enabled = true
//! ```

#![warn(missing_docs)]

mod aggregator;
mod config;
mod error;
mod metrics;
mod worker;

pub use aggregator::TrendAggregator;
pub use config::TrendConfig;
pub use error::TrendError;
pub use metrics::TrendMetrics;
pub use worker::TrendWorker;
