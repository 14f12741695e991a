//! Background worker that snapshots closed periods

use crate::{TrendAggregator, TrendConfig, TrendError, TrendMetrics};
use beacon_domain::CohortTrendPoint;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, timeout, Duration};
use tokio_util::sync::CancellationToken;

/// Background worker that writes the most recently closed period's point
///
/// Each cycle checks the cache first, so a period is computed once. The
/// snapshot runs on the blocking pool under a time budget; on timeout or
/// shutdown its cancellation token is triggered and nothing is written.
///
/// # Examples
///
/// ```no_run
/// use beacon_trends::{TrendAggregator, TrendConfig, TrendWorker};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn demo(aggregator: Arc<TrendAggregator>) -> Result<(), beacon_trends::TrendError> {
/// let mut worker = TrendWorker::new(aggregator, TrendConfig::default());
///
/// // Run until Ctrl+C or the token is cancelled
/// worker.run(CancellationToken::new()).await?;
/// # Ok(())
/// # }
/// ```
pub struct TrendWorker {
    aggregator: Arc<TrendAggregator>,
    interval: Duration,
    snapshot_timeout: Duration,
    metrics: TrendMetrics,
}

impl TrendWorker {
    /// Create a new background worker with the given configuration
    pub fn new(aggregator: Arc<TrendAggregator>, config: TrendConfig) -> Self {
        Self {
            aggregator,
            interval: config.interval(),
            snapshot_timeout: config.snapshot_timeout(),
            metrics: TrendMetrics::new(),
        }
    }

    /// Run until Ctrl+C or `shutdown` is cancelled
    ///
    /// Snapshot failures are logged and the worker keeps going.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), TrendError> {
        let mut ticker = interval(self.interval);

        tracing::info!("Trend worker started (interval: {:?})", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once(&shutdown).await {
                        tracing::error!("Trend cycle failed: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received, stopping trend worker");
                    shutdown.cancel();
                    break;
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested, stopping trend worker");
                    break;
                }
            }
        }

        tracing::info!("Trend worker stopped. Final metrics:\n{}", self.metrics.summary());
        Ok(())
    }

    /// Run a specific number of cycles, stopping at the first error
    pub async fn run_cycles(&mut self, cycles: usize) -> Result<(), TrendError> {
        let mut ticker = interval(self.interval);
        let shutdown = CancellationToken::new();

        for cycle in 0..cycles {
            ticker.tick().await;
            tracing::debug!("Starting trend cycle {}/{}", cycle + 1, cycles);
            self.run_once(&shutdown).await?;
        }

        tracing::info!(
            "Trend worker finished {} cycles. Final metrics:\n{}",
            cycles,
            self.metrics.summary()
        );
        Ok(())
    }

    /// Snapshot the most recently closed period unless it is already cached
    pub async fn run_once(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<CohortTrendPoint, TrendError> {
        self.metrics.record_cycle();
        let (start, end) = self.aggregator.last_closed_period();

        let aggregator = Arc::clone(&self.aggregator);
        let cached = tokio::task::spawn_blocking(move || aggregator.cached_point(start))
            .await
            .map_err(|e| TrendError::Worker(e.to_string()))??;
        if let Some(point) = cached {
            self.metrics.record_cached();
            return Ok(point);
        }

        let cancel = shutdown.child_token();
        let aggregator = Arc::clone(&self.aggregator);
        let token = cancel.clone();
        let started = Instant::now();
        let task = tokio::task::spawn_blocking(move || aggregator.snapshot(start, end, &token));

        let result = match timeout(self.snapshot_timeout, task).await {
            Ok(joined) => joined.map_err(|e| TrendError::Worker(e.to_string()))?,
            Err(_) => {
                cancel.cancel();
                Err(TrendError::TimedOut(self.snapshot_timeout))
            }
        };

        match &result {
            Ok(_) => self
                .metrics
                .record_written(started.elapsed().as_millis() as u64),
            Err(TrendError::Cancelled) => self.metrics.record_cancelled(),
            Err(TrendError::TimedOut(_)) => {
                tracing::warn!(period_start = %start, "Trend snapshot timed out");
                self.metrics.record_timeout();
            }
            Err(e) => {
                tracing::error!(period_start = %start, error = %e, "Trend snapshot failed");
                self.metrics.record_failure();
            }
        }
        result
    }

    /// Current metrics
    pub fn metrics(&self) -> &TrendMetrics {
        &self.metrics
    }

    /// Reset the metrics counters
    pub fn reset_metrics(&mut self) {
        self.metrics.reset();
    }
}
