//! Metrics collection for trend snapshots

/// Counters kept by the trend worker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrendMetrics {
    /// Snapshots computed and written to the cache
    pub snapshots_written: usize,

    /// Cycles that found the period already cached
    pub snapshots_cached: usize,

    /// Snapshots cancelled (shutdown)
    pub cancelled: usize,

    /// Snapshots that exceeded their time budget
    pub timed_out: usize,

    /// Snapshots that failed with an error
    pub failed: usize,

    /// Worker cycles completed
    pub cycle_count: usize,

    /// Total snapshot runtime in milliseconds
    pub total_runtime_ms: u64,
}

impl TrendMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a written snapshot and its runtime
    pub fn record_written(&mut self, runtime_ms: u64) {
        self.snapshots_written += 1;
        self.total_runtime_ms += runtime_ms;
    }

    /// Record a cycle served from the cache
    pub fn record_cached(&mut self) {
        self.snapshots_cached += 1;
    }

    /// Record a cancelled snapshot
    pub fn record_cancelled(&mut self) {
        self.cancelled += 1;
    }

    /// Record a timed-out snapshot
    pub fn record_timeout(&mut self) {
        self.timed_out += 1;
    }

    /// Record a failed snapshot
    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    /// Record a cycle completion
    pub fn record_cycle(&mut self) {
        self.cycle_count += 1;
    }

    /// Snapshots that ended without a write
    pub fn total_unwritten(&self) -> usize {
        self.cancelled + self.timed_out + self.failed
    }

    /// Reset all metrics
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Generate a summary report of metrics
    pub fn summary(&self) -> String {
        let mut lines = vec![
            "Trend Metrics Summary".to_string(),
            "=====================".to_string(),
            format!("Cycles: {}", self.cycle_count),
            format!("Snapshots written: {}", self.snapshots_written),
            format!("Already cached: {}", self.snapshots_cached),
            format!("Total runtime: {}ms", self.total_runtime_ms),
        ];

        if self.total_unwritten() > 0 {
            lines.push(String::new());
            lines.push("Unwritten snapshots:".to_string());
            lines.push(format!("  Cancelled: {}", self.cancelled));
            lines.push(format!("  Timed out: {}", self.timed_out));
            lines.push(format!("  Failed: {}", self.failed));
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = TrendMetrics::new();
        assert_eq!(metrics.snapshots_written, 0);
        assert_eq!(metrics.total_unwritten(), 0);
        assert_eq!(metrics.cycle_count, 0);
    }

    #[test]
    fn test_record_outcomes() {
        let mut metrics = TrendMetrics::new();
        metrics.record_written(120);
        metrics.record_written(80);
        metrics.record_cached();
        metrics.record_cancelled();
        metrics.record_timeout();
        metrics.record_failure();

        assert_eq!(metrics.snapshots_written, 2);
        assert_eq!(metrics.total_runtime_ms, 200);
        assert_eq!(metrics.snapshots_cached, 1);
        assert_eq!(metrics.total_unwritten(), 3);
    }

    #[test]
    fn test_reset() {
        let mut metrics = TrendMetrics::new();
        metrics.record_written(10);
        metrics.record_cycle();
        metrics.reset();
        assert_eq!(metrics, TrendMetrics::default());
    }

    #[test]
    fn test_summary() {
        let mut metrics = TrendMetrics::new();
        metrics.record_written(120);
        metrics.record_cycle();
        let summary = metrics.summary();
        assert!(summary.contains("Cycles: 1"));
        assert!(summary.contains("Snapshots written: 1"));
        assert!(!summary.contains("Unwritten"));

        metrics.record_timeout();
        assert!(metrics.summary().contains("Timed out: 1"));
    }
}
