//! Counters describing engine activity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Engine metrics.
#[derive(Debug)]
pub struct Metrics {
    /// Reconciliation passes run.
    pub passes: AtomicU64,
    /// Roots handed to the rewrite engine.
    pub roots_reconciled: AtomicU64,
    /// Roots dropped because they were already marked or gone.
    pub roots_dropped: AtomicU64,
    /// Amounts replaced by their converted value.
    pub amounts_converted: AtomicU64,
    /// Text leaves wrapped or containers rewritten.
    pub nodes_rewritten: AtomicU64,
    /// Percentage badges inserted.
    pub badges_added: AtomicU64,
    /// Marker resets (navigation or rate change).
    pub resets: AtomicU64,
    /// Rate refresh attempts.
    pub rate_refreshes: AtomicU64,
    /// Passes that failed and were absorbed.
    pub pass_failures: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            passes: AtomicU64::new(0),
            roots_reconciled: AtomicU64::new(0),
            roots_dropped: AtomicU64::new(0),
            amounts_converted: AtomicU64::new(0),
            nodes_rewritten: AtomicU64::new(0),
            badges_added: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            rate_refreshes: AtomicU64::new(0),
            pass_failures: AtomicU64::new(0),
        }
    }

    pub fn pass_started(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn roots_reconciled(&self, count: u64) {
        self.roots_reconciled.fetch_add(count, Ordering::Relaxed);
    }

    pub fn roots_dropped(&self, count: u64) {
        self.roots_dropped.fetch_add(count, Ordering::Relaxed);
    }

    /// Record the outcome of rewriting one region.
    pub fn region_rewritten(&self, amounts: u64, nodes: u64) {
        self.amounts_converted.fetch_add(amounts, Ordering::Relaxed);
        self.nodes_rewritten.fetch_add(nodes, Ordering::Relaxed);
    }

    pub fn badge_added(&self) {
        self.badges_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rate_refreshed(&self) {
        self.rate_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pass_failed(&self) {
        self.pass_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            roots_reconciled: self.roots_reconciled.load(Ordering::Relaxed),
            roots_dropped: self.roots_dropped.load(Ordering::Relaxed),
            amounts_converted: self.amounts_converted.load(Ordering::Relaxed),
            nodes_rewritten: self.nodes_rewritten.load(Ordering::Relaxed),
            badges_added: self.badges_added.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            rate_refreshes: self.rate_refreshes.load(Ordering::Relaxed),
            pass_failures: self.pass_failures.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let counters = [
            ("passes_total", "Reconciliation passes run", snapshot.passes),
            ("roots_reconciled_total", "Roots rewritten by a pass", snapshot.roots_reconciled),
            ("roots_dropped_total", "Roots skipped as already processed", snapshot.roots_dropped),
            ("amounts_converted_total", "Amounts converted", snapshot.amounts_converted),
            ("nodes_rewritten_total", "Nodes rewritten", snapshot.nodes_rewritten),
            ("badges_added_total", "Percentage badges inserted", snapshot.badges_added),
            ("resets_total", "Marker resets", snapshot.resets),
            ("rate_refreshes_total", "Exchange rate refreshes", snapshot.rate_refreshes),
            ("pass_failures_total", "Passes that failed", snapshot.pass_failures),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP recast_{name} {help}\n# TYPE recast_{name} counter\nrecast_{name} {value}\n\n"
            ));
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub passes: u64,
    pub roots_reconciled: u64,
    pub roots_dropped: u64,
    pub amounts_converted: u64,
    pub nodes_rewritten: u64,
    pub badges_added: u64,
    pub resets: u64,
    pub rate_refreshes: u64,
    pub pass_failures: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
