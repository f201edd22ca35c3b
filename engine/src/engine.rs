//! The engine instance owning all rewrite state.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use recast_common::NodeId;
use recast_fx::{Converter, RefreshOutcome, SharedRateCache};
use recast_tree::{HostTree, MutationRecord, NodeKind};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::annotator::{BadgePlacement, PercentageAnnotator};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::extractor::AmountExtractor;
use crate::markers::{BadgeLedger, Mark, MarkerSet};
use crate::metrics::{Metrics, SharedMetrics};
use crate::rewrite::RewriteEngine;
use crate::watcher::ChangeWatcher;

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Roots rewritten.
    pub roots_reconciled: usize,
    /// Roots skipped because they were gone or already marked.
    pub roots_dropped: usize,
    /// Roots held back until a rate is loaded.
    pub roots_deferred: usize,
    pub amounts_converted: usize,
    pub nodes_rewritten: usize,
}

/// Converts source-currency amounts in a host tree and keeps it converted.
///
/// All passes take `&mut self`, so at most one runs at a time.
pub struct Engine {
    config: EngineConfig,
    rates: SharedRateCache,
    rewriter: RewriteEngine,
    annotator: PercentageAnnotator,
    watcher: ChangeWatcher,
    markers: MarkerSet,
    badges: BadgeLedger,
    /// Roots of passes that ran without a rate.
    deferred: Vec<NodeId>,
    navigation: Option<String>,
    metrics: SharedMetrics,
}

impl Engine {
    /// Create an engine from `config` reading rates from `rates`.
    pub fn new(config: EngineConfig, rates: SharedRateCache) -> EngineResult<Self> {
        Self::with_metrics(config, rates, Arc::new(Metrics::new()))
    }

    /// Create an engine reporting into existing metrics.
    pub fn with_metrics(
        config: EngineConfig,
        rates: SharedRateCache,
        metrics: SharedMetrics,
    ) -> EngineResult<Self> {
        config.validate().map_err(EngineError::Config)?;
        let pair = config.pair();
        if rates.pair() != &pair {
            return Err(EngineError::Config(format!(
                "Rate cache converts {} but the engine converts {}",
                rates.pair(),
                pair
            )));
        }

        let extractor = AmountExtractor::new(&config.source_currency.markers())?;
        let rewriter = RewriteEngine::new(extractor, Converter::new(pair), config.skip_tags.clone());
        let annotator = PercentageAnnotator::new(config.annotator.clone(), &config.target_currency)?;

        Ok(Self {
            watcher: ChangeWatcher::new(config.timing.debounce),
            config,
            rates,
            rewriter,
            annotator,
            markers: MarkerSet::new(),
            badges: BadgeLedger::new(),
            deferred: Vec::new(),
            navigation: None,
            metrics,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn markers(&self) -> &MarkerSet {
        &self.markers
    }

    pub fn badges(&self) -> &BadgeLedger {
        &self.badges
    }

    pub fn watcher(&self) -> &ChangeWatcher {
        &self.watcher
    }

    /// The last navigation key seen.
    pub fn navigation(&self) -> Option<&str> {
        self.navigation.as_deref()
    }

    /// Refresh the rate if stale.
    #[instrument(skip(self))]
    pub async fn refresh_rate(&self) -> RefreshOutcome {
        self.metrics.rate_refreshed();
        self.rates.refresh_if_stale().await
    }

    /// Refresh the rate from the provider regardless of freshness.
    #[instrument(skip(self))]
    pub async fn force_refresh_rate(&self) -> RefreshOutcome {
        self.metrics.rate_refreshed();
        self.rates.force_refresh().await
    }

    /// Turn host notifications into changed roots. Returns the number of roots notified.
    pub fn ingest<T: HostTree + ?Sized>(
        &mut self,
        tree: &T,
        batch: &[MutationRecord],
        now: Instant,
    ) -> usize {
        let mut roots = Vec::with_capacity(batch.len());
        for record in batch {
            let target = record.target;
            if !tree.contains(target) {
                continue;
            }
            if self.markers.is_rewritten_region(tree, target)
                || self.badges.is_badge_region(tree, target)
            {
                continue;
            }
            self.markers.invalidate_scans(tree, target);

            let root = match tree.kind(target) {
                Some(NodeKind::Text) => tree.parent(target),
                Some(NodeKind::Element) => Some(target),
                None => None,
            };
            if let Some(root) = root {
                roots.push(root);
            }
        }

        let count = roots.len();
        if count > 0 {
            debug!(records = batch.len(), roots = count, "Changes observed");
        }
        self.watcher.notify(roots, now);
        count
    }

    /// Hand roots deferred for lack of a rate back to the watcher once one is loaded.
    pub fn requeue_deferred(&mut self, now: Instant) -> usize {
        if self.deferred.is_empty() || self.rates.get_rate().is_none() {
            return 0;
        }
        let roots = std::mem::take(&mut self.deferred);
        let count = roots.len();
        debug!(roots = count, "Requeueing deferred roots");
        self.watcher.notify(roots, now);
        count
    }

    /// Take the debounced batch if it is due.
    pub fn take_due(&mut self, now: Instant) -> Option<Vec<NodeId>> {
        self.watcher.take_due(now)
    }

    /// Start a whole-document pass, bypassing the debounce.
    pub fn begin_full_scan<T: HostTree + ?Sized>(&mut self, tree: &T, now: Instant) -> Vec<NodeId> {
        self.watcher.begin_immediate(now);
        vec![tree.root()]
    }

    /// Close the running pass; roots notified meanwhile start the next batch.
    pub fn finish_pass(&mut self, now: Instant) {
        self.watcher.finish(now);
    }

    /// Run the rewrite engine over `roots`.
    pub fn reconcile<T: HostTree + ?Sized>(&mut self, tree: &mut T, roots: &[NodeId]) -> PassReport {
        let metrics = self.metrics.clone();
        Self::guarded(&metrics, "reconcile", || self.reconcile_roots(tree, roots))
    }

    /// Take, run and finish a full pass in one call.
    pub fn full_pass<T: HostTree + ?Sized>(&mut self, tree: &mut T, now: Instant) -> PassReport {
        let roots = self.begin_full_scan(&*tree, now);
        let report = self.reconcile(tree, &roots);
        self.finish_pass(now);
        report
    }

    fn reconcile_roots<T: HostTree + ?Sized>(
        &mut self,
        tree: &mut T,
        roots: &[NodeId],
    ) -> EngineResult<PassReport> {
        self.metrics.pass_started();
        let mut report = PassReport::default();

        let Some(rate) = self.rates.get_rate() else {
            warn!(roots = roots.len(), "No exchange rate loaded, pass deferred");
            for root in roots {
                if !self.deferred.contains(root) {
                    self.deferred.push(*root);
                }
            }
            report.roots_deferred = roots.len();
            return Ok(report);
        };

        self.markers.prune_detached(&*tree);
        for root in roots {
            if !tree.contains(*root) || self.markers.covering(&*tree, *root).is_some() {
                report.roots_dropped += 1;
                continue;
            }
            match self
                .rewriter
                .apply_to_region(tree, &mut self.markers, *root, Some(&rate))
            {
                Ok(outcome) if outcome.skipped => report.roots_dropped += 1,
                Ok(outcome) => {
                    report.roots_reconciled += 1;
                    report.amounts_converted += outcome.amounts_converted;
                    report.nodes_rewritten += outcome.nodes_rewritten;
                }
                Err(e) => {
                    self.metrics.pass_failed();
                    warn!(%root, error = %e, "Region rewrite failed");
                }
            }
        }

        self.metrics.roots_reconciled(report.roots_reconciled as u64);
        self.metrics.roots_dropped(report.roots_dropped as u64);
        self.metrics
            .region_rewritten(report.amounts_converted as u64, report.nodes_rewritten as u64);
        info!(
            rate = %rate.value,
            roots = report.roots_reconciled,
            dropped = report.roots_dropped,
            amounts = report.amounts_converted,
            "Reconciliation pass complete"
        );
        Ok(report)
    }

    /// Add percentage badges to sections that lack one.
    pub fn annotate<T: HostTree + ?Sized>(&mut self, tree: &mut T) -> Vec<BadgePlacement> {
        let metrics = self.metrics.clone();
        let placements = Self::guarded(&metrics, "annotate", || {
            let root = tree.root();
            self.annotator
                .annotate(tree, &mut self.markers, &mut self.badges, root)
        });
        for _ in &placements {
            metrics.badge_added();
        }
        placements
    }

    /// Undo every rewrite and badge. Rewritten regions get their original text back.
    pub fn reset<T: HostTree + ?Sized>(&mut self, tree: &mut T) {
        let metrics = self.metrics.clone();
        Self::guarded(&metrics, "reset", || self.restore(tree));
        metrics.reset();
    }

    fn restore<T: HostTree + ?Sized>(&mut self, tree: &mut T) -> EngineResult<()> {
        let rewrites = self.markers.drain_rewrites();
        let badges = self.badges.drain();
        let (restored, removed) = (rewrites.len(), badges.len());

        for (node, mark) in rewrites {
            if !tree.contains(node) {
                continue;
            }
            let result = match mark {
                Mark::Wrapper { original } => {
                    let text = tree.create_text(&original);
                    tree.replace_node(node, text)
                }
                Mark::Container { original } => tree.set_element_text(node, &original).map(|_| ()),
                Mark::Scanned => Ok(()),
            };
            if let Err(e) = result {
                warn!(%node, error = %e, "Failed to restore original text");
            }
        }

        for badge in badges {
            if tree.contains(badge) {
                tree.remove_node(badge)?;
            }
        }

        info!(restored, badges = removed, "Conversion state reset");
        Ok(())
    }

    /// Record the navigation key; a different key than the last one resets all state.
    pub fn navigate<T: HostTree + ?Sized>(&mut self, tree: &mut T, key: &str) -> bool {
        let previous = self.navigation.replace(key.to_string());
        match previous {
            Some(previous) if previous != key => {
                info!(from = %previous, to = key, "Navigation detected");
                self.reset(tree);
                self.watcher.clear();
                self.deferred.clear();
                true
            }
            _ => false,
        }
    }

    /// Run a pass, absorbing errors and panics so the caller keeps going.
    pub fn guarded<R: Default>(
        metrics: &Metrics,
        pass: &'static str,
        f: impl FnOnce() -> EngineResult<R>,
    ) -> R {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                metrics.pass_failed();
                error!(pass, error = %e, "Pass failed");
                R::default()
            }
            Err(payload) => {
                metrics.pass_failed();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(pass, panic = %message, "Pass panicked");
                R::default()
            }
        }
    }
}
