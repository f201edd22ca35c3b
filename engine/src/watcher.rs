//! Debounced batching of changed roots.

use std::collections::HashSet;
use std::time::Duration;

use recast_common::NodeId;
use tokio::time::Instant;
use tracing::trace;

use crate::state::WatcherState;

/// Ordered set of roots, first arrival wins.
#[derive(Debug, Default)]
struct RootQueue {
    order: Vec<NodeId>,
    seen: HashSet<NodeId>,
}

impl RootQueue {
    fn extend(&mut self, roots: impl IntoIterator<Item = NodeId>) -> usize {
        let before = self.order.len();
        for root in roots {
            if self.seen.insert(root) {
                self.order.push(root);
            }
        }
        self.order.len() - before
    }

    fn take(&mut self) -> Vec<NodeId> {
        self.seen.clear();
        std::mem::take(&mut self.order)
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// `Idle → Batching → Reconciling → Idle` state machine.
///
/// Time is passed in explicitly, so the machine runs without a runtime.
#[derive(Debug)]
pub struct ChangeWatcher {
    state: WatcherState,
    debounce: Duration,
    pending: RootQueue,
    /// Roots notified while a pass was in flight.
    queued: RootQueue,
    last_queued_at: Option<Instant>,
}

impl ChangeWatcher {
    pub fn new(debounce: Duration) -> Self {
        Self {
            state: WatcherState::Idle,
            debounce,
            pending: RootQueue::default(),
            queued: RootQueue::default(),
            last_queued_at: None,
        }
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Roots waiting for the next pass, including those queued behind a running one.
    pub fn pending_len(&self) -> usize {
        self.pending.len() + self.queued.len()
    }

    /// Record changed roots observed at `now`.
    pub fn notify(&mut self, roots: impl IntoIterator<Item = NodeId>, now: Instant) {
        let roots: Vec<NodeId> = roots.into_iter().collect();
        if roots.is_empty() {
            return;
        }
        match self.state {
            WatcherState::Idle | WatcherState::Batching { .. } => {
                let added = self.pending.extend(roots);
                trace!(added, pending = self.pending.len(), "Debounce restarted");
                self.state = WatcherState::Batching {
                    deadline: now + self.debounce,
                };
            }
            WatcherState::Reconciling => {
                let added = self.queued.extend(roots);
                self.last_queued_at = Some(now);
                trace!(added, queued = self.queued.len(), "Queued behind running pass");
            }
        }
    }

    /// When the current batch becomes due.
    pub fn deadline(&self) -> Option<Instant> {
        self.state.deadline()
    }

    /// Take the batch if its deadline has passed, entering `Reconciling`.
    pub fn take_due(&mut self, now: Instant) -> Option<Vec<NodeId>> {
        match self.state {
            WatcherState::Batching { deadline } if now >= deadline => {
                self.state = WatcherState::Reconciling;
                Some(self.pending.take())
            }
            _ => None,
        }
    }

    /// Enter `Reconciling` for a pass that ignores the debounce (full scans).
    ///
    /// Pending roots are carried into the queue so none is lost.
    pub fn begin_immediate(&mut self, now: Instant) {
        if self.state.is_reconciling() {
            return;
        }
        let carried = self.pending.take();
        if !carried.is_empty() {
            self.queued.extend(carried);
            self.last_queued_at = Some(now);
        }
        self.state = WatcherState::Reconciling;
    }

    /// Leave `Reconciling`: back to `Idle`, or to `Batching` if roots were queued meanwhile.
    pub fn finish(&mut self, now: Instant) {
        if !self.state.is_reconciling() {
            return;
        }
        if self.queued.is_empty() {
            self.state = WatcherState::Idle;
            return;
        }
        self.pending.extend(self.queued.take());
        let since = self.last_queued_at.take().unwrap_or(now);
        self.state = WatcherState::Batching {
            deadline: since + self.debounce,
        };
    }

    /// Drop everything pending.
    pub fn clear(&mut self) {
        self.pending.take();
        self.queued.take();
        self.last_queued_at = None;
        if !self.state.is_reconciling() {
            self.state = WatcherState::Idle;
        }
    }
}
