//! Change watcher state definitions.

use tokio::time::Instant;

/// Watcher operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Nothing pending.
    Idle,
    /// Collecting roots until the debounce deadline passes.
    Batching { deadline: Instant },
    /// A pass over the taken batch is in flight.
    Reconciling,
}

impl WatcherState {
    /// Check if a pass is in flight.
    pub fn is_reconciling(&self) -> bool {
        matches!(self, WatcherState::Reconciling)
    }

    /// Pending deadline, if batching.
    pub fn deadline(&self) -> Option<Instant> {
        match self {
            WatcherState::Batching { deadline } => Some(*deadline),
            _ => None,
        }
    }
}
