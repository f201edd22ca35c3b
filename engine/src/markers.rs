//! Side tables recording which nodes were rewritten, scanned or annotated.

use std::collections::HashMap;

use recast_common::NodeId;
use recast_tree::{ancestors, HostTree};

/// Idempotency tag attached to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mark {
    /// A text leaf was replaced by this wrapper element.
    Wrapper { original: String },
    /// This flat container had its text rewritten in place.
    Container { original: String },
    /// Processed, nothing to convert.
    Scanned,
}

impl Mark {
    /// Whether the mark records a rewrite (as opposed to a plain scan).
    pub fn is_rewrite(&self) -> bool {
        matches!(self, Mark::Wrapper { .. } | Mark::Container { .. })
    }
}

/// Marker side table keyed by node.
#[derive(Debug, Default)]
pub struct MarkerSet {
    marks: HashMap<NodeId, Mark>,
}

impl MarkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: NodeId) -> Option<&Mark> {
        self.marks.get(&node)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.marks.contains_key(&node)
    }

    pub fn mark(&mut self, node: NodeId, mark: Mark) {
        self.marks.insert(node, mark);
    }

    /// Mark `node` scanned unless it already carries a mark.
    pub fn mark_scanned(&mut self, node: NodeId) {
        self.marks.entry(node).or_insert(Mark::Scanned);
    }

    /// The nearest marked node among `node` and its ancestors.
    pub fn covering<T: HostTree + ?Sized>(&self, tree: &T, node: NodeId) -> Option<NodeId> {
        std::iter::once(node)
            .chain(ancestors(tree, node))
            .find(|n| self.marks.contains_key(n))
    }

    /// Whether `node` or one of its ancestors carries a rewrite mark.
    pub fn is_rewritten_region<T: HostTree + ?Sized>(&self, tree: &T, node: NodeId) -> bool {
        std::iter::once(node)
            .chain(ancestors(tree, node))
            .any(|n| self.marks.get(&n).map_or(false, Mark::is_rewrite))
    }

    /// Drop `Scanned` marks on `node` and its ancestors. Rewrite marks stay.
    pub fn invalidate_scans<T: HostTree + ?Sized>(&mut self, tree: &T, node: NodeId) -> usize {
        let mut cleared = 0;
        for n in std::iter::once(node).chain(ancestors(tree, node)) {
            if self.marks.get(&n) == Some(&Mark::Scanned) {
                self.marks.remove(&n);
                cleared += 1;
            }
        }
        cleared
    }

    /// Remove every mark, returning the rewrite marks so their originals can be restored.
    pub fn drain_rewrites(&mut self) -> Vec<(NodeId, Mark)> {
        let mut rewrites: Vec<(NodeId, Mark)> = self
            .marks
            .drain()
            .filter(|(_, mark)| mark.is_rewrite())
            .collect();
        rewrites.sort_by_key(|(node, _)| *node);
        rewrites
    }

    /// Forget marks on nodes the host no longer has.
    pub fn prune_detached<T: HostTree + ?Sized>(&mut self, tree: &T) {
        self.marks.retain(|node, _| tree.contains(*node));
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

/// Sections annotated so far, with the badge inserted for each.
#[derive(Debug, Default)]
pub struct BadgeLedger {
    badges: HashMap<NodeId, NodeId>,
}

impl BadgeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_annotated(&self, section: NodeId) -> bool {
        self.badges.contains_key(&section)
    }

    pub fn record(&mut self, section: NodeId, badge: NodeId) {
        self.badges.insert(section, badge);
    }

    pub fn badge_for(&self, section: NodeId) -> Option<NodeId> {
        self.badges.get(&section).copied()
    }

    /// Whether `node` is, or lies inside, a badge.
    pub fn is_badge_region<T: HostTree + ?Sized>(&self, tree: &T, node: NodeId) -> bool {
        std::iter::once(node)
            .chain(ancestors(tree, node))
            .any(|n| self.badges.values().any(|b| *b == n))
    }

    /// Forget entries whose section vanished from the host.
    pub fn prune_detached<T: HostTree + ?Sized>(&mut self, tree: &T) {
        self.badges.retain(|section, _| tree.contains(*section));
    }

    /// Empty the ledger, returning the badge nodes.
    pub fn drain(&mut self) -> Vec<NodeId> {
        let mut badges: Vec<NodeId> = self.badges.drain().map(|(_, badge)| badge).collect();
        badges.sort();
        badges
    }

    pub fn len(&self) -> usize {
        self.badges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.badges.is_empty()
    }
}
