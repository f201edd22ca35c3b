//! The host tree seam consumed by the engine.

use recast_common::{NodeId, SubscriptionId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::TreeResult;

/// Text/element distinction of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Text,
    Element,
}

/// What happened to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    /// The node was attached to the tree.
    Added,
    /// The text of a text node changed.
    CharacterData,
}

/// A single change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub target: NodeId,
    pub kind: MutationKind,
}

impl MutationRecord {
    pub fn added(target: NodeId) -> Self {
        Self {
            target,
            kind: MutationKind::Added,
        }
    }

    pub fn character_data(target: NodeId) -> Self {
        Self {
            target,
            kind: MutationKind::CharacterData,
        }
    }
}

/// Records delivered together by the host.
pub type MutationBatch = Vec<MutationRecord>;

/// Receiving end of a mutation feed.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<MutationBatch>,
}

impl Subscription {
    pub fn new(id: SubscriptionId, receiver: mpsc::UnboundedReceiver<MutationBatch>) -> Self {
        Self { id, receiver }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next batch; `None` once the host dropped the feed.
    pub async fn recv(&mut self) -> Option<MutationBatch> {
        self.receiver.recv().await
    }

    /// Take a batch that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<MutationBatch> {
        self.receiver.try_recv().ok()
    }
}

/// A live, mutable document tree.
///
/// Node identities are stable and never reused. Detached or removed nodes report
/// `contains == false` once they are gone from the host.
pub trait HostTree {
    fn root(&self) -> NodeId;

    fn contains(&self, node: NodeId) -> bool;

    fn kind(&self, node: NodeId) -> Option<NodeKind>;

    /// Upper-case tag name of an element.
    fn tag(&self, node: NodeId) -> Option<&str>;

    fn attribute(&self, node: NodeId, name: &str) -> Option<&str>;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    fn children(&self, node: NodeId) -> Vec<NodeId>;

    /// Own text of a text node.
    fn text(&self, node: NodeId) -> Option<&str>;

    fn create_text(&mut self, text: &str) -> NodeId;

    fn create_element(&mut self, tag: &str, attributes: &[(&str, &str)]) -> NodeId;

    /// Replace the text of a text node.
    fn set_text(&mut self, node: NodeId, text: &str) -> TreeResult<()>;

    /// Put `replacement` where `old` is and drop `old`.
    fn replace_node(&mut self, old: NodeId, replacement: NodeId) -> TreeResult<()>;

    /// Insert `node` as the next sibling of `anchor`.
    fn insert_after(&mut self, anchor: NodeId, node: NodeId) -> TreeResult<()>;

    fn append_child(&mut self, parent: NodeId, node: NodeId) -> TreeResult<()>;

    /// Detach and drop `node` with its subtree.
    fn remove_node(&mut self, node: NodeId) -> TreeResult<()>;

    fn subscribe(&mut self) -> Subscription;

    fn unsubscribe(&mut self, id: SubscriptionId);

    fn is_text(&self, node: NodeId) -> bool {
        self.kind(node) == Some(NodeKind::Text)
    }

    fn is_element(&self, node: NodeId) -> bool {
        self.kind(node) == Some(NodeKind::Element)
    }

    /// Concatenated text of every descendant text node, in document order.
    fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            match self.kind(current) {
                Some(NodeKind::Text) => out.push_str(self.text(current).unwrap_or_default()),
                Some(NodeKind::Element) => stack.extend(self.children(current).into_iter().rev()),
                None => {}
            }
        }
        out
    }

    /// Replace all children of `element` with a single text node holding `text`.
    fn set_element_text(&mut self, element: NodeId, text: &str) -> TreeResult<NodeId> {
        if !self.contains(element) {
            return Err(crate::TreeError::NodeNotFound(element));
        }
        if !self.is_element(element) {
            return Err(crate::TreeError::NotAnElement(element));
        }
        for child in self.children(element) {
            self.remove_node(child)?;
        }
        let node = self.create_text(text);
        self.append_child(element, node)?;
        Ok(node)
    }
}
