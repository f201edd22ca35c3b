//! Tree error types.

use recast_common::NodeId;
use thiserror::Error;

/// Errors raised by host tree operations.
#[derive(Debug, Error)]
pub enum TreeError {
    /// The node does not exist (never created, or removed).
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// The operation needs an element.
    #[error("Node {0} is not an element")]
    NotAnElement(NodeId),

    /// The operation needs a text node.
    #[error("Node {0} is not a text node")]
    NotAText(NodeId),

    /// The node has no parent to insert relative to.
    #[error("Node {0} is detached")]
    Detached(NodeId),

    /// The document root cannot be detached or replaced.
    #[error("Node {0} is the document root")]
    RootNode(NodeId),

    /// The insertion would make a node its own ancestor.
    #[error("Inserting {node} under {parent} would create a cycle")]
    Cycle { node: NodeId, parent: NodeId },
}

/// Result type for tree operations.
pub type TreeResult<T> = Result<T, TreeError>;
