//! Generic preorder traversal driven by a visitor.

use recast_common::NodeId;

use crate::host::HostTree;

/// Visitor verdict for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Yield the node and keep descending.
    Accept,
    /// Yield the node; it stands for its whole subtree.
    AcceptSubtree,
    /// Do not yield the node, but visit its children.
    Skip,
    /// Do not yield the node nor anything below it.
    Prune,
}

/// Collect the nodes under `root` (inclusive) accepted by `visitor`, in document order.
pub fn walk<T, F>(tree: &T, root: NodeId, mut visitor: F) -> Vec<NodeId>
where
    T: HostTree + ?Sized,
    F: FnMut(&T, NodeId) -> Visit,
{
    let mut accepted = Vec::new();
    if !tree.contains(root) {
        return accepted;
    }

    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        let descend = match visitor(tree, node) {
            Visit::Accept => {
                accepted.push(node);
                true
            }
            Visit::AcceptSubtree => {
                accepted.push(node);
                false
            }
            Visit::Skip => true,
            Visit::Prune => false,
        };
        if descend {
            stack.extend(tree.children(node).into_iter().rev());
        }
    }
    accepted
}

/// Parent chain of `node`, nearest first, excluding `node` itself.
pub fn ancestors<T>(tree: &T, node: NodeId) -> Ancestors<'_, T>
where
    T: HostTree + ?Sized,
{
    Ancestors {
        tree,
        next: tree.parent(node),
    }
}

/// Iterator returned by [`ancestors`].
pub struct Ancestors<'a, T: ?Sized> {
    tree: &'a T,
    next: Option<NodeId>,
}

impl<'a, T> Iterator for Ancestors<'a, T>
where
    T: HostTree + ?Sized,
{
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.parent(current);
        Some(current)
    }
}

/// Whether `node` lies in the subtree rooted at `root` (inclusive).
pub fn is_within<T>(tree: &T, node: NodeId, root: NodeId) -> bool
where
    T: HostTree + ?Sized,
{
    node == root || ancestors(tree, node).any(|a| a == root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    fn sample() -> (Document, NodeId, NodeId, NodeId) {
        let mut doc = Document::new();
        let root = doc.root();
        let div = doc.add_element(root, "div");
        doc.add_text(div, "a");
        let script = doc.add_element(root, "script");
        doc.add_text(script, "var x;");
        let b = doc.add_text(root, "b");
        (doc, div, script, b)
    }

    #[test]
    fn test_walk_document_order() {
        let (doc, _, _, _) = sample();
        let texts: Vec<String> = walk(&doc, doc.root(), |t, n| {
            if t.is_text(n) {
                Visit::Accept
            } else {
                Visit::Skip
            }
        })
        .into_iter()
        .map(|n| doc.text(n).unwrap().to_string())
        .collect();

        assert_eq!(texts, vec!["a", "var x;", "b"]);
    }

    #[test]
    fn test_walk_prune_and_accept_subtree() {
        let (doc, div, script, _) = sample();
        let nodes = walk(&doc, doc.root(), |t, n| {
            if n == script {
                Visit::Prune
            } else if n == div {
                Visit::AcceptSubtree
            } else if t.is_text(n) {
                Visit::Accept
            } else {
                Visit::Skip
            }
        });

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0], div);
        assert_eq!(doc.text(nodes[1]), Some("b"));
    }

    #[test]
    fn test_ancestors() {
        let (doc, div, _, _) = sample();
        let a = doc.children(div)[0];
        let chain: Vec<NodeId> = ancestors(&doc, a).collect();

        assert_eq!(chain, vec![div, doc.root()]);
        assert!(is_within(&doc, a, div));
        assert!(!is_within(&doc, div, a));
    }
}
