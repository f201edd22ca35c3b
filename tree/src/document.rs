//! In-memory arena document implementing [`HostTree`].

use std::collections::{BTreeMap, HashMap};

use recast_common::{NodeId, SubscriptionId};
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{TreeError, TreeResult};
use crate::fragment::Fragment;
use crate::host::{HostTree, MutationBatch, MutationRecord, NodeKind, Subscription};

#[derive(Debug, Clone)]
enum Body {
    Text(String),
    Element {
        tag: String,
        attributes: BTreeMap<String, String>,
        children: Vec<NodeId>,
    },
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    body: Body,
}

/// A mutable document with a `BODY` root.
///
/// Every structural change to a node connected to the root is reported to the
/// subscribers, one batch per operation or one batch per [`Document::batched`] call.
#[derive(Debug)]
pub struct Document {
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    next_id: u64,
    subscribers: Vec<(SubscriptionId, mpsc::UnboundedSender<MutationBatch>)>,
    pending: Option<MutationBatch>,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        let root = NodeId::new(1);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node {
                parent: None,
                body: Body::Element {
                    tag: "BODY".to_string(),
                    attributes: BTreeMap::new(),
                    children: Vec::new(),
                },
            },
        );
        Self {
            nodes,
            root,
            next_id: 2,
            subscribers: Vec::new(),
            pending: None,
        }
    }

    /// Create a document whose body holds `fragments`.
    pub fn from_fragments(fragments: &[Fragment]) -> TreeResult<Self> {
        let mut doc = Self::new();
        let root = doc.root;
        for fragment in fragments {
            doc.build(root, fragment)?;
        }
        Ok(doc)
    }

    /// Append a new element under `parent` and return it.
    ///
    /// Panics if `parent` is not an element.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn add_element(&mut self, parent: NodeId, tag: &str) -> NodeId {
        let node = self.create_element(tag, &[]);
        if let Err(e) = self.append_child(parent, node) {
            panic!("cannot append <{tag}> to {parent}: {e}");
        }
        node
    }

    /// Append a new text node under `parent` and return it.
    ///
    /// Panics if `parent` is not an element.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn add_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        let node = self.create_text(text);
        if let Err(e) = self.append_child(parent, node) {
            panic!("cannot append text to {parent}: {e}");
        }
        node
    }

    /// Materialize `fragment` detached, then attach it under `parent` in one step.
    pub fn build(&mut self, parent: NodeId, fragment: &Fragment) -> TreeResult<NodeId> {
        let node = self.materialize(fragment);
        self.append_child(parent, node)?;
        Ok(node)
    }

    fn materialize(&mut self, fragment: &Fragment) -> NodeId {
        match fragment {
            Fragment::Text(text) => self.create_text(text),
            Fragment::Element {
                tag,
                attrs,
                children,
            } => {
                let attributes: Vec<(&str, &str)> =
                    attrs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
                let element = self.create_element(tag, &attributes);
                for child in children {
                    let child = self.materialize(child);
                    if let Some(Body::Element { children: kids, .. }) =
                        self.nodes.get_mut(&element).map(|n| &mut n.body)
                    {
                        kids.push(child);
                    }
                    if let Some(node) = self.nodes.get_mut(&child) {
                        node.parent = Some(element);
                    }
                }
                element
            }
        }
    }

    /// Run `f` and deliver every record it produced as one batch.
    pub fn batched<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let outer = self.pending.is_some();
        if !outer {
            self.pending = Some(Vec::new());
        }
        let result = f(self);
        if !outer {
            if let Some(batch) = self.pending.take() {
                self.dispatch(batch);
            }
        }
        result
    }

    /// First element carrying `id="<id>"`.
    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        crate::walk::walk(self, self.root, |tree, node| {
            if tree.attribute(node, "id") == Some(id) {
                crate::Visit::AcceptSubtree
            } else {
                crate::Visit::Skip
            }
        })
        .into_iter()
        .next()
    }

    /// Whether `node` is attached, directly or transitively, to the root.
    pub fn is_connected(&self, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == self.root {
                return true;
            }
            current = self.nodes.get(&id).and_then(|n| n.parent);
        }
        false
    }

    /// Number of live nodes, connected or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Serialize `node` and its subtree as HTML.
    pub fn to_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_html(node, &mut out);
        out
    }

    fn write_html(&self, node: NodeId, out: &mut String) {
        let Some(data) = self.nodes.get(&node) else {
            return;
        };
        match &data.body {
            Body::Text(text) => out.push_str(&escape(text, false)),
            Body::Element {
                tag,
                attributes,
                children,
            } => {
                let tag = tag.to_lowercase();
                out.push('<');
                out.push_str(&tag);
                for (name, value) in attributes {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape(value, true));
                    out.push('"');
                }
                out.push('>');
                for child in children {
                    self.write_html(*child, out);
                }
                out.push_str("</");
                out.push_str(&tag);
                out.push('>');
            }
        }
    }

    fn allocate(&mut self, body: Body) -> NodeId {
        let id = NodeId::new(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node { parent: None, body });
        id
    }

    fn children_mut(&mut self, node: NodeId) -> TreeResult<&mut Vec<NodeId>> {
        match self.nodes.get_mut(&node) {
            Some(Node {
                body: Body::Element { children, .. },
                ..
            }) => Ok(children),
            Some(_) => Err(TreeError::NotAnElement(node)),
            None => Err(TreeError::NodeNotFound(node)),
        }
    }

    fn parent_of(&self, node: NodeId) -> TreeResult<NodeId> {
        let data = self.nodes.get(&node).ok_or(TreeError::NodeNotFound(node))?;
        data.parent.ok_or(TreeError::Detached(node))
    }

    /// Reject moves that would put `node` under itself.
    fn check_insertable(&self, parent: NodeId, node: NodeId) -> TreeResult<()> {
        if !self.nodes.contains_key(&node) {
            return Err(TreeError::NodeNotFound(node));
        }
        if node == self.root {
            return Err(TreeError::RootNode(node));
        }
        let mut current = Some(parent);
        while let Some(id) = current {
            if id == node {
                return Err(TreeError::Cycle { node, parent });
            }
            current = self.nodes.get(&id).and_then(|n| n.parent);
        }
        Ok(())
    }

    fn detach(&mut self, node: NodeId) {
        let parent = self.nodes.get(&node).and_then(|n| n.parent);
        if let Some(parent) = parent {
            if let Ok(children) = self.children_mut(parent) {
                children.retain(|c| *c != node);
            }
        }
        if let Some(data) = self.nodes.get_mut(&node) {
            data.parent = None;
        }
    }

    fn drop_subtree(&mut self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if let Some(Node {
                body: Body::Element { children, .. },
                ..
            }) = self.nodes.remove(&id)
            {
                stack.extend(children);
            }
        }
    }

    fn record(&mut self, record: MutationRecord) {
        if !self.is_connected(record.target) {
            return;
        }
        match self.pending.as_mut() {
            Some(pending) => pending.push(record),
            None => self.dispatch(vec![record]),
        }
    }

    fn dispatch(&mut self, batch: MutationBatch) {
        if batch.is_empty() || self.subscribers.is_empty() {
            return;
        }
        trace!(records = batch.len(), subscribers = self.subscribers.len(), "Dispatching mutations");
        self.subscribers
            .retain(|(_, sender)| sender.send(batch.clone()).is_ok());
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl HostTree for Document {
    fn root(&self) -> NodeId {
        self.root
    }

    fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    fn kind(&self, node: NodeId) -> Option<NodeKind> {
        self.nodes.get(&node).map(|n| match n.body {
            Body::Text(_) => NodeKind::Text,
            Body::Element { .. } => NodeKind::Element,
        })
    }

    fn tag(&self, node: NodeId) -> Option<&str> {
        match self.nodes.get(&node).map(|n| &n.body) {
            Some(Body::Element { tag, .. }) => Some(tag.as_str()),
            _ => None,
        }
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        match self.nodes.get(&node).map(|n| &n.body) {
            Some(Body::Element { attributes, .. }) => attributes.get(name).map(String::as_str),
            _ => None,
        }
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(&node).and_then(|n| n.parent)
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        match self.nodes.get(&node).map(|n| &n.body) {
            Some(Body::Element { children, .. }) => children.clone(),
            _ => Vec::new(),
        }
    }

    fn text(&self, node: NodeId) -> Option<&str> {
        match self.nodes.get(&node).map(|n| &n.body) {
            Some(Body::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    fn create_text(&mut self, text: &str) -> NodeId {
        self.allocate(Body::Text(text.to_string()))
    }

    fn create_element(&mut self, tag: &str, attributes: &[(&str, &str)]) -> NodeId {
        self.allocate(Body::Element {
            tag: tag.to_uppercase(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            children: Vec::new(),
        })
    }

    fn set_text(&mut self, node: NodeId, text: &str) -> TreeResult<()> {
        match self.nodes.get_mut(&node).map(|n| &mut n.body) {
            Some(Body::Text(current)) => {
                if current != text {
                    *current = text.to_string();
                    self.record(MutationRecord::character_data(node));
                }
                Ok(())
            }
            Some(_) => Err(TreeError::NotAText(node)),
            None => Err(TreeError::NodeNotFound(node)),
        }
    }

    fn replace_node(&mut self, old: NodeId, replacement: NodeId) -> TreeResult<()> {
        if old == replacement {
            return Ok(());
        }
        if old == self.root {
            return Err(TreeError::RootNode(old));
        }
        let parent = self.parent_of(old)?;
        self.check_insertable(parent, replacement)?;
        self.detach(replacement);

        let children = self.children_mut(parent)?;
        let index = children
            .iter()
            .position(|c| *c == old)
            .ok_or(TreeError::Detached(old))?;
        children[index] = replacement;
        if let Some(data) = self.nodes.get_mut(&replacement) {
            data.parent = Some(parent);
        }
        self.drop_subtree(old);
        self.record(MutationRecord::added(replacement));
        Ok(())
    }

    fn insert_after(&mut self, anchor: NodeId, node: NodeId) -> TreeResult<()> {
        let parent = self.parent_of(anchor)?;
        self.check_insertable(parent, node)?;
        self.detach(node);

        let children = self.children_mut(parent)?;
        let index = children
            .iter()
            .position(|c| *c == anchor)
            .ok_or(TreeError::Detached(anchor))?;
        children.insert(index + 1, node);
        if let Some(data) = self.nodes.get_mut(&node) {
            data.parent = Some(parent);
        }
        self.record(MutationRecord::added(node));
        Ok(())
    }

    fn append_child(&mut self, parent: NodeId, node: NodeId) -> TreeResult<()> {
        self.children_mut(parent)?;
        self.check_insertable(parent, node)?;
        self.detach(node);

        self.children_mut(parent)?.push(node);
        if let Some(data) = self.nodes.get_mut(&node) {
            data.parent = Some(parent);
        }
        self.record(MutationRecord::added(node));
        Ok(())
    }

    fn remove_node(&mut self, node: NodeId) -> TreeResult<()> {
        if node == self.root {
            return Err(TreeError::RootNode(node));
        }
        if !self.nodes.contains_key(&node) {
            return Err(TreeError::NodeNotFound(node));
        }
        self.detach(node);
        self.drop_subtree(node);
        Ok(())
    }

    fn subscribe(&mut self) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = SubscriptionId::new();
        self.subscribers.push((id, sender));
        Subscription::new(id, receiver)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(sub, _)| *sub != id);
    }
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
