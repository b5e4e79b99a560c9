//! In-memory document tree.
//!
//! Arena-backed: nodes are never reclaimed, so a `NodeId` stays meaningful
//! for the lifetime of the document even after the node is detached.

use super::{Document, Listener, ListenerToken, NodeId, NodeKind};
use crate::events::{EventKind, NativeEvent};
use std::cell::RefCell;
use std::fmt::Write as _;
use tracing::warn;

#[derive(Debug)]
enum NodeContent {
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
    },
    Text(String),
}

struct NodeData {
    content: NodeContent,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    listeners: Vec<(ListenerToken, &'static str, Listener)>,
}

impl NodeData {
    fn new(content: NodeContent) -> Self {
        Self {
            content,
            parent: None,
            children: Vec::new(),
            listeners: Vec::new(),
        }
    }
}

struct Inner {
    nodes: Vec<NodeData>,
    next_token: u64,
    listeners_added: u64,
    listeners_removed: u64,
}

impl Inner {
    fn get(&self, node: NodeId) -> Option<&NodeData> {
        self.nodes.get(node.0 as usize)
    }

    fn get_mut(&mut self, node: NodeId) -> Option<&mut NodeData> {
        self.nodes.get_mut(node.0 as usize)
    }

    fn push(&mut self, content: NodeContent) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeData::new(content));
        id
    }

    fn detach(&mut self, child: NodeId) {
        let parent = match self.get_mut(child) {
            Some(data) => data.parent.take(),
            None => return,
        };
        if let Some(parent) = parent.and_then(|p| self.get_mut(p)) {
            parent.children.retain(|c| *c != child);
        }
    }
}

/// Document tree held entirely in memory.
///
/// Meant for tests, demos and benches: detached and replaced nodes stay in
/// the arena, so memory grows with every create or conversion for the
/// lifetime of the document. Long-running hosts should drive a real
/// document through [`Document`] instead.
pub struct MemoryDocument {
    inner: RefCell<Inner>,
    root: NodeId,
    head: NodeId,
    body: NodeId,
}

impl MemoryDocument {
    /// Create a document with `html`, `head` and `body`
    pub fn new() -> Self {
        let mut inner = Inner {
            nodes: Vec::new(),
            next_token: 0,
            listeners_added: 0,
            listeners_removed: 0,
        };

        let element = |tag: &str| NodeContent::Element {
            tag: tag.to_string(),
            attributes: Vec::new(),
        };

        let root = inner.push(element("html"));
        let head = inner.push(element("head"));
        let body = inner.push(element("body"));

        for child in [head, body] {
            inner.nodes[child.0 as usize].parent = Some(root);
            inner.nodes[root.0 as usize].children.push(child);
        }

        Self {
            inner: RefCell::new(inner),
            root,
            head,
            body,
        }
    }

    /// Create a document whose body holds an empty element with the given id
    pub fn with_mount(mount_id: &str) -> Self {
        let document = Self::new();
        let mount = document.create_element("div");
        document.set_attribute(mount, "id", mount_id);
        document.append_child(document.body, mount);
        document
    }

    /// The `html` element
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The `body` element
    pub fn body(&self) -> NodeId {
        self.body
    }

    /// Tag of an element
    pub fn tag(&self, node: NodeId) -> Option<String> {
        match &self.inner.borrow().get(node)?.content {
            NodeContent::Element { tag, .. } => Some(tag.clone()),
            NodeContent::Text(_) => None,
        }
    }

    /// Value of a single attribute
    pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        match &self.inner.borrow().get(node)?.content {
            NodeContent::Element { attributes, .. } => attributes
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone()),
            NodeContent::Text(_) => None,
        }
    }

    /// Whether `node` is reachable from the document root
    pub fn is_connected(&self, node: NodeId) -> bool {
        let inner = self.inner.borrow();
        let mut current = Some(node);
        while let Some(id) = current {
            if id == self.root {
                return true;
            }
            current = inner.get(id).and_then(|data| data.parent);
        }
        false
    }

    /// Number of listeners installed on `node` for `event_name`
    pub fn listener_count(&self, node: NodeId, event_name: &str) -> usize {
        self.inner
            .borrow()
            .get(node)
            .map(|data| {
                data.listeners
                    .iter()
                    .filter(|(_, name, _)| *name == event_name)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Total listeners installed over the document's lifetime
    pub fn listeners_added(&self) -> u64 {
        self.inner.borrow().listeners_added
    }

    /// Total listeners removed over the document's lifetime
    pub fn listeners_removed(&self) -> u64 {
        self.inner.borrow().listeners_removed
    }

    /// Fire a native event at `node`, returning how many listeners ran.
    ///
    /// Listeners are snapshotted before any runs, so a listener may freely
    /// mutate the tree (including removing itself).
    pub fn dispatch(&self, node: NodeId, event_name: &str, event: &NativeEvent) -> usize {
        let listeners: Vec<Listener> = match self.inner.borrow().get(node) {
            Some(data) => data
                .listeners
                .iter()
                .filter(|(_, name, _)| *name == event_name)
                .map(|(_, _, listener)| listener.clone())
                .collect(),
            None => return 0,
        };

        for listener in &listeners {
            listener(event);
        }

        listeners.len()
    }

    /// Fire a native event of a known kind
    pub fn dispatch_kind(&self, node: NodeId, kind: EventKind, event: &NativeEvent) -> usize {
        self.dispatch(node, kind.name(), event)
    }

    /// Render the subtree at `node` as markup
    pub fn to_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.render(node, &mut out);
        out
    }

    fn render(&self, node: NodeId, out: &mut String) {
        let (open, children) = {
            let inner = self.inner.borrow();
            let Some(data) = inner.get(node) else {
                return;
            };
            match &data.content {
                NodeContent::Text(text) => {
                    out.push_str(&escape(text, false));
                    return;
                }
                NodeContent::Element { tag, attributes } => {
                    let mut open = format!("<{}", tag);
                    for (name, value) in attributes {
                        let _ = write!(open, " {}=\"{}\"", name, escape(value, true));
                    }
                    open.push('>');
                    (open, data.children.clone())
                }
            }
        };

        out.push_str(&open);
        for child in children {
            self.render(child, out);
        }
        if let Some(tag) = self.tag(node) {
            let _ = write!(out, "</{}>", tag);
        }
    }
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

fn escape(text: &str, attribute: bool) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' if attribute => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

impl Document for MemoryDocument {
    fn create_element(&self, tag: &str) -> NodeId {
        self.inner.borrow_mut().push(NodeContent::Element {
            tag: tag.to_string(),
            attributes: Vec::new(),
        })
    }

    fn create_text_node(&self, text: &str) -> NodeId {
        self.inner
            .borrow_mut()
            .push(NodeContent::Text(text.to_string()))
    }

    fn node_kind(&self, node: NodeId) -> Option<NodeKind> {
        self.inner.borrow().get(node).map(|data| match data.content {
            NodeContent::Element { .. } => NodeKind::Element,
            NodeContent::Text(_) => NodeKind::Text,
        })
    }

    fn set_attribute(&self, node: NodeId, name: &str, value: &str) {
        let mut inner = self.inner.borrow_mut();
        match inner.get_mut(node).map(|data| &mut data.content) {
            Some(NodeContent::Element { attributes, .. }) => {
                match attributes.iter_mut().find(|(k, _)| k == name) {
                    Some(existing) => existing.1 = value.to_string(),
                    None => attributes.push((name.to_string(), value.to_string())),
                }
            }
            _ => warn!(node = node.0, name, "set_attribute on a non-element"),
        }
    }

    fn remove_attribute(&self, node: NodeId, name: &str) {
        let mut inner = self.inner.borrow_mut();
        if let Some(NodeContent::Element { attributes, .. }) =
            inner.get_mut(node).map(|data| &mut data.content)
        {
            attributes.retain(|(k, _)| k != name);
        }
    }

    fn attributes(&self, node: NodeId) -> Vec<(String, String)> {
        match self.inner.borrow().get(node).map(|data| &data.content) {
            Some(NodeContent::Element { attributes, .. }) => attributes.clone(),
            _ => Vec::new(),
        }
    }

    fn set_text(&self, node: NodeId, text: &str) {
        let mut inner = self.inner.borrow_mut();
        match inner.get_mut(node).map(|data| &mut data.content) {
            Some(NodeContent::Text(content)) => *content = text.to_string(),
            _ => warn!(node = node.0, "set_text on a non-text node"),
        }
    }

    fn text(&self, node: NodeId) -> Option<String> {
        match &self.inner.borrow().get(node)?.content {
            NodeContent::Text(text) => Some(text.clone()),
            NodeContent::Element { .. } => None,
        }
    }

    fn append_child(&self, parent: NodeId, child: NodeId) {
        let mut inner = self.inner.borrow_mut();
        if inner.get(parent).is_none() || inner.get(child).is_none() {
            warn!(parent = parent.0, child = child.0, "append_child on unknown node");
            return;
        }
        inner.detach(child);
        if let Some(data) = inner.get_mut(child) {
            data.parent = Some(parent);
        }
        if let Some(data) = inner.get_mut(parent) {
            data.children.push(child);
        }
    }

    fn remove_child(&self, parent: NodeId, child: NodeId) {
        let mut inner = self.inner.borrow_mut();
        if inner.get(child).and_then(|data| data.parent) == Some(parent) {
            inner.detach(child);
        } else {
            warn!(parent = parent.0, child = child.0, "remove_child on a non-child");
        }
    }

    fn replace_child(&self, parent: NodeId, new: NodeId, old: NodeId) {
        let mut inner = self.inner.borrow_mut();
        let position = inner
            .get(parent)
            .and_then(|data| data.children.iter().position(|c| *c == old));

        let Some(position) = position else {
            warn!(parent = parent.0, old = old.0, "replace_child on a non-child");
            return;
        };

        inner.detach(new);
        if let Some(data) = inner.get_mut(old) {
            data.parent = None;
        }
        if let Some(data) = inner.get_mut(new) {
            data.parent = Some(parent);
        }
        if let Some(data) = inner.get_mut(parent) {
            // `detach(new)` may have shifted siblings
            let position = data
                .children
                .iter()
                .position(|c| *c == old)
                .unwrap_or(position);
            data.children[position] = new;
        }
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.inner.borrow().get(node)?.parent
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.inner
            .borrow()
            .get(node)
            .map(|data| data.children.clone())
            .unwrap_or_default()
    }

    fn head(&self) -> NodeId {
        self.head
    }

    fn element_by_id(&self, id: &str) -> Option<NodeId> {
        let inner = self.inner.borrow();
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            let data = inner.get(node)?;
            if let NodeContent::Element { attributes, .. } = &data.content {
                if attributes.iter().any(|(k, v)| k == "id" && v == id) {
                    return Some(node);
                }
            }
            stack.extend(data.children.iter().rev().copied());
        }
        None
    }

    fn add_event_listener(
        &self,
        node: NodeId,
        event_name: &'static str,
        listener: Listener,
    ) -> ListenerToken {
        let mut inner = self.inner.borrow_mut();
        let token = ListenerToken(inner.next_token);
        inner.next_token += 1;
        inner.listeners_added += 1;
        match inner.get_mut(node) {
            Some(data) => data.listeners.push((token, event_name, listener)),
            None => warn!(node = node.0, event_name, "listener added to unknown node"),
        }
        token
    }

    fn remove_event_listener(&self, node: NodeId, token: ListenerToken) {
        let mut inner = self.inner.borrow_mut();
        let removed = match inner.get_mut(node) {
            Some(data) => {
                let before = data.listeners.len();
                data.listeners.retain(|(t, _, _)| *t != token);
                before - data.listeners.len()
            }
            None => 0,
        };
        inner.listeners_removed += removed as u64;
    }
}
