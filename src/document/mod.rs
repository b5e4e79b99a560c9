//! Host document-tree primitives.
//!
//! The bridge never owns the document representation. It drives whatever
//! tree the host provides through the [`Document`] trait: node creation,
//! attribute mutation, child manipulation, and listener registration.

pub mod memory;

use crate::events::NativeEvent;
use std::rc::Rc;

pub use memory::MemoryDocument;

/// Host-side node identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Identifies one installed native listener so it can be removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(pub u64);

/// A native listener body
pub type Listener = Rc<dyn Fn(&NativeEvent)>;

/// Node kinds the bridge distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Element with attributes and children
    Element,
    /// Character data
    Text,
}

impl NodeKind {
    /// Lowercase name used in diagnostics
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Element => "element",
            NodeKind::Text => "text",
        }
    }
}

/// Document-tree primitives supplied by the host environment.
///
/// Methods take `&self`: implementations use interior mutability so a
/// listener invoked by the host may call straight back into the tree.
pub trait Document {
    /// Create a detached element
    fn create_element(&self, tag: &str) -> NodeId;

    /// Create a detached text node
    fn create_text_node(&self, text: &str) -> NodeId;

    /// Kind of a node, or `None` if the node is unknown
    fn node_kind(&self, node: NodeId) -> Option<NodeKind>;

    /// Set an attribute, overwriting an existing value
    fn set_attribute(&self, node: NodeId, name: &str, value: &str);

    /// Remove an attribute if present
    fn remove_attribute(&self, node: NodeId, name: &str);

    /// Attributes in insertion order
    fn attributes(&self, node: NodeId) -> Vec<(String, String)>;

    /// Replace the character data of a text node
    fn set_text(&self, node: NodeId, text: &str);

    /// Character data of a text node
    fn text(&self, node: NodeId) -> Option<String>;

    /// Append `child` as the last child of `parent`
    fn append_child(&self, parent: NodeId, child: NodeId);

    /// Detach `child` from `parent`
    fn remove_child(&self, parent: NodeId, child: NodeId);

    /// Put `new` at the position `old` occupies in `parent`
    fn replace_child(&self, parent: NodeId, new: NodeId, old: NodeId);

    /// Parent of a node, if attached
    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Children in order
    fn children(&self, node: NodeId) -> Vec<NodeId>;

    /// The document head
    fn head(&self) -> NodeId;

    /// Look up an element by its `id` attribute
    fn element_by_id(&self, id: &str) -> Option<NodeId>;

    /// Install a native listener for `event_name` on `node`
    fn add_event_listener(&self, node: NodeId, event_name: &'static str, listener: Listener)
        -> ListenerToken;

    /// Uninstall a previously installed listener
    fn remove_event_listener(&self, node: NodeId, token: ListenerToken);
}
