//! The handle table.
//!
//! `AtomTable` is the only place atoms are created or destroyed. Handles
//! come from a [`Counter`] seeded past the mount handle, so a freed handle
//! is never handed out again.

use crate::atom::{Atom, EventLogic};
use crate::counter::Counter;
use crate::document::{Document, NodeId};
use crate::error::{BridgeError, Result};
use crate::events::EventKind;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

/// Integer handle the module uses to address an atom
pub type Handle = u32;

/// Handle of the pre-existing mount node
pub const MOUNT_HANDLE: Handle = 0;

/// Handle → atom mapping
pub struct AtomTable {
    document: Rc<dyn Document>,
    counter: Counter,
    atoms: HashMap<Handle, Atom>,
    by_node: HashMap<NodeId, Handle>,
    element_tag: String,
}

impl AtomTable {
    /// Create a table whose handle 0 wraps `mount`
    pub fn new(document: Rc<dyn Document>, mount: NodeId, element_tag: impl Into<String>) -> Self {
        let mut atoms = HashMap::new();
        atoms.insert(MOUNT_HANDLE, Atom::new(MOUNT_HANDLE, mount));

        let mut by_node = HashMap::new();
        by_node.insert(mount, MOUNT_HANDLE);

        Self {
            document,
            counter: Counter::new(MOUNT_HANDLE + 1),
            atoms,
            by_node,
            element_tag: element_tag.into(),
        }
    }

    /// The document this table allocates nodes in
    pub fn document(&self) -> &Rc<dyn Document> {
        &self.document
    }

    /// Node wrapped by the mount handle
    pub fn mount(&self) -> NodeId {
        self.atoms[&MOUNT_HANDLE].node()
    }

    /// Allocate a text node, fresh or in place of `replace`
    pub fn create_text_node(
        &mut self,
        text: &str,
        replace: Option<Handle>,
    ) -> Result<(Handle, NodeId)> {
        let handle = self.allocate(replace)?;
        let node = self.document.create_text_node(text);
        self.install(handle, node);
        Ok((handle, node))
    }

    /// Allocate an element with `attributes` applied in order
    pub fn create_element(
        &mut self,
        attributes: &[(String, String)],
        replace: Option<Handle>,
    ) -> Result<(Handle, NodeId)> {
        let handle = self.allocate(replace)?;
        let node = self.document.create_element(&self.element_tag);
        for (name, value) in attributes {
            self.document.set_attribute(node, name, value);
        }
        self.install(handle, node);
        Ok((handle, node))
    }

    /// Look up a live atom
    pub fn get_atom(&self, handle: Handle) -> Result<&Atom> {
        self.atoms
            .get(&handle)
            .ok_or(BridgeError::HandleNotFound { handle })
    }

    /// Look up a live atom mutably
    pub fn get_atom_mut(&mut self, handle: Handle) -> Result<&mut Atom> {
        self.atoms
            .get_mut(&handle)
            .ok_or(BridgeError::HandleNotFound { handle })
    }

    /// Handle currently wrapping `node`, if any
    pub fn handle_for_node(&self, node: NodeId) -> Option<Handle> {
        self.by_node.get(&node).copied()
    }

    /// Uninstall every listener on the atom and free its handle.
    ///
    /// Does not detach the node; the caller owns tree position.
    pub fn delete_atom(&mut self, handle: Handle) -> Result<Atom> {
        if handle == MOUNT_HANDLE {
            return Err(BridgeError::ReservedHandle { handle });
        }

        let mut atom = self
            .atoms
            .remove(&handle)
            .ok_or(BridgeError::HandleNotFound { handle })?;
        atom.uninstall_all(self.document.as_ref());
        self.by_node.remove(&atom.node());

        debug!(handle, "Freed atom");
        Ok(atom)
    }

    /// Bind logic to an event kind on an atom
    pub fn register_event(
        &mut self,
        handle: Handle,
        kind: EventKind,
        logic: EventLogic,
    ) -> Result<bool> {
        let document = Rc::clone(&self.document);
        let atom = self.get_atom_mut(handle)?;
        Ok(atom.register_event(document.as_ref(), kind, logic))
    }

    /// Remove an event binding from an atom
    pub fn delete_event(&mut self, handle: Handle, kind: EventKind) -> Result<()> {
        let document = Rc::clone(&self.document);
        let atom = self.get_atom_mut(handle)?;
        atom.delete_event(document.as_ref(), kind)
    }

    /// Whether `handle` is live
    pub fn contains(&self, handle: Handle) -> bool {
        self.atoms.contains_key(&handle)
    }

    /// Number of live atoms, mount included
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    /// Whether only the mount remains
    pub fn is_empty(&self) -> bool {
        self.atoms.len() <= 1
    }

    /// Live handles in ascending order
    pub fn handles(&self) -> Vec<Handle> {
        let mut handles: Vec<Handle> = self.atoms.keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    /// Pick the handle for a new node before anything is created
    fn allocate(&mut self, replace: Option<Handle>) -> Result<Handle> {
        match replace {
            Some(MOUNT_HANDLE) => Err(BridgeError::ReservedHandle {
                handle: MOUNT_HANDLE,
            }),
            Some(handle) if !self.atoms.contains_key(&handle) => {
                Err(BridgeError::HandleNotFound { handle })
            }
            Some(handle) => Ok(handle),
            None => self.counter.next(),
        }
    }

    fn install(&mut self, handle: Handle, node: NodeId) {
        if let Some(mut old) = self.atoms.insert(handle, Atom::new(handle, node)) {
            old.uninstall_all(self.document.as_ref());
            self.by_node.remove(&old.node());
            debug!(handle, "Replaced atom in place");
        }
        self.by_node.insert(node, handle);
    }
}
