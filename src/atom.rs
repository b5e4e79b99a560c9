//! A document node and the event bindings attached to it.
//!
//! Each bound event kind owns exactly one native listener. The listener
//! does not call the module's logic directly: it reads the logic out of a
//! shared cell at fire time, so rebinding swaps the cell's contents and
//! never touches the document again.

use crate::atoms::Handle;
use crate::document::{Document, ListenerToken, NodeId};
use crate::error::{BridgeError, Result};
use crate::events::{EventKind, NativeEvent};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::trace;

/// Logic run when a bound event fires
pub type EventLogic = Rc<dyn Fn(&NativeEvent)>;

type LogicCell = Rc<RefCell<EventLogic>>;

struct Binding {
    installed: ListenerToken,
    logic: LogicCell,
}

/// One live document node plus its event bindings
pub struct Atom {
    handle: Handle,
    node: NodeId,
    bindings: BTreeMap<EventKind, Binding>,
}

impl Atom {
    pub(crate) fn new(handle: Handle, node: NodeId) -> Self {
        Self {
            handle,
            node,
            bindings: BTreeMap::new(),
        }
    }

    /// Handle this atom is addressed by
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// The wrapped document node
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Whether a listener is installed for `kind`
    pub fn is_bound(&self, kind: EventKind) -> bool {
        self.bindings.contains_key(&kind)
    }

    /// Kinds with an installed listener
    pub fn bound_kinds(&self) -> Vec<EventKind> {
        self.bindings.keys().copied().collect()
    }

    /// Bind `logic` to `kind`.
    ///
    /// Installs a native listener the first time a kind is bound; later
    /// calls only replace the logic. Returns `true` when a listener was
    /// installed.
    pub fn register_event(
        &mut self,
        document: &dyn Document,
        kind: EventKind,
        logic: EventLogic,
    ) -> bool {
        if let Some(binding) = self.bindings.get(&kind) {
            *binding.logic.borrow_mut() = logic;
            trace!(handle = self.handle, %kind, "Rebound event logic");
            return false;
        }

        let cell: LogicCell = Rc::new(RefCell::new(logic));
        let slot = Rc::clone(&cell);
        let installed = document.add_event_listener(
            self.node,
            kind.name(),
            Rc::new(move |event: &NativeEvent| {
                // Release the cell before running so the logic may rebind it.
                let current = Rc::clone(&slot.borrow());
                current(event);
            }),
        );

        self.bindings.insert(
            kind,
            Binding {
                installed,
                logic: cell,
            },
        );
        trace!(handle = self.handle, %kind, "Installed native listener");
        true
    }

    /// Uninstall the listener for `kind` and forget its logic.
    ///
    /// An unbound kind fails with `EventNotBound`, which shares the
    /// not-found class with `HandleNotFound` (see [`BridgeError::is_not_found`]).
    pub fn delete_event(&mut self, document: &dyn Document, kind: EventKind) -> Result<()> {
        let binding = self
            .bindings
            .remove(&kind)
            .ok_or(BridgeError::EventNotBound {
                handle: self.handle,
                kind: kind.name(),
            })?;
        document.remove_event_listener(self.node, binding.installed);
        Ok(())
    }

    /// Uninstall every listener still present
    pub(crate) fn uninstall_all(&mut self, document: &dyn Document) {
        for (_, binding) in std::mem::take(&mut self.bindings) {
            document.remove_event_listener(self.node, binding.installed);
        }
    }
}

impl std::fmt::Debug for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Atom")
            .field("handle", &self.handle)
            .field("node", &self.node)
            .field("bound", &self.bound_kinds())
            .finish()
    }
}
