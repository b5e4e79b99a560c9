//! The bridge: command decoding, dispatch, and event relay.
//!
//! ```text
//! module ──import (ptr, len, handle)──▶ HostImports ──▶ AtomTable / Document
//!   ▲                                                       │
//!   └──callback_event(handle, kind, ptr, len)◀── relay ◀─ native listener
//! ```
//!
//! All state lives behind `RefCell`s that are borrowed only for the
//! duration of one table operation. Nothing is borrowed while control is
//! inside the module, so a module reacting to an event may issue further
//! commands (including deleting the atom that fired) before the native
//! handler returns.

use crate::atom::EventLogic;
use crate::atoms::{AtomTable, Handle, MOUNT_HANDLE};
use crate::config::BridgeConfig;
use crate::document::{Document, NodeId, NodeKind};
use crate::error::{BridgeError, Result};
use crate::events::{EventKind, NativeEvent};
use crate::guest::{GuestModule, ModuleLoader};
use crate::marshal::Marshal;
use crate::metrics::{BridgeMetrics, BridgeStats};
use crate::registry::EventRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use tracing::{debug, error, info, instrument, trace};
use uuid::Uuid;

/// Ordered attribute list as it crosses the boundary
pub type Attributes = Vec<(String, String)>;

/// `create_element` argument record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateElementArgs {
    /// Parent handle
    pub parent: Handle,
    /// Attributes applied in order
    pub attributes: Attributes,
}

/// `node_text_to_element` argument record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextToElementArgs {
    /// Handle of the text node to convert
    pub id: Handle,
    /// Attributes of the new element
    pub attributes: Attributes,
}

/// `update_element` argument record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateElementArgs {
    /// Full replacement attribute set
    pub attributes: Attributes,
}

/// A line the module printed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    /// When the line was printed
    pub at: DateTime<Utc>,
    /// Decoded text
    pub message: String,
}

/// Module-callable entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Import {
    /// `(ptr, len)`
    Println,
    /// `(callback_id)`
    Defer,
    /// `(length_ptr) -> ptr`
    MountId,
    /// `(ptr, len) -> handle`
    CreateElement,
    /// `(ptr, len, parent) -> handle`
    CreateTextNode,
    /// `(ptr, len, handle)`
    UpdateTextNode,
    /// `(handle)`
    DeleteNode,
    /// `(ptr, len)`
    NodeTextToElement,
    /// `(ptr, len, handle)`
    ElementToTextNode,
    /// `(handle, ptr, len)`
    UpdateElement,
    /// `(atom, kind) -> registration`
    CreateEvent,
    /// `(atom, kind)`
    DeleteEvent,
    /// `(registration)`
    CancelEvent,
    /// `(ptr, len)`
    InjectStylesheet,
}

impl Import {
    /// Every import, in declaration order
    pub const ALL: [Import; 14] = [
        Import::Println,
        Import::Defer,
        Import::MountId,
        Import::CreateElement,
        Import::CreateTextNode,
        Import::UpdateTextNode,
        Import::DeleteNode,
        Import::NodeTextToElement,
        Import::ElementToTextNode,
        Import::UpdateElement,
        Import::CreateEvent,
        Import::DeleteEvent,
        Import::CancelEvent,
        Import::InjectStylesheet,
    ];

    /// Command name used in logs and metrics
    pub fn name(self) -> &'static str {
        match self {
            Import::Println => "println",
            Import::Defer => "defer",
            Import::MountId => "mount_id",
            Import::CreateElement => "create_element",
            Import::CreateTextNode => "create_text_node",
            Import::UpdateTextNode => "update_text_node",
            Import::DeleteNode => "delete_node",
            Import::NodeTextToElement => "node_text_to_element",
            Import::ElementToTextNode => "element_to_text_node",
            Import::UpdateElement => "update_element",
            Import::CreateEvent => "create_event",
            Import::DeleteEvent => "delete_event",
            Import::CancelEvent => "cancel_event",
            Import::InjectStylesheet => "inject_stylesheet",
        }
    }

    /// Symbol the module imports from its environment
    pub fn symbol(self) -> String {
        format!("blocks_out_{}", self.name())
    }

    /// Resolve an import symbol
    pub fn from_symbol(symbol: &str) -> Result<Self> {
        let name = symbol
            .strip_prefix("blocks_out_")
            .ok_or_else(|| BridgeError::UnknownImport(symbol.to_string()))?;
        Import::ALL
            .into_iter()
            .find(|import| import.name() == name)
            .ok_or_else(|| BridgeError::UnknownImport(symbol.to_string()))
    }

    /// Number of integer arguments
    pub fn arity(self) -> usize {
        match self {
            Import::Defer | Import::MountId | Import::DeleteNode | Import::CancelEvent => 1,
            Import::Println
            | Import::CreateElement
            | Import::NodeTextToElement
            | Import::CreateEvent
            | Import::DeleteEvent
            | Import::InjectStylesheet => 2,
            Import::CreateTextNode
            | Import::UpdateTextNode
            | Import::ElementToTextNode
            | Import::UpdateElement => 3,
        }
    }
}

struct BridgeState {
    session: String,
    config: BridgeConfig,
    document: Rc<dyn Document>,
    mount_name: String,
    atoms: RefCell<AtomTable>,
    registry: RefCell<EventRegistry>,
    module: RefCell<Option<Rc<dyn GuestModule>>>,
    deferred: RefCell<VecDeque<u32>>,
    console: RefCell<VecDeque<ConsoleLine>>,
    faults: RefCell<Vec<BridgeError>>,
    metrics: BridgeMetrics,
}

impl BridgeState {
    fn module(&self, command: &'static str) -> Result<Rc<dyn GuestModule>> {
        self.module
            .borrow()
            .clone()
            .ok_or(BridgeError::NotInitialized { command })
    }

    fn node_of(&self, handle: Handle) -> Result<NodeId> {
        Ok(self.atoms.borrow().get_atom(handle)?.node())
    }

    /// Resolve a handle that is about to be converted in place
    fn convertible(&self, handle: Handle, expected: NodeKind) -> Result<NodeId> {
        if handle == MOUNT_HANDLE {
            return Err(BridgeError::ReservedHandle { handle });
        }
        let node = self.node_of(handle)?;
        self.expect_kind(handle, node, expected)?;
        Ok(node)
    }

    fn expect_kind(&self, handle: Handle, node: NodeId, expected: NodeKind) -> Result<()> {
        if self.document.node_kind(node) != Some(expected) {
            return Err(BridgeError::NodeKindMismatch {
                handle,
                expected: expected.as_str(),
            });
        }
        Ok(())
    }

    /// Handles of every tracked node below `node`
    fn descendant_handles(&self, node: NodeId) -> Vec<Handle> {
        let atoms = self.atoms.borrow();
        let mut found = Vec::new();
        let mut stack = self.document.children(node);
        while let Some(child) = stack.pop() {
            if let Some(handle) = atoms.handle_for_node(child) {
                found.push(handle);
            }
            stack.extend(self.document.children(child));
        }
        found
    }

    fn free_atoms(&self, handles: &[Handle]) -> Result<()> {
        let mut atoms = self.atoms.borrow_mut();
        let mut registry = self.registry.borrow_mut();
        for handle in handles {
            atoms.delete_atom(*handle)?;
            registry.forget_atom(*handle);
            self.metrics.record_atom_freed();
        }
        Ok(())
    }

    fn record_fault(&self, err: BridgeError) {
        error!(session = %self.session, code = %err.code(), error = %err, "Event relay fault");
        self.metrics.record_fault(err.code());
        self.faults.borrow_mut().push(err);
    }

    /// Serialize a fired event into module memory and hand it to the module
    fn relay_event(&self, handle: Handle, kind: EventKind, event: &NativeEvent) -> Result<()> {
        let module = self.module("callback_event")?;
        let payload = kind.payload(event);
        let (ptr, len) = Marshal::new(module.as_ref(), &self.config).write_payload(&payload)?;

        trace!(handle, %kind, ptr, len, "Relaying event");
        self.metrics.record_event();
        module.callback_event(handle, kind.ordinal(), ptr, len)
    }
}

fn relay_logic(state: Weak<BridgeState>, handle: Handle, kind: EventKind) -> EventLogic {
    Rc::new(move |event: &NativeEvent| {
        let Some(state) = state.upgrade() else {
            return;
        };
        if let Err(err) = state.relay_event(handle, kind, event) {
            state.record_fault(err);
        }
    })
}

/// The environment handed to a module at instantiation.
///
/// Holds only a weak reference: dropping the [`Bridge`] makes every
/// further import fail with `BridgeDropped`.
#[derive(Clone)]
pub struct HostImports {
    state: Weak<BridgeState>,
}

impl HostImports {
    fn state(&self) -> Result<Rc<BridgeState>> {
        self.state.upgrade().ok_or(BridgeError::BridgeDropped)
    }

    /// Resolve state and module for a command that needs a running module
    fn enter(&self, import: Import) -> Result<(Rc<BridgeState>, Rc<dyn GuestModule>)> {
        let state = self.state()?;
        let module = state.module(import.name())?;
        state.metrics.record_command(import.name());
        Ok((state, module))
    }

    /// Decode raw integer arguments and dispatch.
    ///
    /// Returns the handle for allocating entries and `0` for void ones.
    pub fn invoke(&self, import: Import, args: &[u32]) -> Result<u32> {
        if args.len() != import.arity() {
            return Err(BridgeError::ImportArity {
                import: import.name(),
                expected: import.arity(),
                got: args.len(),
            });
        }

        match import {
            Import::Println => self.println(args[0], args[1]).map(|_| 0),
            Import::Defer => self.defer(args[0]).map(|_| 0),
            Import::MountId => self.mount_id(args[0]),
            Import::CreateElement => self.create_element(args[0], args[1]),
            Import::CreateTextNode => self.create_text_node(args[0], args[1], args[2]),
            Import::UpdateTextNode => self.update_text_node(args[0], args[1], args[2]).map(|_| 0),
            Import::DeleteNode => self.delete_node(args[0]).map(|_| 0),
            Import::NodeTextToElement => self.node_text_to_element(args[0], args[1]).map(|_| 0),
            Import::ElementToTextNode => {
                self.element_to_text_node(args[0], args[1], args[2]).map(|_| 0)
            }
            Import::UpdateElement => self.update_element(args[0], args[1], args[2]).map(|_| 0),
            Import::CreateEvent => self.create_event(args[0], args[1]),
            Import::DeleteEvent => self.delete_event(args[0], args[1]).map(|_| 0),
            Import::CancelEvent => self.cancel_event(args[0]).map(|_| 0),
            Import::InjectStylesheet => self.inject_stylesheet(args[0], args[1]).map(|_| 0),
        }
    }

    /// Log a string from module memory
    pub fn println(&self, ptr: u32, len: u32) -> Result<()> {
        let (state, module) = self.enter(Import::Println)?;
        let text = Marshal::new(module.as_ref(), &state.config).read_string(ptr, len, "println")?;

        info!(session = %state.session, "{}", text);

        let limit = state.config.max_console_lines;
        if limit > 0 {
            let mut console = state.console.borrow_mut();
            while console.len() >= limit {
                console.pop_front();
            }
            console.push_back(ConsoleLine {
                at: Utc::now(),
                message: text,
            });
        }
        Ok(())
    }

    /// Queue a callback to run after initialization
    pub fn defer(&self, callback: u32) -> Result<()> {
        let state = self.state()?;
        state.metrics.record_command(Import::Defer.name());
        state.deferred.borrow_mut().push_back(callback);
        debug!(callback, "Deferred callback");
        Ok(())
    }

    /// Write the mount name's length at `length_ptr` and return its bytes' pointer
    pub fn mount_id(&self, length_ptr: u32) -> Result<u32> {
        let (state, module) = self.enter(Import::MountId)?;
        Marshal::new(module.as_ref(), &state.config).write_mount_id(length_ptr, &state.mount_name)
    }

    /// Create an element under `parent` from a `{parent, attributes}` record
    pub fn create_element(&self, ptr: u32, len: u32) -> Result<Handle> {
        let (state, module) = self.enter(Import::CreateElement)?;
        let args: CreateElementArgs = Marshal::new(module.as_ref(), &state.config)
            .read_payload(ptr, len, "create_element")?;
        if state.config.debug {
            trace!(?args, "create_element payload");
        }

        let parent = state.node_of(args.parent)?;
        let (handle, node) = state
            .atoms
            .borrow_mut()
            .create_element(&args.attributes, None)?;
        state.document.append_child(parent, node);
        state.metrics.record_atom_created();

        debug!(handle, parent = args.parent, "Created element");
        Ok(handle)
    }

    /// Create a text node under `parent`
    pub fn create_text_node(&self, ptr: u32, len: u32, parent: Handle) -> Result<Handle> {
        let (state, module) = self.enter(Import::CreateTextNode)?;
        let text = Marshal::new(module.as_ref(), &state.config)
            .read_string(ptr, len, "create_text_node")?;

        let parent_node = state.node_of(parent)?;
        let (handle, node) = state.atoms.borrow_mut().create_text_node(&text, None)?;
        state.document.append_child(parent_node, node);
        state.metrics.record_atom_created();

        debug!(handle, parent, "Created text node");
        Ok(handle)
    }

    /// Replace a text node's content
    pub fn update_text_node(&self, ptr: u32, len: u32, handle: Handle) -> Result<()> {
        let (state, module) = self.enter(Import::UpdateTextNode)?;
        let text = Marshal::new(module.as_ref(), &state.config)
            .read_string(ptr, len, "update_text_node")?;

        let node = state.node_of(handle)?;
        state.expect_kind(handle, node, NodeKind::Text)?;
        state.document.set_text(node, &text);
        Ok(())
    }

    /// Detach a node and free its handle along with every tracked descendant
    pub fn delete_node(&self, handle: Handle) -> Result<()> {
        let (state, _) = self.enter(Import::DeleteNode)?;
        if handle == MOUNT_HANDLE {
            return Err(BridgeError::ReservedHandle { handle });
        }

        let node = state.node_of(handle)?;
        let mut doomed = state.descendant_handles(node);
        doomed.push(handle);

        if let Some(parent) = state.document.parent(node) {
            state.document.remove_child(parent, node);
        }

        state.free_atoms(&doomed)?;

        debug!(handle, freed = doomed.len(), "Deleted node");
        Ok(())
    }

    /// Convert a text node into an element, keeping its handle
    pub fn node_text_to_element(&self, ptr: u32, len: u32) -> Result<()> {
        let (state, module) = self.enter(Import::NodeTextToElement)?;
        let args: TextToElementArgs = Marshal::new(module.as_ref(), &state.config)
            .read_payload(ptr, len, "node_text_to_element")?;
        if state.config.debug {
            trace!(?args, "node_text_to_element payload");
        }

        let old = state.convertible(args.id, NodeKind::Text)?;
        let (_, new) = state
            .atoms
            .borrow_mut()
            .create_element(&args.attributes, Some(args.id))?;
        if let Some(parent) = state.document.parent(old) {
            state.document.replace_child(parent, new, old);
        }
        state.registry.borrow_mut().forget_atom(args.id);

        debug!(handle = args.id, "Converted text node to element");
        Ok(())
    }

    /// Convert an element into a text node, keeping its handle
    pub fn element_to_text_node(&self, ptr: u32, len: u32, handle: Handle) -> Result<()> {
        let (state, module) = self.enter(Import::ElementToTextNode)?;
        let text = Marshal::new(module.as_ref(), &state.config)
            .read_string(ptr, len, "element_to_text_node")?;

        let old = state.convertible(handle, NodeKind::Element)?;
        let orphans = state.descendant_handles(old);
        state.free_atoms(&orphans)?;
        let (_, new) = state
            .atoms
            .borrow_mut()
            .create_text_node(&text, Some(handle))?;
        if let Some(parent) = state.document.parent(old) {
            state.document.replace_child(parent, new, old);
        }
        state.registry.borrow_mut().forget_atom(handle);

        debug!(handle, "Converted element to text node");
        Ok(())
    }

    /// Replace an element's full attribute set
    pub fn update_element(&self, handle: Handle, ptr: u32, len: u32) -> Result<()> {
        let (state, module) = self.enter(Import::UpdateElement)?;
        let args: UpdateElementArgs = Marshal::new(module.as_ref(), &state.config)
            .read_payload(ptr, len, "update_element")?;
        if state.config.debug {
            trace!(handle, ?args, "update_element payload");
        }

        let node = state.node_of(handle)?;
        state.expect_kind(handle, node, NodeKind::Element)?;

        for (name, _) in state.document.attributes(node) {
            state.document.remove_attribute(node, &name);
        }
        for (name, value) in &args.attributes {
            state.document.set_attribute(node, name, value);
        }
        Ok(())
    }

    /// Bind the relay for `kind` on an atom, returning the registration id
    pub fn create_event(&self, atom: Handle, kind: u32) -> Result<u32> {
        let (state, _) = self.enter(Import::CreateEvent)?;
        let kind = EventKind::from_ordinal(kind)?;

        let logic = relay_logic(Rc::downgrade(&state), atom, kind);
        let installed = state.atoms.borrow_mut().register_event(atom, kind, logic)?;

        let mut registry = state.registry.borrow_mut();
        let id = match registry.find(atom, kind) {
            Some(id) => id,
            None => registry.create(atom, kind)?,
        };

        debug!(atom, %kind, installed, registration = id, "Registered event");
        Ok(id)
    }

    /// Remove the binding for `kind` on an atom
    pub fn delete_event(&self, atom: Handle, kind: u32) -> Result<()> {
        let (state, _) = self.enter(Import::DeleteEvent)?;
        let kind = EventKind::from_ordinal(kind)?;

        state.atoms.borrow_mut().delete_event(atom, kind)?;
        state.registry.borrow_mut().forget(atom, kind);

        debug!(atom, %kind, "Deleted event");
        Ok(())
    }

    /// Remove the binding a registration id names
    pub fn cancel_event(&self, registration: u32) -> Result<()> {
        let (state, _) = self.enter(Import::CancelEvent)?;
        let entry = state.registry.borrow().get(registration)?;

        state
            .atoms
            .borrow_mut()
            .delete_event(entry.atom, entry.kind)?;
        state.registry.borrow_mut().delete(registration)?;

        debug!(registration, atom = entry.atom, kind = %entry.kind, "Cancelled event");
        Ok(())
    }

    /// Append a style block to the document head
    pub fn inject_stylesheet(&self, ptr: u32, len: u32) -> Result<()> {
        let (state, module) = self.enter(Import::InjectStylesheet)?;
        let css = Marshal::new(module.as_ref(), &state.config)
            .read_string(ptr, len, "inject_stylesheet")?;

        let document = &state.document;
        let style = document.create_element("style");
        document.set_attribute(style, "type", "text/css");
        let text = document.create_text_node(&css);
        document.append_child(style, text);
        document.append_child(document.head(), style);

        debug!(bytes = css.len(), "Injected stylesheet");
        Ok(())
    }
}

/// A bridge between one module instance and one document
pub struct Bridge {
    state: Rc<BridgeState>,
}

impl Bridge {
    /// Create a bridge mounted on the element whose id is `mount_name`.
    ///
    /// The bridge starts uninitialized: until [`Bridge::instantiate`]
    /// completes, the module may only `defer`.
    pub fn new(config: BridgeConfig, document: Rc<dyn Document>, mount_name: &str) -> Result<Self> {
        config.validate()?;

        let mount = document.element_by_id(mount_name).ok_or_else(|| {
            BridgeError::BootstrapConfig(format!("Element `#{}` does not exist.", mount_name))
        })?;

        let session = Uuid::new_v4().to_string();
        info!(session = %session, mount = mount_name, "Creating bridge");

        let atoms = AtomTable::new(Rc::clone(&document), mount, config.element_tag.clone());

        Ok(Self {
            state: Rc::new(BridgeState {
                session,
                config,
                document,
                mount_name: mount_name.to_string(),
                atoms: RefCell::new(atoms),
                registry: RefCell::new(EventRegistry::new()),
                module: RefCell::new(None),
                deferred: RefCell::new(VecDeque::new()),
                console: RefCell::new(VecDeque::new()),
                faults: RefCell::new(Vec::new()),
                metrics: BridgeMetrics::new(),
            }),
        })
    }

    /// The environment a module should be instantiated with
    pub fn imports(&self) -> HostImports {
        HostImports {
            state: Rc::downgrade(&self.state),
        }
    }

    /// Instantiate the module, then run the callbacks it deferred
    #[instrument(skip_all, fields(session = %self.state.session, bytes = binary.len()))]
    pub fn instantiate(&self, loader: &dyn ModuleLoader, binary: &[u8]) -> Result<()> {
        if self.state.module.borrow().is_some() {
            return Err(BridgeError::BootstrapConfig(
                "module already instantiated".into(),
            ));
        }

        let module = loader.instantiate(binary, self.imports())?;
        *self.state.module.borrow_mut() = Some(module);
        info!("Module instantiated");

        self.run_deferred()?;
        Ok(())
    }

    /// Whether the module has finished instantiating
    pub fn is_initialized(&self) -> bool {
        self.state.module.borrow().is_some()
    }

    /// Run queued callbacks in order until the queue is empty.
    ///
    /// Callbacks deferred by a running callback join the same pass.
    pub fn run_deferred(&self) -> Result<usize> {
        let module = self.state.module("callback0")?;
        let mut ran = 0;

        loop {
            // pop in its own statement so the callback may defer again
            let next = self.state.deferred.borrow_mut().pop_front();
            let Some(callback) = next else {
                break;
            };
            debug!(callback, "Running deferred callback");
            module.callback0(callback)?;
            self.state.metrics.record_deferred();
            ran += 1;
        }

        Ok(ran)
    }

    /// Callbacks waiting for [`Bridge::run_deferred`]
    pub fn pending_deferred(&self) -> usize {
        self.state.deferred.borrow().len()
    }

    /// Session id attached to this bridge's logs
    pub fn session_id(&self) -> &str {
        &self.state.session
    }

    /// Configuration in effect
    pub fn config(&self) -> &BridgeConfig {
        &self.state.config
    }

    /// The driven document
    pub fn document(&self) -> &Rc<dyn Document> {
        &self.state.document
    }

    /// Id of the mount element
    pub fn mount_name(&self) -> &str {
        &self.state.mount_name
    }

    /// Node an atom currently wraps
    pub fn atom_node(&self, handle: Handle) -> Result<NodeId> {
        self.state.node_of(handle)
    }

    /// Kinds bound on an atom
    pub fn atom_events(&self, handle: Handle) -> Result<Vec<EventKind>> {
        Ok(self.state.atoms.borrow().get_atom(handle)?.bound_kinds())
    }

    /// Live handles in ascending order
    pub fn live_handles(&self) -> Vec<Handle> {
        self.state.atoms.borrow().handles()
    }

    /// Number of live event registrations
    pub fn registrations(&self) -> usize {
        self.state.registry.borrow().len()
    }

    /// Lines the module printed, oldest first
    pub fn console(&self) -> Vec<ConsoleLine> {
        self.state.console.borrow().iter().cloned().collect()
    }

    /// Drain the captured console lines
    pub fn take_console(&self) -> Vec<ConsoleLine> {
        self.state.console.borrow_mut().drain(..).collect()
    }

    /// Drain faults raised while relaying events
    pub fn take_faults(&self) -> Vec<BridgeError> {
        std::mem::take(&mut *self.state.faults.borrow_mut())
    }

    /// Metrics collector
    pub fn metrics(&self) -> &BridgeMetrics {
        &self.state.metrics
    }

    /// Snapshot of bridge statistics
    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            live_atoms: self.state.atoms.borrow().len(),
            registrations: self.state.registry.borrow().len(),
            pending_deferred: self.pending_deferred(),
            ..self.state.metrics.snapshot()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PayloadFormat, StringEncoding};
    use crate::document::MemoryDocument;
    use crate::error::ErrorCode;
    use crate::events::{buttons, ClickPayload, EventPayload, PointerPayload};
    use crate::guest::{GuestEvent, ScriptedGuest, ScriptedLoader};
    use std::cell::Cell;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Bridge over a fresh document, instantiated with `init` as start code
    fn start_with<F>(config: BridgeConfig, init: F) -> (Rc<MemoryDocument>, Bridge, Rc<ScriptedGuest>)
    where
        F: Fn(&ScriptedGuest) -> Result<()> + 'static,
    {
        let doc = Rc::new(MemoryDocument::with_mount("app"));
        let bridge = Bridge::new(config.clone(), doc.clone(), "app").unwrap();
        let loader = ScriptedLoader::new(init).with_config(&config);
        bridge.instantiate(&loader, b"\0asm").unwrap();
        let guest = loader.last_instance().unwrap();
        (doc, bridge, guest)
    }

    fn start() -> (Rc<MemoryDocument>, Bridge, Rc<ScriptedGuest>) {
        start_with(BridgeConfig::default(), |_| Ok(()))
    }

    #[test]
    fn test_import_symbols() {
        for import in Import::ALL {
            assert_eq!(Import::from_symbol(&import.symbol()).unwrap(), import);
        }
        assert_eq!(
            Import::from_symbol("blocks_out_nope").unwrap_err().code(),
            ErrorCode::UnknownImport
        );
        assert_eq!(
            Import::from_symbol("println").unwrap_err().code(),
            ErrorCode::UnknownImport
        );
    }

    #[test]
    fn test_missing_mount_is_bootstrap_error() {
        let doc = Rc::new(MemoryDocument::with_mount("app"));
        let err = Bridge::new(BridgeConfig::default(), doc, "missing")
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::BootstrapConfig);
    }

    #[test]
    fn test_element_and_text_scenario() {
        let (doc, bridge, guest) = start();
        let mount = doc.element_by_id("app").unwrap();

        let e = guest.create_element(0, &attrs(&[("class", "x")])).unwrap();
        let t = guest.create_text_node(e, "hi").unwrap();

        let e_node = bridge.atom_node(e).unwrap();
        let t_node = bridge.atom_node(t).unwrap();
        assert_eq!(doc.children(mount), vec![e_node]);
        assert_eq!(doc.children(e_node), vec![t_node]);
        assert_eq!(doc.attribute(e_node, "class").as_deref(), Some("x"));

        guest.update_text_node(t, "bye").unwrap();
        assert_eq!(doc.text(bridge.atom_node(t).unwrap()).as_deref(), Some("bye"));

        guest.delete_node(e).unwrap();
        assert!(doc.children(mount).is_empty());
        assert_eq!(bridge.atom_node(e).unwrap_err().code(), ErrorCode::HandleNotFound);
        assert_eq!(bridge.atom_node(t).unwrap_err().code(), ErrorCode::HandleNotFound);
        assert_eq!(bridge.live_handles(), vec![MOUNT_HANDLE]);
    }

    #[test]
    fn test_repeated_delete_fails_like_unknown_handle() {
        let (_, _bridge, guest) = start();
        let h = guest.create_text_node(0, "x").unwrap();

        guest.delete_node(h).unwrap();
        let again = guest.delete_node(h).unwrap_err();
        let unknown = guest.delete_node(999).unwrap_err();
        assert_eq!(again.code(), ErrorCode::HandleNotFound);
        assert_eq!(unknown.code(), ErrorCode::HandleNotFound);
    }

    #[test]
    fn test_mount_cannot_be_deleted() {
        let (_, _bridge, guest) = start();
        assert_eq!(
            guest.delete_node(MOUNT_HANDLE).unwrap_err().code(),
            ErrorCode::ReservedHandle
        );
    }

    #[test]
    fn test_create_under_unknown_parent_allocates_nothing() {
        let (doc, bridge, guest) = start();
        let err = guest.create_element(42, &attrs(&[])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::HandleNotFound);
        assert_eq!(bridge.live_handles(), vec![MOUNT_HANDLE]);
        assert!(doc.children(doc.element_by_id("app").unwrap()).is_empty());
    }

    #[test]
    fn test_malformed_payload_is_not_applied() {
        let (doc, bridge, guest) = start();
        let (ptr, len) = guest.write_str("{\"attributes\": []}");
        let err = bridge.imports().create_element(ptr, len).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedPayload);

        let (ptr, len) = guest.write_str("[[\"class\"");
        let err = bridge.imports().update_element(0, ptr, len).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedPayload);

        assert_eq!(bridge.live_handles(), vec![MOUNT_HANDLE]);
        assert_eq!(
            doc.attributes(doc.element_by_id("app").unwrap()),
            attrs(&[("id", "app")])
        );
    }

    #[test]
    fn test_update_element_replaces_attribute_set() {
        let (doc, bridge, guest) = start();
        let e = guest
            .create_element(0, &attrs(&[("class", "a"), ("title", "t")]))
            .unwrap();

        guest
            .update_element(e, &attrs(&[("data-x", "1"), ("class", "b")]))
            .unwrap();

        assert_eq!(
            doc.attributes(bridge.atom_node(e).unwrap()),
            attrs(&[("data-x", "1"), ("class", "b")])
        );
    }

    #[test]
    fn test_text_to_element_in_place() {
        let (doc, bridge, guest) = start();
        let mount = doc.element_by_id("app").unwrap();
        let before = guest.create_text_node(0, "before").unwrap();
        let h = guest.create_text_node(0, "middle").unwrap();
        let after = guest.create_text_node(0, "after").unwrap();

        guest.node_text_to_element(h, &attrs(&[("class", "now")])).unwrap();

        let node = bridge.atom_node(h).unwrap();
        assert_eq!(doc.node_kind(node), Some(NodeKind::Element));
        assert_eq!(
            doc.children(mount),
            vec![
                bridge.atom_node(before).unwrap(),
                node,
                bridge.atom_node(after).unwrap()
            ]
        );

        // the handle still works as a parent
        let child = guest.create_text_node(h, "inside").unwrap();
        assert_eq!(doc.children(node), vec![bridge.atom_node(child).unwrap()]);
    }

    #[test]
    fn test_element_to_text_in_place() {
        let (doc, bridge, guest) = start();
        let mount = doc.element_by_id("app").unwrap();
        let h = guest.create_element(0, &attrs(&[])).unwrap();
        guest.create_event(h, EventKind::Click).unwrap();
        let old = bridge.atom_node(h).unwrap();

        guest.element_to_text_node(h, "plain").unwrap();

        let node = bridge.atom_node(h).unwrap();
        assert_eq!(doc.text(node).as_deref(), Some("plain"));
        assert_eq!(doc.children(mount), vec![node]);
        assert_eq!(doc.listener_count(old, "click"), 0);
        assert!(bridge.atom_events(h).unwrap().is_empty());
        assert_eq!(bridge.registrations(), 0);
    }

    #[test]
    fn test_element_to_text_frees_child_atoms() {
        let (doc, bridge, guest) = start();
        let parent = guest.create_element(0, &attrs(&[])).unwrap();
        let child = guest.create_element(parent, &attrs(&[])).unwrap();
        let grandchild = guest.create_text_node(child, "deep").unwrap();
        guest.create_event(child, EventKind::Click).unwrap();
        let child_node = bridge.atom_node(child).unwrap();

        guest.element_to_text_node(parent, "flat").unwrap();

        for handle in [child, grandchild] {
            assert_eq!(
                bridge.atom_node(handle).unwrap_err().code(),
                ErrorCode::HandleNotFound
            );
        }
        assert_eq!(doc.listener_count(child_node, "click"), 0);
        assert_eq!(bridge.registrations(), 0);
        assert_eq!(bridge.live_handles(), vec![MOUNT_HANDLE, parent]);
    }

    #[test]
    fn test_delete_node_uninstalls_descendant_listeners() {
        let (doc, bridge, guest) = start();
        let parent = guest.create_element(0, &attrs(&[])).unwrap();
        let child = guest.create_element(parent, &attrs(&[])).unwrap();
        let registration = guest.create_event(child, EventKind::PointerDown).unwrap();
        let child_node = bridge.atom_node(child).unwrap();

        guest.delete_node(parent).unwrap();

        assert_eq!(doc.listener_count(child_node, "mousedown"), 0);
        assert_eq!(doc.listeners_removed(), 1);
        assert_eq!(bridge.registrations(), 0);
        assert_eq!(
            guest.cancel_event(registration).unwrap_err().code(),
            ErrorCode::HandleNotFound
        );
    }

    #[test]
    fn test_debug_mode_decodes_every_structured_command() {
        let (doc, bridge, guest) = start_with(BridgeConfig::default().with_debug(true), |_| Ok(()));
        let text = guest.create_text_node(0, "t").unwrap();

        guest.node_text_to_element(text, &attrs(&[("class", "a")])).unwrap();
        guest.update_element(text, &attrs(&[("class", "b")])).unwrap();

        assert_eq!(
            doc.attribute(bridge.atom_node(text).unwrap(), "class").as_deref(),
            Some("b")
        );
    }

    #[test]
    fn test_conversion_checks_kind() {
        let (_, _bridge, guest) = start();
        let text = guest.create_text_node(0, "t").unwrap();
        let element = guest.create_element(0, &attrs(&[])).unwrap();

        assert_eq!(
            guest.element_to_text_node(text, "x").unwrap_err().code(),
            ErrorCode::NodeKindMismatch
        );
        assert_eq!(
            guest.node_text_to_element(element, &attrs(&[])).unwrap_err().code(),
            ErrorCode::NodeKindMismatch
        );
        assert_eq!(
            guest.element_to_text_node(MOUNT_HANDLE, "x").unwrap_err().code(),
            ErrorCode::ReservedHandle
        );
        assert_eq!(
            guest.update_text_node(element, "x").unwrap_err().code(),
            ErrorCode::NodeKindMismatch
        );
    }

    #[test]
    fn test_click_relay() {
        let received = Rc::new(RefCell::new(Vec::<GuestEvent>::new()));
        let sink = Rc::clone(&received);
        let (doc, bridge, guest) = start_with(BridgeConfig::default(), move |guest| {
            let sink = Rc::clone(&sink);
            guest.on_event(move |_, event| {
                sink.borrow_mut().push(event);
                Ok(())
            });
            Ok(())
        });

        let e = guest.create_element(0, &attrs(&[])).unwrap();
        guest.create_event(e, EventKind::Click).unwrap();
        let node = bridge.atom_node(e).unwrap();
        assert_eq!(doc.listener_count(node, "click"), 1);

        doc.dispatch_kind(node, EventKind::Click, &NativeEvent::at(12, 34));

        let received = received.borrow();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].atom, e);
        assert_eq!(received[0].kind, EventKind::Click.ordinal());
        let payload: serde_json::Value = serde_json::from_slice(&received[0].payload).unwrap();
        assert_eq!(payload, serde_json::json!({"x": 12, "y": 34}));
        assert_eq!(bridge.stats().events_relayed, 1);
    }

    #[test]
    fn test_rebinding_is_listener_stable() {
        let (doc, bridge, guest) = start();
        let e = guest.create_element(0, &attrs(&[])).unwrap();

        let first = guest.create_event(e, EventKind::PointerDown).unwrap();
        let second = guest.create_event(e, EventKind::PointerDown).unwrap();

        assert_eq!(first, second);
        assert_eq!(doc.listeners_added(), 1);
        assert_eq!(doc.listener_count(bridge.atom_node(e).unwrap(), "mousedown"), 1);
        assert_eq!(bridge.registrations(), 1);
    }

    #[test]
    fn test_pointer_payload_in_message_pack() {
        let config = BridgeConfig::default().with_payload_format(PayloadFormat::MessagePack);
        let received = Rc::new(RefCell::new(Vec::<GuestEvent>::new()));
        let sink = Rc::clone(&received);
        let (doc, bridge, guest) = start_with(config, move |guest| {
            let sink = Rc::clone(&sink);
            guest.on_event(move |_, event| {
                sink.borrow_mut().push(event);
                Ok(())
            });
            Ok(())
        });

        let e = guest.create_element(0, &attrs(&[("class", "msgpack")])).unwrap();
        guest.create_event(e, EventKind::PointerUp).unwrap();
        doc.dispatch_kind(
            bridge.atom_node(e).unwrap(),
            EventKind::PointerUp,
            &NativeEvent::at(1, 2).with_button(buttons::RIGHT),
        );

        let payload: EventPayload = rmp_serde::from_slice(&received.borrow()[0].payload).unwrap();
        assert_eq!(
            payload,
            EventPayload::Pointer(PointerPayload {
                button: buttons::RIGHT,
                x: 1,
                y: 2
            })
        );
    }

    #[test]
    fn test_delete_event_and_cancel() {
        let (doc, bridge, guest) = start();
        let e = guest.create_element(0, &attrs(&[])).unwrap();
        let node = bridge.atom_node(e).unwrap();

        guest.create_event(e, EventKind::Click).unwrap();
        let reg = guest.create_event(e, EventKind::PointerUp).unwrap();

        guest.delete_event(e, EventKind::Click).unwrap();
        assert_eq!(doc.listener_count(node, "click"), 0);
        let err = guest.delete_event(e, EventKind::Click).unwrap_err();
        assert_eq!(err.code(), ErrorCode::EventNotBound);
        assert!(err.is_not_found());

        guest.cancel_event(reg).unwrap();
        assert_eq!(doc.listener_count(node, "mouseup"), 0);
        assert_eq!(
            guest.cancel_event(reg).unwrap_err().code(),
            ErrorCode::HandleNotFound
        );
        assert_eq!(bridge.registrations(), 0);
    }

    #[test]
    fn test_unknown_event_kind() {
        let (_, bridge, guest) = start();
        let e = guest.create_element(0, &attrs(&[])).unwrap();
        assert_eq!(
            bridge.imports().create_event(e, 7).unwrap_err().code(),
            ErrorCode::UnknownEventKind
        );
    }

    #[test]
    fn test_event_handler_may_delete_firing_atom() {
        let target = Rc::new(Cell::new(0u32));
        let shared = Rc::clone(&target);
        let (doc, bridge, guest) = start_with(BridgeConfig::default(), move |guest| {
            let shared = Rc::clone(&shared);
            guest.on_event(move |guest, event| {
                assert_eq!(event.atom, shared.get());
                guest.delete_node(event.atom)
            });
            Ok(())
        });

        let e = guest.create_element(0, &attrs(&[])).unwrap();
        target.set(e);
        guest.create_event(e, EventKind::Click).unwrap();
        let node = bridge.atom_node(e).unwrap();

        doc.dispatch_kind(node, EventKind::Click, &NativeEvent::at(0, 0));

        assert!(bridge.take_faults().is_empty());
        assert_eq!(bridge.atom_node(e).unwrap_err().code(), ErrorCode::HandleNotFound);
        assert_eq!(doc.listener_count(node, "click"), 0);
        assert!(!doc.is_connected(node));
    }

    #[test]
    fn test_event_handler_may_rebind_and_mutate() {
        let (doc, bridge, guest) = start_with(BridgeConfig::default(), |guest| {
            guest.on_event(|guest, event| {
                let payload: ClickPayload = serde_json::from_slice(&event.payload).unwrap();
                guest.create_text_node(event.atom, &format!("{},{}", payload.x, payload.y))?;
                guest.create_event(event.atom, EventKind::Click)?;
                Ok(())
            });
            Ok(())
        });

        let e = guest.create_element(0, &attrs(&[])).unwrap();
        guest.create_event(e, EventKind::Click).unwrap();
        let node = bridge.atom_node(e).unwrap();

        doc.dispatch_kind(node, EventKind::Click, &NativeEvent::at(3, 4));
        doc.dispatch_kind(node, EventKind::Click, &NativeEvent::at(5, 6));

        assert_eq!(doc.to_html(node), "<div>3,45,6</div>");
        assert_eq!(doc.listeners_added(), 1);
    }

    #[test]
    fn test_relay_fault_is_recorded() {
        let (doc, bridge, guest) = start_with(BridgeConfig::default(), |guest| {
            guest.on_event(|guest, _| guest.delete_node(12345));
            Ok(())
        });

        let e = guest.create_element(0, &attrs(&[])).unwrap();
        guest.create_event(e, EventKind::Click).unwrap();
        doc.dispatch_kind(bridge.atom_node(e).unwrap(), EventKind::Click, &NativeEvent::default());

        let faults = bridge.take_faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].code(), ErrorCode::GuestTrap);
        assert!(bridge.take_faults().is_empty());
    }

    #[test]
    fn test_deferred_order_and_init_phase() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let record = Rc::clone(&order);
        let early = Rc::new(RefCell::new(None));
        let early_err = Rc::clone(&early);

        let (_, bridge, _guest) = start_with(BridgeConfig::default(), move |guest| {
            for id in [10u32, 20] {
                let record = Rc::clone(&record);
                guest.on_callback(id, move |guest| {
                    record.borrow_mut().push(id);
                    guest.create_text_node(0, "ok").map(|_| ())
                });
            }
            *early_err.borrow_mut() = guest.create_text_node(0, "too early").err();
            guest.defer(10)?;
            guest.defer(20)?;
            Ok(())
        });

        assert_eq!(*order.borrow(), vec![10, 20]);
        assert_eq!(
            early.borrow().as_ref().map(|e| e.code()),
            Some(ErrorCode::NotInitialized)
        );
        assert_eq!(bridge.live_handles(), vec![0, 1, 2]);
        assert_eq!(bridge.pending_deferred(), 0);
        assert_eq!(bridge.stats().deferred_run, 2);
    }

    #[test]
    fn test_defer_after_init_waits_for_next_run() {
        let (_, bridge, guest) = start_with(BridgeConfig::default(), |guest| {
            guest.on_callback(1, |guest| guest.println("later"));
            Ok(())
        });

        guest.defer(1).unwrap();
        assert_eq!(bridge.pending_deferred(), 1);
        assert!(bridge.console().is_empty());

        assert_eq!(bridge.run_deferred().unwrap(), 1);
        assert_eq!(bridge.console()[0].message, "later");
    }

    #[test]
    fn test_defer_from_deferred_callback_runs_in_same_pass() {
        let ran = Rc::new(RefCell::new(Vec::new()));
        let record = Rc::clone(&ran);

        let (_, bridge, _guest) = start_with(BridgeConfig::default(), move |guest| {
            let first = Rc::clone(&record);
            guest.on_callback(1, move |guest| {
                first.borrow_mut().push(1);
                guest.defer(2)
            });
            let second = Rc::clone(&record);
            guest.on_callback(2, move |_| {
                second.borrow_mut().push(2);
                Ok(())
            });
            guest.defer(1)
        });

        assert_eq!(*ran.borrow(), vec![1, 2]);
        assert_eq!(bridge.pending_deferred(), 0);
        assert_eq!(bridge.stats().deferred_run, 2);
    }

    #[test]
    fn test_console_is_bounded_and_drainable() {
        let config = BridgeConfig::default().with_max_console_lines(3);
        let (_, bridge, guest) = start_with(config, |_| Ok(()));

        for i in 0..10 {
            guest.println(&format!("line {}", i)).unwrap();
        }

        let lines: Vec<String> = bridge.console().into_iter().map(|l| l.message).collect();
        assert_eq!(lines, vec!["line 7", "line 8", "line 9"]);

        assert_eq!(bridge.take_console().len(), 3);
        assert!(bridge.console().is_empty());
    }

    #[test]
    fn test_console_capture_disabled() {
        let config = BridgeConfig::default().with_max_console_lines(0);
        let (_, bridge, guest) = start_with(config, |_| Ok(()));

        guest.println("dropped").unwrap();
        assert!(bridge.console().is_empty());
        assert_eq!(bridge.metrics().command_count("println"), 1);
    }

    #[test]
    fn test_println_and_mount_id() {
        let (_, bridge, guest) = start();
        guest.println("hello").unwrap();
        assert_eq!(guest.mount_id().unwrap(), "app");
        assert_eq!(bridge.console().len(), 1);
        assert_eq!(bridge.console()[0].message, "hello");
    }

    #[test]
    fn test_inject_stylesheet() {
        let (doc, _bridge, guest) = start();
        guest.inject_stylesheet(".x { color: red; }").unwrap();
        assert_eq!(
            doc.to_html(doc.head()),
            "<head><style type=\"text/css\">.x { color: red; }</style></head>"
        );
    }

    #[test]
    fn test_invoke_raw_arguments() {
        let (doc, bridge, guest) = start();
        let imports = bridge.imports();
        let (ptr, len) = guest.write_str("raw");

        let h = imports.invoke(Import::CreateTextNode, &[ptr, len, 0]).unwrap();
        assert_eq!(doc.text(bridge.atom_node(h).unwrap()).as_deref(), Some("raw"));
        assert_eq!(imports.invoke(Import::DeleteNode, &[h]).unwrap(), 0);

        let err = imports.invoke(Import::DeleteNode, &[]).unwrap_err();
        assert!(matches!(err, BridgeError::ImportArity { expected: 1, got: 0, .. }));
    }

    #[test]
    fn test_wide_mount_name_rejected_in_latin1() {
        let doc = Rc::new(MemoryDocument::with_mount("app\u{263A}"));
        let bridge = Bridge::new(BridgeConfig::default(), doc, "app\u{263A}").unwrap();
        let loader = ScriptedLoader::new(|_| Ok(()));
        bridge.instantiate(&loader, b"").unwrap();
        let guest = loader.last_instance().unwrap();

        assert_eq!(
            guest.mount_id().unwrap_err().code(),
            ErrorCode::ByteRangeViolation
        );
    }

    #[test]
    fn test_utf8_strings_end_to_end() {
        let (_, bridge, guest) = start_with(
            BridgeConfig::default().with_string_encoding(StringEncoding::Utf8),
            |_| Ok(()),
        );
        let h = guest.create_text_node(0, "\u{263A}").unwrap();
        assert_eq!(
            bridge.document().text(bridge.atom_node(h).unwrap()).as_deref(),
            Some("\u{263A}")
        );
    }

    #[test]
    fn test_dropped_bridge() {
        let (_, bridge, guest) = start();
        drop(bridge);
        assert_eq!(guest.println("x").unwrap_err().code(), ErrorCode::BridgeDropped);
    }

    #[test]
    fn test_metrics_count_commands() {
        let (_, bridge, guest) = start();
        let e = guest.create_element(0, &attrs(&[])).unwrap();
        guest.create_text_node(e, "a").unwrap();
        guest.delete_node(e).unwrap();

        let stats = bridge.stats();
        assert_eq!(stats.atoms_created, 2);
        assert_eq!(stats.atoms_freed, 2);
        assert_eq!(stats.live_atoms, 1);
        assert_eq!(bridge.metrics().command_count("create_element"), 1);
        assert!(bridge.metrics().to_prometheus().contains("blocks_bridge_commands_total"));
    }
}
