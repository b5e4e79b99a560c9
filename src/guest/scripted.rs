//! A module whose behavior is written as Rust closures.
//!
//! `ScriptedGuest` owns a real linear memory and talks to the bridge only
//! through `(ptr, len)` pairs, exactly as a compiled module would. It backs
//! the test-suite and the demo binary, and is the reference for what a
//! [`ModuleLoader`] must provide.

use super::{GuestModule, ModuleLoader, EXPORT_CALLBACK0, EXPORT_CALLBACK_EVENT};
use crate::bridge::{
    Attributes, CreateElementArgs, HostImports, TextToElementArgs, UpdateElementArgs,
};
use crate::config::{BridgeConfig, PayloadFormat, StringEncoding};
use crate::error::{BridgeError, Result};
use crate::events::EventKind;
use crate::marshal::{decode_string, encode_payload, encode_string};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::trace;

/// Initial linear memory size: one wasm page
pub const INITIAL_MEMORY: usize = 64 * 1024;

/// First offset the allocator hands out
const HEAP_BASE: u32 = 8;

/// An event as the module receives it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestEvent {
    /// Atom the event fired on
    pub atom: u32,
    /// Event kind ordinal
    pub kind: u32,
    /// Serialized payload bytes
    pub payload: Vec<u8>,
}

type CallbackFn = Rc<dyn Fn(&ScriptedGuest) -> Result<()>>;
type EventFn = Rc<dyn Fn(&ScriptedGuest, GuestEvent) -> Result<()>>;

/// A scripted module instance
pub struct ScriptedGuest {
    memory: RefCell<Vec<u8>>,
    heap: Cell<u32>,
    imports: Option<HostImports>,
    encoding: StringEncoding,
    format: PayloadFormat,
    callbacks: RefCell<HashMap<u32, CallbackFn>>,
    on_event: RefCell<Option<EventFn>>,
}

impl ScriptedGuest {
    /// Create an instance wired to `imports`
    pub fn new(imports: HostImports, config: &BridgeConfig) -> Self {
        Self::build(Some(imports), config.string_encoding, config.payload_format)
    }

    /// Create an instance with memory but no bridge attached
    pub fn detached() -> Self {
        Self::build(None, StringEncoding::default(), PayloadFormat::default())
    }

    fn build(imports: Option<HostImports>, encoding: StringEncoding, format: PayloadFormat) -> Self {
        Self {
            memory: RefCell::new(vec![0; INITIAL_MEMORY]),
            heap: Cell::new(HEAP_BASE),
            imports,
            encoding,
            format,
            callbacks: RefCell::new(HashMap::new()),
            on_event: RefCell::new(None),
        }
    }

    /// Bump-allocate `len` bytes, growing memory as needed
    pub fn alloc(&self, len: u32) -> u32 {
        let ptr = self.heap.get();
        let end = ptr as usize + len as usize;
        let mut memory = self.memory.borrow_mut();
        if end > memory.len() {
            let grown = end.next_power_of_two().max(memory.len() * 2);
            memory.resize(grown, 0);
        }
        // keep allocations 4-byte aligned so length fields stay aligned
        self.heap.set(((end + 3) & !3) as u32);
        ptr
    }

    /// Register the body of callback `id`
    pub fn on_callback<F>(&self, id: u32, f: F)
    where
        F: Fn(&ScriptedGuest) -> Result<()> + 'static,
    {
        self.callbacks.borrow_mut().insert(id, Rc::new(f));
    }

    /// Register the event handler
    pub fn on_event<F>(&self, f: F)
    where
        F: Fn(&ScriptedGuest, GuestEvent) -> Result<()> + 'static,
    {
        *self.on_event.borrow_mut() = Some(Rc::new(f));
    }

    /// Copy raw bytes into fresh memory, returning `(ptr, len)`
    pub fn write_raw(&self, bytes: &[u8]) -> (u32, u32) {
        let ptr = self.alloc(bytes.len() as u32);
        let start = ptr as usize;
        self.memory.borrow_mut()[start..start + bytes.len()].copy_from_slice(bytes);
        (ptr, bytes.len() as u32)
    }

    /// Write `text` in the instance's encoding, returning `(ptr, len)`.
    ///
    /// Under Latin-1, characters above U+00FF are written as `?`.
    pub fn write_str(&self, text: &str) -> (u32, u32) {
        let bytes = match self.encoding {
            StringEncoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
            StringEncoding::Utf8 => text.as_bytes().to_vec(),
        };
        self.write_raw(&bytes)
    }

    fn write_value<T: Serialize>(&self, value: &T) -> Result<(u32, u32)> {
        let bytes = encode_payload(value, self.format, self.encoding)?;
        Ok(self.write_raw(&bytes))
    }

    fn imports(&self) -> Result<&HostImports> {
        self.imports.as_ref().ok_or(BridgeError::BridgeDropped)
    }

    /// `println`
    pub fn println(&self, text: &str) -> Result<()> {
        let (ptr, len) = self.write_str(text);
        self.imports()?.println(ptr, len)
    }

    /// `defer`
    pub fn defer(&self, callback: u32) -> Result<()> {
        self.imports()?.defer(callback)
    }

    /// `mount_id`, decoded
    pub fn mount_id(&self) -> Result<String> {
        let length_ptr = self.alloc(4);
        let ptr = self.imports()?.mount_id(length_ptr)?;

        let field = self.read_memory(length_ptr, 4)?;
        let len = u32::from_le_bytes([field[0], field[1], field[2], field[3]]);
        let bytes = self.read_memory(ptr, len)?;
        decode_string(bytes, self.encoding, "mount_id")
    }

    /// `create_element`
    pub fn create_element(&self, parent: u32, attributes: &Attributes) -> Result<u32> {
        let (ptr, len) = self.write_value(&CreateElementArgs {
            parent,
            attributes: attributes.clone(),
        })?;
        self.imports()?.create_element(ptr, len)
    }

    /// `create_text_node`
    pub fn create_text_node(&self, parent: u32, text: &str) -> Result<u32> {
        let (ptr, len) = self.write_str(text);
        self.imports()?.create_text_node(ptr, len, parent)
    }

    /// `update_text_node`
    pub fn update_text_node(&self, handle: u32, text: &str) -> Result<()> {
        let (ptr, len) = self.write_str(text);
        self.imports()?.update_text_node(ptr, len, handle)
    }

    /// `delete_node`
    pub fn delete_node(&self, handle: u32) -> Result<()> {
        self.imports()?.delete_node(handle)
    }

    /// `node_text_to_element`
    pub fn node_text_to_element(&self, handle: u32, attributes: &Attributes) -> Result<()> {
        let (ptr, len) = self.write_value(&TextToElementArgs {
            id: handle,
            attributes: attributes.clone(),
        })?;
        self.imports()?.node_text_to_element(ptr, len)
    }

    /// `element_to_text_node`
    pub fn element_to_text_node(&self, handle: u32, text: &str) -> Result<()> {
        let (ptr, len) = self.write_str(text);
        self.imports()?.element_to_text_node(ptr, len, handle)
    }

    /// `update_element`
    pub fn update_element(&self, handle: u32, attributes: &Attributes) -> Result<()> {
        let (ptr, len) = self.write_value(&UpdateElementArgs {
            attributes: attributes.clone(),
        })?;
        self.imports()?.update_element(handle, ptr, len)
    }

    /// `create_event`, returning the registration id
    pub fn create_event(&self, atom: u32, kind: EventKind) -> Result<u32> {
        self.imports()?.create_event(atom, kind.ordinal())
    }

    /// `delete_event`
    pub fn delete_event(&self, atom: u32, kind: EventKind) -> Result<()> {
        self.imports()?.delete_event(atom, kind.ordinal())
    }

    /// `cancel_event`
    pub fn cancel_event(&self, registration: u32) -> Result<()> {
        self.imports()?.cancel_event(registration)
    }

    /// `inject_stylesheet`
    pub fn inject_stylesheet(&self, css: &str) -> Result<()> {
        let (ptr, len) = self.write_str(css);
        self.imports()?.inject_stylesheet(ptr, len)
    }

    /// Encode `text` exactly as the bridge would, failing on unencodable input
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        encode_string(text, self.encoding)
    }
}

impl GuestModule for ScriptedGuest {
    fn memory_size(&self) -> usize {
        self.memory.borrow().len()
    }

    fn read_memory(&self, offset: u32, len: u32) -> Result<Vec<u8>> {
        let memory = self.memory.borrow();
        let start = offset as usize;
        let end = start
            .checked_add(len as usize)
            .filter(|end| *end <= memory.len())
            .ok_or(BridgeError::MemoryOutOfBounds {
                offset,
                len,
                size: memory.len(),
            })?;
        Ok(memory[start..end].to_vec())
    }

    fn write_memory(&self, offset: u32, data: &[u8]) -> Result<()> {
        let mut memory = self.memory.borrow_mut();
        let size = memory.len();
        let start = offset as usize;
        let end = start
            .checked_add(data.len())
            .filter(|end| *end <= size)
            .ok_or(BridgeError::MemoryOutOfBounds {
                offset,
                len: data.len() as u32,
                size,
            })?;
        memory[start..end].copy_from_slice(data);
        Ok(())
    }

    fn create_string(&self, length: u32) -> Result<u32> {
        Ok(self.alloc(length))
    }

    fn callback0(&self, id: u32) -> Result<()> {
        let callback = self.callbacks.borrow().get(&id).cloned();
        match callback {
            Some(callback) => {
                trace!(id, "callback0");
                callback(self).map_err(|e| BridgeError::trap(EXPORT_CALLBACK0, e.to_string()))
            }
            None => Err(BridgeError::trap(
                EXPORT_CALLBACK0,
                format!("no callback {}", id),
            )),
        }
    }

    fn callback_event(&self, atom: u32, kind: u32, ptr: u32, len: u32) -> Result<()> {
        let payload = self.read_memory(ptr, len)?;
        let handler = self.on_event.borrow().clone();
        let Some(handler) = handler else {
            return Ok(());
        };
        handler(self, GuestEvent { atom, kind, payload })
            .map_err(|e| BridgeError::trap(EXPORT_CALLBACK_EVENT, e.to_string()))
    }
}

type InitFn = Box<dyn Fn(&ScriptedGuest) -> Result<()>>;

/// Instantiates [`ScriptedGuest`]s, running `init` as their start code
pub struct ScriptedLoader {
    init: InitFn,
    config: BridgeConfig,
    last: RefCell<Option<Rc<ScriptedGuest>>>,
}

impl ScriptedLoader {
    /// Create a loader with the given start code
    pub fn new<F>(init: F) -> Self
    where
        F: Fn(&ScriptedGuest) -> Result<()> + 'static,
    {
        Self {
            init: Box::new(init),
            config: BridgeConfig::default(),
            last: RefCell::new(None),
        }
    }

    /// Use the encoding and payload format of `config`
    pub fn with_config(mut self, config: &BridgeConfig) -> Self {
        self.config = config.clone();
        self
    }

    /// The most recently instantiated guest
    pub fn last_instance(&self) -> Option<Rc<ScriptedGuest>> {
        self.last.borrow().clone()
    }
}

impl ModuleLoader for ScriptedLoader {
    fn instantiate(&self, binary: &[u8], imports: HostImports) -> Result<Rc<dyn GuestModule>> {
        trace!(bytes = binary.len(), "Instantiating scripted guest");
        let guest = Rc::new(ScriptedGuest::new(imports, &self.config));
        (self.init)(&guest).map_err(|e| BridgeError::trap("_start", e.to_string()))?;

        *self.last.borrow_mut() = Some(Rc::clone(&guest));
        Ok(guest)
    }
}
