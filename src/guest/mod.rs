//! The binary module as the bridge sees it.
//!
//! A module is a linear memory addressed by byte offsets plus three
//! exported entry points. How it is compiled and instantiated is up to the
//! [`ModuleLoader`]; the bridge only needs these traits.

pub mod scripted;

use crate::bridge::HostImports;
use crate::error::Result;
use std::rc::Rc;

pub use scripted::{GuestEvent, ScriptedGuest, ScriptedLoader};

/// Export invoking a deferred or zero-argument callback
pub const EXPORT_CALLBACK0: &str = "blocks_in_callback0";

/// Export delivering a serialized event
pub const EXPORT_CALLBACK_EVENT: &str = "blocks_in_callback_event";

/// Export allocating a buffer for a host-written string
pub const EXPORT_CREATE_STRING: &str = "blocks_in_create_string";

/// An instantiated module: linear memory plus exported entry points.
///
/// Every export may re-enter the bridge through the module's imports
/// before it returns.
pub trait GuestModule {
    /// Current size of linear memory in bytes
    fn memory_size(&self) -> usize;

    /// Copy `len` bytes starting at `offset` out of linear memory
    fn read_memory(&self, offset: u32, len: u32) -> Result<Vec<u8>>;

    /// Copy `data` into linear memory starting at `offset`
    fn write_memory(&self, offset: u32, data: &[u8]) -> Result<()>;

    /// `blocks_in_create_string`: allocate `length` bytes, return the pointer
    fn create_string(&self, length: u32) -> Result<u32>;

    /// `blocks_in_callback0`: invoke callback `id`
    fn callback0(&self, id: u32) -> Result<()>;

    /// `blocks_in_callback_event`: deliver the payload at `(ptr, len)`
    fn callback_event(&self, atom: u32, kind: u32, ptr: u32, len: u32) -> Result<()>;
}

/// Turns module bytes into a running [`GuestModule`].
///
/// `instantiate` runs the module's start code; during that run only the
/// `defer` import is usable.
pub trait ModuleLoader {
    /// Instantiate `binary`, wiring `imports` as the module's environment
    fn instantiate(&self, binary: &[u8], imports: HostImports) -> Result<Rc<dyn GuestModule>>;
}
