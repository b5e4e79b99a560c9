//! # Blocks Bridge
//!
//! This library lets a compiled linear-memory module drive a live document
//! tree and receive its input events, without either side knowing the
//! other's internal representation.
//!
//! ## Architecture
//!
//! ```text
//! Module (linear memory)
//!     │
//!     │ blocks_out_* imports (integers, ptr/len pairs)
//!     ▼
//! Bridge (this crate) ── AtomTable ── Document
//!     ▲
//!     │ blocks_in_* exports (callback0, callback_event, create_string)
//!     │
//! Native event listeners
//! ```
//!
//! ## Features
//!
//! - **Stable Handles**: Integer handles survive in-place node conversion
//! - **Listener Indirection**: Event logic rebinds without touching the tree
//! - **Offset-Only Marshaling**: Strings cross as `(ptr, len)` pairs
//! - **Re-entrant Relay**: Event handlers may issue commands mid-dispatch

#![deny(missing_docs)]

pub mod atom;
pub mod atoms;
pub mod bootstrap;
pub mod bridge;
pub mod config;
pub mod counter;
pub mod document;
pub mod error;
pub mod events;
pub mod guest;
pub mod marshal;
pub mod metrics;
pub mod registry;

// Re-export commonly used types
pub use atoms::{AtomTable, Handle, MOUNT_HANDLE};
pub use bootstrap::{load, ScriptAttributes};
pub use bridge::{Bridge, ConsoleLine, HostImports, Import};
pub use config::{BridgeConfig, PayloadFormat, StringEncoding};
pub use document::{Document, MemoryDocument, NodeId};
pub use error::{BridgeError, ErrorCode, Result};
pub use events::{EventKind, NativeEvent};
pub use guest::{GuestModule, ModuleLoader};
pub use metrics::{BridgeMetrics, BridgeStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install a formatting subscriber honoring `RUST_LOG`.
///
/// Defaults this crate to `debug`. Does nothing if a global subscriber is
/// already set.
pub fn init_tracing() {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "blocks_bridge=debug".parse() {
        filter = filter.add_directive(directive);
    }
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
