//! Event registrations addressable by their own id.
//!
//! The numbering space is independent from atom handles: a registration id
//! names "this binding of this kind on this atom" so the module can cancel
//! it later without remembering the pair.

use crate::atoms::Handle;
use crate::counter::Counter;
use crate::error::{BridgeError, Result};
use crate::events::EventKind;
use std::collections::HashMap;

/// What a registration id points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// Owning atom
    pub atom: Handle,
    /// Bound kind
    pub kind: EventKind,
}

/// Registration id → (atom, kind)
#[derive(Debug, Default)]
pub struct EventRegistry {
    counter: Counter,
    entries: HashMap<u32, Registration>,
}

impl EventRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a registration and return its id
    pub fn create(&mut self, atom: Handle, kind: EventKind) -> Result<u32> {
        let id = self.counter.next()?;
        self.entries.insert(id, Registration { atom, kind });
        Ok(id)
    }

    /// Id of the registration for `(atom, kind)`, if one exists
    pub fn find(&self, atom: Handle, kind: EventKind) -> Option<u32> {
        self.entries
            .iter()
            .find(|(_, r)| r.atom == atom && r.kind == kind)
            .map(|(id, _)| *id)
    }

    /// Look up a registration
    pub fn get(&self, id: u32) -> Result<Registration> {
        self.entries
            .get(&id)
            .copied()
            .ok_or(BridgeError::HandleNotFound { handle: id })
    }

    /// Remove a registration
    pub fn delete(&mut self, id: u32) -> Result<Registration> {
        self.entries
            .remove(&id)
            .ok_or(BridgeError::HandleNotFound { handle: id })
    }

    /// Drop the registration for `(atom, kind)` if present
    pub fn forget(&mut self, atom: Handle, kind: EventKind) {
        self.entries
            .retain(|_, r| !(r.atom == atom && r.kind == kind));
    }

    /// Drop every registration owned by `atom`
    pub fn forget_atom(&mut self, atom: Handle) {
        self.entries.retain(|_, r| r.atom != atom);
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no registrations are live
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
