//! Input event kinds and their boundary shapes.
//!
//! The set of kinds is closed: each variant has a native listener name and
//! a fixed payload shape. New kinds are added as variants, never by
//! accepting arbitrary event names.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};

/// Supported input event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u32)]
pub enum EventKind {
    /// Primary button click
    Click = 0,
    /// Pointer button pressed
    PointerDown = 1,
    /// Pointer button released
    PointerUp = 2,
}

impl EventKind {
    /// Every kind, in ordinal order
    pub const ALL: [EventKind; 3] = [EventKind::Click, EventKind::PointerDown, EventKind::PointerUp];

    /// Decode a kind from the ordinal the module passes
    pub fn from_ordinal(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(EventKind::Click),
            1 => Ok(EventKind::PointerDown),
            2 => Ok(EventKind::PointerUp),
            other => Err(BridgeError::UnknownEventKind(other)),
        }
    }

    /// The ordinal sent across the boundary
    pub fn ordinal(self) -> u32 {
        self as u32
    }

    /// Native listener name
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Click => "click",
            EventKind::PointerDown => "mousedown",
            EventKind::PointerUp => "mouseup",
        }
    }

    /// Extract this kind's payload shape from a native event
    pub fn payload(self, event: &NativeEvent) -> EventPayload {
        match self {
            EventKind::Click => EventPayload::Click(ClickPayload {
                x: event.client_x,
                y: event.client_y,
            }),
            EventKind::PointerDown | EventKind::PointerUp => {
                EventPayload::Pointer(PointerPayload {
                    button: event.button,
                    x: event.client_x,
                    y: event.client_y,
                })
            }
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Mouse button codes carried by pointer events
pub mod buttons {
    /// Main button
    pub const LEFT: u16 = 0;
    /// Wheel button
    pub const MIDDLE: u16 = 1;
    /// Secondary button
    pub const RIGHT: u16 = 2;
}

/// A native event as the document delivers it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NativeEvent {
    /// Horizontal client coordinate
    pub client_x: i32,
    /// Vertical client coordinate
    pub client_y: i32,
    /// Button code (0 left, 1 middle, 2 right)
    pub button: u16,
}

impl NativeEvent {
    /// Create an event at the given client coordinates
    pub fn at(client_x: i32, client_y: i32) -> Self {
        Self {
            client_x,
            client_y,
            button: buttons::LEFT,
        }
    }

    /// Set the button code
    pub fn with_button(mut self, button: u16) -> Self {
        self.button = button;
        self
    }
}

/// Click payload: `{x, y}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickPayload {
    /// Horizontal coordinate
    pub x: i32,
    /// Vertical coordinate
    pub y: i32,
}

/// Pointer payload: `{button, x, y}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerPayload {
    /// Button code
    pub button: u16,
    /// Horizontal coordinate
    pub x: i32,
    /// Vertical coordinate
    pub y: i32,
}

/// Serialized shape of an event crossing into the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    /// Pointer shape (listed first so untagged decoding prefers it)
    Pointer(PointerPayload),
    /// Click shape
    Click(ClickPayload),
}
