//! Monotonic handle allocation.

use crate::error::{BridgeError, Result};

/// Strictly increasing integer allocator.
///
/// Values are never reused, even after the handle they named is freed.
/// `u32::MAX` is the last value handed out; after it `next` fails.
#[derive(Debug, Clone)]
pub struct Counter {
    next: Option<u32>,
}

impl Counter {
    /// Create a counter whose first value is `start`
    pub fn new(start: u32) -> Self {
        Self { next: Some(start) }
    }

    /// Return the current value, then advance
    pub fn next(&mut self) -> Result<u32> {
        let value = self
            .next
            .ok_or(BridgeError::IdsExhausted { last: u32::MAX })?;
        self.next = value.checked_add(1);
        Ok(value)
    }

    /// The value the next call will return, if any is left
    pub fn peek(&self) -> Option<u32> {
        self.next
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new(0)
    }
}
