//! Error types for the bridge.
//!
//! This module defines error codes and the main error type used by every
//! bridge entry. Faults are never recovered from inside the bridge: a
//! command that fails is abandoned before it mutates the document.

use serde::{Deserialize, Serialize};

/// Error codes for categorizing faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Handle was never allocated or has been freed
    HandleNotFound,
    /// Operation is not allowed on the mount handle
    ReservedHandle,
    /// No listener is installed for the event kind
    EventNotBound,
    /// Event kind ordinal outside the closed set
    UnknownEventKind,
    /// Conversion requested on a node of the wrong kind
    NodeKindMismatch,
    /// Structured argument failed to decode
    MalformedPayload,
    /// Character does not fit the one-byte string encoding
    ByteRangeViolation,
    /// Pointer/length pair outside guest memory
    MemoryOutOfBounds,
    /// Command issued before the module finished instantiating
    NotInitialized,
    /// Script attributes or mount element missing at startup
    BootstrapConfig,
    /// Import symbol or arity not understood
    UnknownImport,
    /// Guest export failed
    GuestTrap,
    /// Bridge was dropped while the module still held imports
    BridgeDropped,
    /// An id space ran out of fresh values
    IdsExhausted,
    /// Invalid configuration
    Config,
    /// IO failure
    Io,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::HandleNotFound => "HANDLE_NOT_FOUND",
            ErrorCode::ReservedHandle => "RESERVED_HANDLE",
            ErrorCode::EventNotBound => "EVENT_NOT_BOUND",
            ErrorCode::UnknownEventKind => "UNKNOWN_EVENT_KIND",
            ErrorCode::NodeKindMismatch => "NODE_KIND_MISMATCH",
            ErrorCode::MalformedPayload => "MALFORMED_PAYLOAD",
            ErrorCode::ByteRangeViolation => "BYTE_RANGE_VIOLATION",
            ErrorCode::MemoryOutOfBounds => "MEMORY_OUT_OF_BOUNDS",
            ErrorCode::NotInitialized => "NOT_INITIALIZED",
            ErrorCode::BootstrapConfig => "BOOTSTRAP_CONFIG",
            ErrorCode::UnknownImport => "UNKNOWN_IMPORT",
            ErrorCode::GuestTrap => "GUEST_TRAP",
            ErrorCode::BridgeDropped => "BRIDGE_DROPPED",
            ErrorCode::IdsExhausted => "IDS_EXHAUSTED",
            ErrorCode::Config => "CONFIG",
            ErrorCode::Io => "IO",
        };
        f.write_str(name)
    }
}

/// Main error type for the bridge
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Handle was never allocated or already deleted
    #[error("Handle {handle} not found")]
    HandleNotFound {
        /// The offending handle
        handle: u32,
    },

    /// Mount handle cannot be deleted or converted
    #[error("Handle {handle} is reserved for the mount point")]
    ReservedHandle {
        /// The offending handle
        handle: u32,
    },

    /// Event kind has no installed listener on the atom
    #[error("No {kind} listener installed on handle {handle}")]
    EventNotBound {
        /// Atom handle
        handle: u32,
        /// Native event name
        kind: &'static str,
    },

    /// Event kind ordinal not in the closed set
    #[error("Unknown event kind ordinal {0}")]
    UnknownEventKind(u32),

    /// Conversion requested on the wrong node kind
    #[error("Handle {handle} is not a {expected} node")]
    NodeKindMismatch {
        /// Atom handle
        handle: u32,
        /// Node kind the operation requires
        expected: &'static str,
    },

    /// Payload failed to decode
    #[error("Malformed payload for {command}: {reason}")]
    MalformedPayload {
        /// Command being decoded
        command: &'static str,
        /// Decoder message
        reason: String,
    },

    /// Character outside the one-byte range
    #[error("Character U+{code:04X} at index {index} does not fit in one byte")]
    ByteRangeViolation {
        /// The character code
        code: u32,
        /// Position in the string
        index: usize,
    },

    /// Read or write outside guest memory
    #[error("Memory access out of bounds: offset {offset}, length {len}, memory size {size}")]
    MemoryOutOfBounds {
        /// Start offset
        offset: u32,
        /// Access length
        len: u32,
        /// Current memory size
        size: usize,
    },

    /// Marshaled string exceeds the configured bound
    #[error("String of {len} bytes exceeds limit of {limit} bytes")]
    StringTooLong {
        /// Requested length
        len: usize,
        /// Configured limit
        limit: usize,
    },

    /// Command issued while the module was still instantiating
    #[error("Bridge not initialized: {command} called before instantiation completed")]
    NotInitialized {
        /// Command name
        command: &'static str,
    },

    /// Startup configuration missing
    #[error("Bootstrap configuration error: {0}")]
    BootstrapConfig(String),

    /// Import symbol not understood
    #[error("Unknown import: {0}")]
    UnknownImport(String),

    /// Import called with the wrong number of arguments
    #[error("Import {import} expects {expected} arguments, got {got}")]
    ImportArity {
        /// Import symbol
        import: &'static str,
        /// Declared arity
        expected: usize,
        /// Supplied argument count
        got: usize,
    },

    /// Guest export failed
    #[error("Guest trap in {export}: {reason}")]
    GuestTrap {
        /// Export symbol
        export: &'static str,
        /// Failure description
        reason: String,
    },

    /// The bridge behind a module's imports is gone
    #[error("Bridge dropped")]
    BridgeDropped,

    /// No fresh id is left; ids are never reused
    #[error("Id space exhausted after {last}")]
    IdsExhausted {
        /// Last id handed out
        last: u32,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::HandleNotFound { .. } => ErrorCode::HandleNotFound,
            BridgeError::ReservedHandle { .. } => ErrorCode::ReservedHandle,
            BridgeError::EventNotBound { .. } => ErrorCode::EventNotBound,
            BridgeError::UnknownEventKind(_) => ErrorCode::UnknownEventKind,
            BridgeError::NodeKindMismatch { .. } => ErrorCode::NodeKindMismatch,
            BridgeError::MalformedPayload { .. } => ErrorCode::MalformedPayload,
            BridgeError::ByteRangeViolation { .. } => ErrorCode::ByteRangeViolation,
            BridgeError::MemoryOutOfBounds { .. } | BridgeError::StringTooLong { .. } => {
                ErrorCode::MemoryOutOfBounds
            }
            BridgeError::NotInitialized { .. } => ErrorCode::NotInitialized,
            BridgeError::BootstrapConfig(_) => ErrorCode::BootstrapConfig,
            BridgeError::UnknownImport(_) | BridgeError::ImportArity { .. } => {
                ErrorCode::UnknownImport
            }
            BridgeError::GuestTrap { .. } => ErrorCode::GuestTrap,
            BridgeError::BridgeDropped => ErrorCode::BridgeDropped,
            BridgeError::IdsExhausted { .. } => ErrorCode::IdsExhausted,
            BridgeError::Config(_) => ErrorCode::Config,
            BridgeError::Io(_) => ErrorCode::Io,
        }
    }

    /// Whether the error names something the module never created or
    /// already removed: an unknown handle or an unbound event kind
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BridgeError::HandleNotFound { .. } | BridgeError::EventNotBound { .. }
        )
    }

    /// Create a malformed payload error
    pub fn malformed(command: &'static str, reason: impl std::fmt::Display) -> Self {
        BridgeError::MalformedPayload {
            command,
            reason: reason.to_string(),
        }
    }

    /// Create a guest trap error
    pub fn trap(export: &'static str, reason: impl Into<String>) -> Self {
        BridgeError::GuestTrap {
            export,
            reason: reason.into(),
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::HandleNotFound.to_string(), "HANDLE_NOT_FOUND");
        assert_eq!(ErrorCode::ByteRangeViolation.to_string(), "BYTE_RANGE_VIOLATION");
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::MalformedPayload).unwrap();
        assert_eq!(json, "\"MALFORMED_PAYLOAD\"");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            BridgeError::HandleNotFound { handle: 3 }.code(),
            ErrorCode::HandleNotFound
        );
        assert_eq!(
            BridgeError::malformed("create_element", "missing field `parent`").code(),
            ErrorCode::MalformedPayload
        );
        assert_eq!(
            BridgeError::StringTooLong { len: 10, limit: 5 }.code(),
            ErrorCode::MemoryOutOfBounds
        );
    }

    #[test]
    fn test_not_found_class() {
        assert!(BridgeError::HandleNotFound { handle: 1 }.is_not_found());
        assert!(BridgeError::EventNotBound {
            handle: 1,
            kind: "click"
        }
        .is_not_found());
        assert!(!BridgeError::ReservedHandle { handle: 0 }.is_not_found());
        assert!(!BridgeError::IdsExhausted { last: u32::MAX }.is_not_found());
    }

    #[test]
    fn test_error_messages() {
        let err = BridgeError::ByteRangeViolation {
            code: 0x263A,
            index: 2,
        };
        assert_eq!(
            err.to_string(),
            "Character U+263A at index 2 does not fit in one byte"
        );

        let err = BridgeError::HandleNotFound { handle: 7 };
        assert!(err.to_string().contains('7'));
    }
}
