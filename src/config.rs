//! Bridge configuration types and defaults.
//!
//! This module defines the configuration options for the bridge, including
//! string encoding, payload format, and bootstrap discovery.

use serde::{Deserialize, Serialize};

/// Default id of the bootstrap script element
pub const DEFAULT_SCRIPT_ID: &str = "blocks-loader";

/// Default tag for created elements
pub const DEFAULT_ELEMENT_TAG: &str = "div";

/// Default maximum marshaled string size (16 MB)
pub const DEFAULT_MAX_STRING_BYTES: usize = 16 * 1024 * 1024;

/// Default number of console lines kept before the oldest are dropped
pub const DEFAULT_MAX_CONSOLE_LINES: usize = 1024;

/// How characters cross the linear-memory boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StringEncoding {
    /// One byte per character; characters above U+00FF are rejected
    #[default]
    Latin1,
    /// UTF-8 byte stream; lengths are byte lengths
    Utf8,
}

/// Encoding for structured payloads (command arguments and event data)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PayloadFormat {
    /// JSON text
    #[default]
    Json,
    /// MessagePack with named fields
    MessagePack,
}

/// Configuration for the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Id of the script element carrying `data-binary` and `data-mount`
    #[serde(default = "default_script_id")]
    pub script_id: String,

    /// Tag used for every element the module creates (default: div)
    #[serde(default = "default_element_tag")]
    pub element_tag: String,

    /// String encoding across the boundary (default: latin1)
    #[serde(default)]
    pub string_encoding: StringEncoding,

    /// Structured payload format (default: json)
    #[serde(default)]
    pub payload_format: PayloadFormat,

    /// Upper bound on a single marshaled string
    #[serde(default = "default_max_string_bytes")]
    pub max_string_bytes: usize,

    /// Console lines kept in memory; 0 disables capture
    #[serde(default = "default_max_console_lines")]
    pub max_console_lines: usize,

    /// Log decoded payloads (default: false)
    #[serde(default)]
    pub debug: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            script_id: DEFAULT_SCRIPT_ID.to_string(),
            element_tag: DEFAULT_ELEMENT_TAG.to_string(),
            string_encoding: StringEncoding::default(),
            payload_format: PayloadFormat::default(),
            max_string_bytes: DEFAULT_MAX_STRING_BYTES,
            max_console_lines: DEFAULT_MAX_CONSOLE_LINES,
            debug: false,
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON, filling defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the bootstrap script id
    pub fn with_script_id(mut self, id: impl Into<String>) -> Self {
        self.script_id = id.into();
        self
    }

    /// Set the element tag
    pub fn with_element_tag(mut self, tag: impl Into<String>) -> Self {
        self.element_tag = tag.into();
        self
    }

    /// Set the string encoding
    pub fn with_string_encoding(mut self, encoding: StringEncoding) -> Self {
        self.string_encoding = encoding;
        self
    }

    /// Set the payload format
    pub fn with_payload_format(mut self, format: PayloadFormat) -> Self {
        self.payload_format = format;
        self
    }

    /// Set the maximum string size
    pub fn with_max_string_bytes(mut self, bytes: usize) -> Self {
        self.max_string_bytes = bytes;
        self
    }

    /// Set how many console lines are kept
    pub fn with_max_console_lines(mut self, lines: usize) -> Self {
        self.max_console_lines = lines;
        self
    }

    /// Enable debug mode
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.script_id.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "script_id".into(),
                reason: "must not be empty".into(),
            });
        }

        if self.element_tag.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "element_tag".into(),
                reason: "must not be empty".into(),
            });
        }

        if self.max_string_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_string_bytes".into(),
                reason: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field name
        field: String,
        /// The reason it's invalid
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Default value functions for serde
fn default_script_id() -> String {
    DEFAULT_SCRIPT_ID.to_string()
}

fn default_element_tag() -> String {
    DEFAULT_ELEMENT_TAG.to_string()
}

fn default_max_string_bytes() -> usize {
    DEFAULT_MAX_STRING_BYTES
}

fn default_max_console_lines() -> usize {
    DEFAULT_MAX_CONSOLE_LINES
}
