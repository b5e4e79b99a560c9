//! Moving strings and payloads across the linear-memory boundary.
//!
//! Only raw byte offsets cross: the module hands the bridge a
//! `(pointer, length)` pair, and the bridge asks the module to allocate
//! before writing anything back.

use crate::config::{BridgeConfig, PayloadFormat, StringEncoding};
use crate::error::{BridgeError, Result};
use crate::guest::GuestModule;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode `text` as boundary bytes
pub fn encode_string(text: &str, encoding: StringEncoding) -> Result<Vec<u8>> {
    match encoding {
        StringEncoding::Latin1 => text
            .chars()
            .enumerate()
            .map(|(index, c)| {
                u8::try_from(u32::from(c)).map_err(|_| BridgeError::ByteRangeViolation {
                    code: u32::from(c),
                    index,
                })
            })
            .collect(),
        StringEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
    }
}

/// Decode boundary bytes into a string
pub fn decode_string(
    bytes: Vec<u8>,
    encoding: StringEncoding,
    command: &'static str,
) -> Result<String> {
    match encoding {
        StringEncoding::Latin1 => Ok(bytes.into_iter().map(char::from).collect()),
        StringEncoding::Utf8 => {
            String::from_utf8(bytes).map_err(|e| BridgeError::malformed(command, e))
        }
    }
}

/// Serialize a structured value in the configured payload format
pub fn encode_payload<T: Serialize>(
    value: &T,
    format: PayloadFormat,
    encoding: StringEncoding,
) -> Result<Vec<u8>> {
    match format {
        PayloadFormat::Json => {
            let json = serde_json::to_string(value)
                .map_err(|e| BridgeError::malformed("encode", e))?;
            encode_string(&json, encoding)
        }
        PayloadFormat::MessagePack => {
            rmp_serde::to_vec_named(value).map_err(|e| BridgeError::malformed("encode", e))
        }
    }
}

/// Deserialize a structured value in the configured payload format
pub fn decode_payload<T: DeserializeOwned>(
    bytes: Vec<u8>,
    format: PayloadFormat,
    encoding: StringEncoding,
    command: &'static str,
) -> Result<T> {
    match format {
        PayloadFormat::Json => {
            let text = decode_string(bytes, encoding, command)?;
            serde_json::from_str(&text).map_err(|e| BridgeError::malformed(command, e))
        }
        PayloadFormat::MessagePack => {
            rmp_serde::from_slice(&bytes).map_err(|e| BridgeError::malformed(command, e))
        }
    }
}

/// Encode a length as the 4-byte little-endian field the module reads
pub fn length_field(len: u32) -> [u8; 4] {
    len.to_le_bytes()
}

/// Marshaling routines bound to one module and configuration
pub struct Marshal<'a> {
    guest: &'a dyn GuestModule,
    encoding: StringEncoding,
    format: PayloadFormat,
    max_bytes: usize,
}

impl<'a> Marshal<'a> {
    /// Bind to a module
    pub fn new(guest: &'a dyn GuestModule, config: &BridgeConfig) -> Self {
        Self {
            guest,
            encoding: config.string_encoding,
            format: config.payload_format,
            max_bytes: config.max_string_bytes,
        }
    }

    /// Copy `len` bytes out of module memory
    pub fn read_bytes(&self, ptr: u32, len: u32) -> Result<Vec<u8>> {
        self.check_len(len as usize)?;
        self.guest.read_memory(ptr, len)
    }

    /// Read a string the module passed as `(ptr, len)`
    pub fn read_string(&self, ptr: u32, len: u32, command: &'static str) -> Result<String> {
        let bytes = self.read_bytes(ptr, len)?;
        decode_string(bytes, self.encoding, command)
    }

    /// Read and decode a structured argument
    pub fn read_payload<T: DeserializeOwned>(
        &self,
        ptr: u32,
        len: u32,
        command: &'static str,
    ) -> Result<T> {
        let bytes = self.read_bytes(ptr, len)?;
        decode_payload(bytes, self.format, self.encoding, command)
    }

    /// Allocate in module memory through `create_string` and copy `bytes` in
    pub fn write_bytes(&self, bytes: &[u8]) -> Result<u32> {
        self.check_len(bytes.len())?;
        let ptr = self.guest.create_string(bytes.len() as u32)?;
        self.guest.write_memory(ptr, bytes)?;
        Ok(ptr)
    }

    /// Write a string into module memory, returning `(ptr, len)`
    pub fn write_string(&self, text: &str) -> Result<(u32, u32)> {
        let bytes = encode_string(text, self.encoding)?;
        let ptr = self.write_bytes(&bytes)?;
        Ok((ptr, bytes.len() as u32))
    }

    /// Serialize a payload into module memory, returning `(ptr, len)`
    pub fn write_payload<T: Serialize>(&self, value: &T) -> Result<(u32, u32)> {
        let bytes = encode_payload(value, self.format, self.encoding)?;
        let ptr = self.write_bytes(&bytes)?;
        Ok((ptr, bytes.len() as u32))
    }

    /// Write the mount name's length at `length_ptr`, then the name itself.
    ///
    /// Returns the pointer to the name bytes.
    pub fn write_mount_id(&self, length_ptr: u32, name: &str) -> Result<u32> {
        let bytes = encode_string(name, self.encoding)?;
        self.check_len(bytes.len())?;
        self.guest
            .write_memory(length_ptr, &length_field(bytes.len() as u32))?;
        self.write_bytes(&bytes)
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len > self.max_bytes {
            return Err(BridgeError::StringTooLong {
                len,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::events::{EventKind, EventPayload, NativeEvent};
    use crate::guest::ScriptedGuest;

    #[test]
    fn test_latin1_round_trip_all_bytes() {
        let guest = ScriptedGuest::detached();
        let marshal = Marshal::new(&guest, &BridgeConfig::default());

        let bytes: Vec<u8> = (0..=255).collect();
        let ptr = marshal.write_bytes(&bytes).unwrap();
        assert_eq!(marshal.read_bytes(ptr, 256).unwrap(), bytes);

        let text = marshal.read_string(ptr, 256, "test").unwrap();
        assert_eq!(text.chars().count(), 256);
        assert_eq!(encode_string(&text, StringEncoding::Latin1).unwrap(), bytes);
    }

    #[test]
    fn test_latin1_rejects_wide_characters() {
        let err = encode_string("ok\u{263A}", StringEncoding::Latin1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ByteRangeViolation);
        assert!(matches!(
            err,
            BridgeError::ByteRangeViolation { code: 0x263A, index: 2 }
        ));
    }

    #[test]
    fn test_latin1_accepts_upper_half() {
        assert_eq!(
            encode_string("é", StringEncoding::Latin1).unwrap(),
            vec![0xE9]
        );
    }

    #[test]
    fn test_utf8_strings() {
        let guest = ScriptedGuest::detached();
        let config = BridgeConfig::default().with_string_encoding(StringEncoding::Utf8);
        let marshal = Marshal::new(&guest, &config);

        let (ptr, len) = marshal.write_string("héllo ☺").unwrap();
        assert_eq!(len as usize, "héllo ☺".len());
        assert_eq!(marshal.read_string(ptr, len, "test").unwrap(), "héllo ☺");

        let bad = marshal.write_bytes(&[0xFF, 0xFE]).unwrap();
        assert_eq!(
            marshal.read_string(bad, 2, "test").unwrap_err().code(),
            ErrorCode::MalformedPayload
        );
    }

    #[test]
    fn test_mount_id_layout() {
        let guest = ScriptedGuest::detached();
        let marshal = Marshal::new(&guest, &BridgeConfig::default());

        let length_ptr = guest.alloc(4);
        let ptr = marshal.write_mount_id(length_ptr, "app-root").unwrap();

        let field = guest.read_memory(length_ptr, 4).unwrap();
        assert_eq!(field, vec![8, 0, 0, 0]);
        assert_eq!(guest.read_memory(ptr, 8).unwrap(), b"app-root".to_vec());
    }

    #[test]
    fn test_length_field_is_little_endian() {
        assert_eq!(length_field(0x0102_0304), [4, 3, 2, 1]);
    }

    #[test]
    fn test_string_limit() {
        let guest = ScriptedGuest::detached();
        let config = BridgeConfig::default().with_max_string_bytes(4);
        let marshal = Marshal::new(&guest, &config);

        assert!(marshal.write_string("four").is_ok());
        assert_eq!(
            marshal.write_string("fives").unwrap_err().code(),
            ErrorCode::MemoryOutOfBounds
        );
        assert!(marshal.read_bytes(0, 5).is_err());
    }

    #[test]
    fn test_payload_formats_decode_event_shapes() {
        let event = NativeEvent::at(7, 9).with_button(2);
        let payload = EventKind::PointerDown.payload(&event);

        for format in [PayloadFormat::Json, PayloadFormat::MessagePack] {
            let bytes = encode_payload(&payload, format, StringEncoding::Latin1).unwrap();
            let decoded: EventPayload =
                decode_payload(bytes, format, StringEncoding::Latin1, "test").unwrap();
            assert_eq!(decoded, payload);
        }
    }

    #[test]
    fn test_malformed_json_payload() {
        let err = decode_payload::<EventPayload>(
            b"{not json".to_vec(),
            PayloadFormat::Json,
            StringEncoding::Latin1,
            "create_element",
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedPayload);
        assert!(err.to_string().contains("create_element"));
    }
}
