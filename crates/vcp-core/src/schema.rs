//! Declarative message layouts for the envelope codec.
//!
//! A [`Schema`] names every message type and, for each, the fields it carries:
//! name, protobuf field number, kind, and for length-delimited fields an
//! optional exact size. The codec in [`crate::record`] is driven entirely by
//! this description, so a controller firmware that renumbers or adds fields
//! only needs a new schema, which can be loaded from JSON:
//!
//! ```json
//! { "messages": { "Destination": { "fields": [
//!     { "name": "domain", "number": 1, "kind": "varint" },
//!     { "name": "routing_address", "number": 2, "kind": "bytes", "size": 16 }
//! ] } } }
//! ```

use crate::error::{Error, Result, Stage};
use crate::wire::MAX_FIELD_NUMBER;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Top-level message of a routable exchange.
pub const ROUTABLE_MESSAGE: &str = "RoutableMessage";
/// Addressing sub-message.
pub const DESTINATION: &str = "Destination";
/// Signer identity, AEAD metadata and handshake tag.
pub const SIGNATURE_DATA: &str = "SignatureData";
/// Epoch, nonce, counter and expiry of a sealed payload.
pub const AEAD_METADATA: &str = "AeadMetadata";
/// Local public key and challenge.
pub const SESSION_INFO_REQUEST: &str = "SessionInfoRequest";
/// Controller status and fault.
pub const MESSAGE_STATUS: &str = "MessageStatus";
/// Controller session state returned by the handshake.
pub const SESSION_INFO: &str = "SessionInfo";

/// Field value kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Unsigned varint.
    Varint,
    /// Opaque length-delimited bytes.
    Bytes,
    /// Nested message named by [`FieldSchema::message`].
    Message,
}

/// One field of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name, used by callers to get and set values.
    pub name: String,
    /// Protobuf field number.
    pub number: u32,
    /// Value kind.
    pub kind: FieldKind,
    /// Nested message type, required for [`FieldKind::Message`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Exact byte length for [`FieldKind::Bytes`] fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
}

impl FieldSchema {
    /// Varint field.
    pub fn varint(name: &str, number: u32) -> Self {
        Self {
            name: name.to_string(),
            number,
            kind: FieldKind::Varint,
            message: None,
            size: None,
        }
    }

    /// Variable-length bytes field.
    pub fn bytes(name: &str, number: u32) -> Self {
        Self {
            kind: FieldKind::Bytes,
            ..Self::varint(name, number)
        }
    }

    /// Bytes field of exactly `size` bytes.
    pub fn fixed(name: &str, number: u32, size: usize) -> Self {
        Self {
            size: Some(size),
            ..Self::bytes(name, number)
        }
    }

    /// Nested message field.
    pub fn message(name: &str, number: u32, message: &str) -> Self {
        Self {
            kind: FieldKind::Message,
            message: Some(message.to_string()),
            ..Self::varint(name, number)
        }
    }
}

/// Fields of one message type, in encoding order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSchema {
    /// Field list.
    pub fields: Vec<FieldSchema>,
}

impl MessageSchema {
    /// Message with the given fields.
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self { fields }
    }

    /// Look up a field by number.
    pub fn field_by_number(&self, number: u32) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.number == number)
    }

    /// Look up a field by name.
    pub fn field_by_name(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A set of named message layouts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Message layouts by type name.
    pub messages: BTreeMap<String, MessageSchema>,
}

impl Schema {
    /// Parse and validate a JSON schema description.
    pub fn from_json(json: &str) -> Result<Self> {
        let schema: Self = serde_json::from_str(json)
            .map_err(|e| Error::format(Stage::Schema, format!("invalid JSON: {e}")))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::format(Stage::Schema, e.to_string()))
    }

    /// Look up a message type.
    pub fn message(&self, name: &str) -> Option<&MessageSchema> {
        self.messages.get(name)
    }

    /// Check field numbers and names are unique and in range, nested
    /// references resolve, and size constraints only appear on bytes fields.
    pub fn validate(&self) -> Result<()> {
        for (message_name, message) in &self.messages {
            let mut numbers = BTreeSet::new();
            let mut names = BTreeSet::new();
            for field in &message.fields {
                let at = |what: &str| {
                    Error::format(
                        Stage::Schema,
                        format!("{message_name}.{}: {what}", field.name),
                    )
                };
                if field.number == 0 || field.number > MAX_FIELD_NUMBER {
                    return Err(at("field number out of range"));
                }
                if !numbers.insert(field.number) {
                    return Err(at("duplicate field number"));
                }
                if !names.insert(field.name.as_str()) {
                    return Err(at("duplicate field name"));
                }
                match (field.kind, &field.message) {
                    (FieldKind::Message, Some(nested)) if self.messages.contains_key(nested) => {}
                    (FieldKind::Message, Some(_)) => return Err(at("unknown nested message")),
                    (FieldKind::Message, None) => return Err(at("message field without type")),
                    (_, Some(_)) => return Err(at("nested type on non-message field")),
                    (_, None) => {}
                }
                if field.size.is_some() && field.kind != FieldKind::Bytes {
                    return Err(at("size constraint on non-bytes field"));
                }
            }
        }
        Ok(())
    }

    /// Fail unless every message in `names` is present.
    pub fn require(&self, names: &[&str]) -> Result<()> {
        for name in names {
            if !self.messages.contains_key(*name) {
                return Err(Error::format(
                    Stage::Schema,
                    format!("missing message type {name}"),
                ));
            }
        }
        Ok(())
    }

    /// Built-in layout of the routable message and session info.
    pub fn routable() -> Self {
        use FieldSchema as F;

        let mut messages = BTreeMap::new();
        messages.insert(
            ROUTABLE_MESSAGE.to_string(),
            MessageSchema::new(vec![
                F::message("to_destination", 6, DESTINATION),
                F::message("from_destination", 7, DESTINATION),
                F::bytes("payload", 10),
                F::message("status", 12, MESSAGE_STATUS),
                F::message("signature_data", 13, SIGNATURE_DATA),
                F::message("session_info_request", 14, SESSION_INFO_REQUEST),
                F::bytes("session_info", 15),
                F::fixed("request_uuid", 50, 16),
                F::fixed("uuid", 51, 16),
                F::varint("flags", 52),
            ]),
        );
        messages.insert(
            DESTINATION.to_string(),
            MessageSchema::new(vec![
                F::varint("domain", 1),
                F::fixed("routing_address", 2, 16),
            ]),
        );
        messages.insert(
            SIGNATURE_DATA.to_string(),
            MessageSchema::new(vec![
                F::fixed("signer_public_key", 1, 65),
                F::message("aead", 5, AEAD_METADATA),
                F::fixed("session_info_tag", 6, 32),
            ]),
        );
        messages.insert(
            AEAD_METADATA.to_string(),
            MessageSchema::new(vec![
                F::fixed("epoch", 1, 16),
                F::fixed("nonce", 2, 12),
                F::varint("counter", 3),
                F::varint("expires_at", 4),
            ]),
        );
        messages.insert(
            SESSION_INFO_REQUEST.to_string(),
            MessageSchema::new(vec![
                F::fixed("public_key", 1, 65),
                F::fixed("challenge", 2, 16),
            ]),
        );
        messages.insert(
            MESSAGE_STATUS.to_string(),
            MessageSchema::new(vec![
                F::varint("operation_status", 1),
                F::varint("fault", 2),
            ]),
        );
        messages.insert(
            SESSION_INFO.to_string(),
            MessageSchema::new(vec![
                F::varint("counter", 1),
                F::fixed("public_key", 2, 65),
                F::fixed("epoch", 3, 16),
                F::varint("clock_time", 4),
                F::varint("status", 5),
            ]),
        );
        Self { messages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_schema_is_valid() {
        let schema = Schema::routable();
        schema.validate().unwrap();
        schema
            .require(&[ROUTABLE_MESSAGE, SESSION_INFO, SIGNATURE_DATA])
            .unwrap();
    }

    #[test]
    fn test_json_roundtrip_of_builtin() {
        let schema = Schema::routable();
        let json = schema.to_json().unwrap();
        assert_eq!(Schema::from_json(&json).unwrap(), schema);
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{ "messages": { "Destination": { "fields": [
            { "name": "domain", "number": 1, "kind": "varint" },
            { "name": "routing_address", "number": 2, "kind": "bytes", "size": 16 }
        ] } } }"#;
        let schema = Schema::from_json(json).unwrap();
        let dest = schema.message(DESTINATION).unwrap();
        assert_eq!(dest.field_by_number(2).unwrap().size, Some(16));
        assert_eq!(dest.field_by_name("domain").unwrap().kind, FieldKind::Varint);
    }

    #[test]
    fn test_rejects_duplicate_numbers() {
        let json = r#"{ "messages": { "M": { "fields": [
            { "name": "a", "number": 1, "kind": "varint" },
            { "name": "b", "number": 1, "kind": "bytes" }
        ] } } }"#;
        assert!(Schema::from_json(json).is_err());
    }

    #[test]
    fn test_rejects_dangling_message_reference() {
        let json = r#"{ "messages": { "M": { "fields": [
            { "name": "a", "number": 1, "kind": "message", "message": "Nope" }
        ] } } }"#;
        assert!(Schema::from_json(json).is_err());
    }

    #[test]
    fn test_rejects_size_on_varint() {
        let json = r#"{ "messages": { "M": { "fields": [
            { "name": "a", "number": 1, "kind": "varint", "size": 4 }
        ] } } }"#;
        assert!(Schema::from_json(json).is_err());
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = Schema::from_json("{ not json").unwrap_err();
        assert!(matches!(err, Error::Format { stage: Stage::Schema, .. }));
    }
}
