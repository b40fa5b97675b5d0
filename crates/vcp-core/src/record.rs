//! Schema-driven encoding of dynamic records.
//!
//! A [`Record`] maps field names to [`Value`]s. [`encode`] writes present
//! fields in schema order; [`decode`] is its strict inverse for every field
//! the schema names, and skips field numbers it does not know.

use crate::error::{Error, Result, Stage};
use crate::schema::{FieldKind, FieldSchema, MessageSchema, Schema};
use crate::wire::{self, FieldReader, RawValue};
use std::collections::BTreeMap;

/// Deepest nesting [`decode`] follows before giving up.
pub const MAX_DEPTH: usize = 8;

/// A field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Varint field.
    Varint(u64),
    /// Bytes field.
    Bytes(Vec<u8>),
    /// Nested message.
    Message(Record),
}

/// A message instance keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field.
    pub fn set(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_string(), value);
    }

    /// Builder form of [`Record::set`].
    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.set(name, value);
        self
    }

    /// Set a field if `value` is `Some`.
    pub fn with_opt(mut self, name: &str, value: Option<Value>) -> Self {
        if let Some(value) = value {
            self.set(name, value);
        }
        self
    }

    /// Raw field value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Varint field value.
    pub fn varint(&self, name: &str) -> Option<u64> {
        match self.fields.get(name) {
            Some(Value::Varint(v)) => Some(*v),
            _ => None,
        }
    }

    /// Bytes field value.
    pub fn bytes(&self, name: &str) -> Option<&[u8]> {
        match self.fields.get(name) {
            Some(Value::Bytes(b)) => Some(b.as_slice()),
            _ => None,
        }
    }

    /// Nested message value.
    pub fn message(&self, name: &str) -> Option<&Record> {
        match self.fields.get(name) {
            Some(Value::Message(m)) => Some(m),
            _ => None,
        }
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of fields set.
    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

/// Encode `record` as message type `message`.
pub fn encode(schema: &Schema, message: &str, record: &Record, stage: Stage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_into(schema, message, record, stage, &mut out)?;
    Ok(out)
}

/// Decode `bytes` as message type `message`.
pub fn decode(schema: &Schema, message: &str, bytes: &[u8], stage: Stage) -> Result<Record> {
    decode_at(schema, message, bytes, stage, 0)
}

fn lookup<'s>(schema: &'s Schema, message: &str, stage: Stage) -> Result<&'s MessageSchema> {
    schema
        .message(message)
        .ok_or_else(|| Error::format(stage, format!("schema has no message {message}")))
}

fn nested_name<'f>(field: &'f FieldSchema, stage: Stage) -> Result<&'f str> {
    field
        .message
        .as_deref()
        .ok_or_else(|| Error::format(stage, format!("{} has no message type", field.name)))
}

fn check_size(field: &FieldSchema, len: usize, stage: Stage) -> Result<()> {
    match field.size {
        Some(size) if size != len => Err(Error::format(
            stage,
            format!("{} must be {size} bytes, got {len}", field.name),
        )),
        _ => Ok(()),
    }
}

fn encode_into(
    schema: &Schema,
    message: &str,
    record: &Record,
    stage: Stage,
    out: &mut Vec<u8>,
) -> Result<()> {
    let layout = lookup(schema, message, stage)?;

    if let Some(name) = record
        .fields
        .keys()
        .find(|name| layout.field_by_name(name).is_none())
    {
        return Err(Error::format(stage, format!("{message} has no field {name}")));
    }

    for field in &layout.fields {
        let Some(value) = record.get(&field.name) else {
            continue;
        };
        match (field.kind, value) {
            (FieldKind::Varint, Value::Varint(v)) => wire::put_varint_field(out, field.number, *v),
            (FieldKind::Bytes, Value::Bytes(b)) => {
                check_size(field, b.len(), stage)?;
                wire::put_bytes_field(out, field.number, b);
            }
            (FieldKind::Message, Value::Message(nested)) => {
                let mut inner = Vec::new();
                encode_into(schema, nested_name(field, stage)?, nested, stage, &mut inner)?;
                wire::put_bytes_field(out, field.number, &inner);
            }
            _ => {
                return Err(Error::format(
                    stage,
                    format!("{}.{} holds the wrong kind of value", message, field.name),
                ))
            }
        }
    }
    Ok(())
}

fn decode_at(
    schema: &Schema,
    message: &str,
    bytes: &[u8],
    stage: Stage,
    depth: usize,
) -> Result<Record> {
    if depth > MAX_DEPTH {
        return Err(Error::format(stage, "message nesting too deep"));
    }
    let layout = lookup(schema, message, stage)?;
    let mut record = Record::new();
    let mut reader = FieldReader::new(bytes);

    while let Some((number, raw)) = reader
        .next_field()
        .map_err(|e| Error::format(stage, format!("{message}: {e}")))?
    {
        let Some(field) = layout.field_by_number(number) else {
            continue;
        };
        if record.get(&field.name).is_some() {
            return Err(Error::format(
                stage,
                format!("{message}.{} appears more than once", field.name),
            ));
        }

        let value = match (field.kind, raw) {
            (FieldKind::Varint, RawValue::Varint(v)) => Value::Varint(v),
            (FieldKind::Bytes, RawValue::Bytes(b)) => {
                check_size(field, b.len(), stage)?;
                Value::Bytes(b.to_vec())
            }
            (FieldKind::Message, RawValue::Bytes(b)) => Value::Message(decode_at(
                schema,
                nested_name(field, stage)?,
                b,
                stage,
                depth + 1,
            )?),
            (_, raw) => {
                return Err(Error::format(
                    stage,
                    format!(
                        "{message}.{}: unexpected wire type {:?}",
                        field.name,
                        raw.wire_type()
                    ),
                ))
            }
        };
        record.set(&field.name, value);
    }
    Ok(record)
}
