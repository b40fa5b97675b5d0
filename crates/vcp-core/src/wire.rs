//! Protobuf-compatible wire primitives.
//!
//! Each field is `key ‖ value` where `key = (field_number << 3) | wire_type`
//! encoded as a base-128 varint. Only the wire types the envelope uses are
//! produced; fixed-width fields are still understood so unknown fields of
//! those types can be skipped.

use thiserror::Error;

/// Largest field number protobuf allows.
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

/// Longest varint encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Protobuf wire types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    /// Base-128 varint (0).
    Varint,
    /// Little-endian 8 bytes (1).
    Fixed64,
    /// Varint length then bytes (2).
    LengthDelimited,
    /// Little-endian 4 bytes (5).
    Fixed32,
}

impl WireType {
    /// Wire type bits.
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Varint => 0,
            Self::Fixed64 => 1,
            Self::LengthDelimited => 2,
            Self::Fixed32 => 5,
        }
    }

    /// Parse the low three bits of a field key.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Varint),
            1 => Some(Self::Fixed64),
            2 => Some(Self::LengthDelimited),
            5 => Some(Self::Fixed32),
            _ => None,
        }
    }
}

/// Structural decode failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Input ended inside a field.
    #[error("truncated at offset {0}")]
    Truncated(usize),
    /// Varint longer than ten bytes or overflowing 64 bits.
    #[error("overlong varint at offset {0}")]
    VarintOverflow(usize),
    /// Wire type 3, 4, 6 or 7.
    #[error("unsupported wire type {wire_type} at offset {offset}")]
    InvalidWireType {
        /// Offending wire type bits.
        wire_type: u8,
        /// Offset of the field key.
        offset: usize,
    },
    /// Field number zero or above the protobuf maximum.
    #[error("invalid field number {0}")]
    InvalidFieldNumber(u64),
}

/// A decoded field value, borrowing from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawValue<'a> {
    /// Varint payload.
    Varint(u64),
    /// Length-delimited payload.
    Bytes(&'a [u8]),
    /// Fixed 32-bit payload.
    Fixed32(u32),
    /// Fixed 64-bit payload.
    Fixed64(u64),
}

impl RawValue<'_> {
    /// Wire type this value was read with.
    pub fn wire_type(&self) -> WireType {
        match self {
            Self::Varint(_) => WireType::Varint,
            Self::Bytes(_) => WireType::LengthDelimited,
            Self::Fixed32(_) => WireType::Fixed32,
            Self::Fixed64(_) => WireType::Fixed64,
        }
    }
}

/// Append `value` as a varint.
pub fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Append a field key.
pub fn put_key(out: &mut Vec<u8>, field: u32, wire_type: WireType) {
    put_varint(out, (u64::from(field) << 3) | u64::from(wire_type.to_u8()));
}

/// Append a varint field.
pub fn put_varint_field(out: &mut Vec<u8>, field: u32, value: u64) {
    put_key(out, field, WireType::Varint);
    put_varint(out, value);
}

/// Append a length-delimited field.
pub fn put_bytes_field(out: &mut Vec<u8>, field: u32, value: &[u8]) {
    put_key(out, field, WireType::LengthDelimited);
    put_varint(out, value.len() as u64);
    out.extend_from_slice(value);
}

/// Sequential field reader over one encoded message.
pub struct FieldReader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    /// Reader over `input`.
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Current offset into the input.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Next `(field_number, value)`, or `None` at the end of input.
    pub fn next_field(&mut self) -> Result<Option<(u32, RawValue<'a>)>, DecodeError> {
        if self.pos >= self.input.len() {
            return Ok(None);
        }

        let key_offset = self.pos;
        let key = self.varint()?;
        let wire_bits = (key & 0x07) as u8;
        let number = key >> 3;
        if number == 0 || number > u64::from(MAX_FIELD_NUMBER) {
            return Err(DecodeError::InvalidFieldNumber(number));
        }
        let wire_type = WireType::from_u8(wire_bits).ok_or(DecodeError::InvalidWireType {
            wire_type: wire_bits,
            offset: key_offset,
        })?;

        let value = match wire_type {
            WireType::Varint => RawValue::Varint(self.varint()?),
            WireType::LengthDelimited => {
                let len = self.varint()?;
                let len = usize::try_from(len).map_err(|_| DecodeError::Truncated(self.pos))?;
                RawValue::Bytes(self.take(len)?)
            }
            WireType::Fixed32 => {
                let raw = self.take(4)?;
                RawValue::Fixed32(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            }
            WireType::Fixed64 => {
                let raw = self.take(8)?;
                let mut word = [0u8; 8];
                word.copy_from_slice(raw);
                RawValue::Fixed64(u64::from_le_bytes(word))
            }
        };

        // number was bounded by MAX_FIELD_NUMBER above
        Ok(Some((number as u32, value)))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.input.len())
            .ok_or(DecodeError::Truncated(self.pos))?;
        let slice = &self.input[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn varint(&mut self) -> Result<u64, DecodeError> {
        let (value, used) = read_varint(&self.input[self.pos..]).map_err(|e| match e {
            DecodeError::Truncated(_) => DecodeError::Truncated(self.pos),
            _ => DecodeError::VarintOverflow(self.pos),
        })?;
        self.pos += used;
        Ok(value)
    }
}

/// Decode a varint from the front of `input`, returning `(value, bytes_used)`.
pub fn read_varint(input: &[u8]) -> Result<(u64, usize), DecodeError> {
    let mut value = 0u64;
    for (i, &byte) in input.iter().enumerate().take(MAX_VARINT_LEN) {
        // the tenth byte may only contribute the top bit of a u64
        if i == MAX_VARINT_LEN - 1 && byte > 0x01 {
            return Err(DecodeError::VarintOverflow(0));
        }
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    if input.len() >= MAX_VARINT_LEN {
        Err(DecodeError::VarintOverflow(0))
    } else {
        Err(DecodeError::Truncated(0))
    }
}
