//! Minimal DER tag-length-value reader and writer.
//!
//! Covers the subset of ASN.1 needed for P-256 key containers: SEQUENCE,
//! INTEGER, OCTET STRING, OBJECT IDENTIFIER, BIT STRING and the explicit
//! context tags `[0]`/`[1]` used by SEC1. Lengths may use the short form or
//! the long form (`0x80 | n` followed by `n` big-endian length bytes).
//!
//! Every length is checked against the remaining input before any slice is
//! taken, so malformed input yields [`Error::InvalidDer`] and never panics.

use crate::{Error, Result};
use core::ops::Range;

/// Universal tag: INTEGER.
pub const INTEGER: u8 = 0x02;
/// Universal tag: BIT STRING.
pub const BIT_STRING: u8 = 0x03;
/// Universal tag: OCTET STRING.
pub const OCTET_STRING: u8 = 0x04;
/// Universal tag: OBJECT IDENTIFIER.
pub const OBJECT_IDENTIFIER: u8 = 0x06;
/// Universal tag: SEQUENCE (constructed).
pub const SEQUENCE: u8 = 0x30;

/// Constructed context-specific tag `[n]`.
pub const fn context(n: u8) -> u8 {
    0xA0 | n
}

/// Longest long-form length we accept, in octets.
const MAX_LENGTH_OCTETS: usize = 4;

/// A parsed element: its tag and the byte range of its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element<'a> {
    /// Identifier octet.
    pub tag: u8,
    /// Content range relative to the reader's input.
    pub range: Range<usize>,
    /// Content bytes (`input[range]`).
    pub content: &'a [u8],
}

impl<'a> Element<'a> {
    /// Reader over this element's content, for constructed types.
    pub fn children(&self) -> Reader<'a> {
        Reader::new(self.content)
    }
}

/// Recursive-descent reader over a DER byte string.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Create a reader positioned at the start of `input`.
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// True when all input has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Tag of the next element without consuming it.
    pub fn peek_tag(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    /// Read the next element of any tag.
    pub fn read(&mut self) -> Result<Element<'a>> {
        let start = self.pos;
        let tag = *self.input.get(start).ok_or_else(|| {
            Error::InvalidDer(format!("unexpected end of input at offset {start}"))
        })?;

        if tag & 0x1F == 0x1F {
            return Err(Error::InvalidDer(format!(
                "multi-byte tag at offset {start} not supported"
            )));
        }

        let (len, len_octets) = read_length(self.input, start + 1)?;
        let content_start = start + 1 + len_octets;
        let available = self.input.len() - content_start;
        if len > available {
            return Err(Error::InvalidDer(format!(
                "element 0x{tag:02X} at offset {start} declares {len} bytes, {available} available"
            )));
        }

        let content_end = content_start + len;
        self.pos = content_end;

        Ok(Element {
            tag,
            range: content_start..content_end,
            content: &self.input[content_start..content_end],
        })
    }

    /// Read the next element and require it to carry `tag`.
    pub fn expect(&mut self, tag: u8) -> Result<Element<'a>> {
        let offset = self.pos;
        let element = self.read()?;
        if element.tag != tag {
            return Err(Error::InvalidDer(format!(
                "expected tag 0x{tag:02X} at offset {offset}, found 0x{:02X}",
                element.tag
            )));
        }
        Ok(element)
    }

    /// Read the next element only if it carries `tag`.
    pub fn optional(&mut self, tag: u8) -> Result<Option<Element<'a>>> {
        if self.peek_tag() == Some(tag) {
            self.read().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Require that nothing follows the last element read.
    pub fn finish(&self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidDer(format!(
                "{} trailing bytes after offset {}",
                self.input.len() - self.pos,
                self.pos
            )))
        }
    }
}

/// Decode a length field starting at `at`. Returns `(length, octets used)`.
fn read_length(input: &[u8], at: usize) -> Result<(usize, usize)> {
    let first = *input
        .get(at)
        .ok_or_else(|| Error::InvalidDer(format!("missing length at offset {at}")))?;

    if first < 0x80 {
        return Ok((first as usize, 1));
    }

    let count = (first & 0x7F) as usize;
    if count == 0 {
        return Err(Error::InvalidDer("indefinite length not allowed in DER".into()));
    }
    if count > MAX_LENGTH_OCTETS {
        return Err(Error::InvalidDer(format!("length uses {count} octets")));
    }

    let octets = input
        .get(at + 1..at + 1 + count)
        .ok_or_else(|| Error::InvalidDer(format!("truncated length at offset {at}")))?;

    if octets[0] == 0 {
        return Err(Error::InvalidDer("length has leading zero octet".into()));
    }

    let len = octets
        .iter()
        .fold(0usize, |acc, &octet| (acc << 8) | octet as usize);

    if len < 0x80 {
        return Err(Error::InvalidDer("long-form length below 128".into()));
    }

    Ok((len, 1 + count))
}

/// Parse a non-negative INTEGER that fits in 64 bits (versions, small counts).
pub fn parse_small_integer(content: &[u8]) -> Result<u64> {
    let (&first, _) = content
        .split_first()
        .ok_or_else(|| Error::InvalidDer("empty INTEGER".into()))?;

    if first & 0x80 != 0 {
        return Err(Error::InvalidDer("negative INTEGER".into()));
    }
    if content.len() > 1 && first == 0 && content[1] & 0x80 == 0 {
        return Err(Error::InvalidDer("non-minimal INTEGER".into()));
    }

    let digits = if first == 0 { &content[1..] } else { content };
    if digits.len() > 8 {
        return Err(Error::InvalidDer("INTEGER too large".into()));
    }

    Ok(digits
        .iter()
        .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte)))
}

/// Parse BIT STRING content with zero unused bits, returning the bit bytes.
pub fn parse_bit_string(content: &[u8]) -> Result<&[u8]> {
    match content.split_first() {
        Some((0, bits)) => Ok(bits),
        Some((unused, _)) => Err(Error::InvalidDer(format!(
            "BIT STRING with {unused} unused bits"
        ))),
        None => Err(Error::InvalidDer("empty BIT STRING".into())),
    }
}

/// Render OBJECT IDENTIFIER content in dotted form for diagnostics.
pub fn oid_to_string(content: &[u8]) -> String {
    let mut arcs: Vec<u64> = Vec::new();
    let mut value = 0u64;
    for &byte in content {
        value = (value << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            if arcs.is_empty() {
                let first = if value < 80 { value / 40 } else { 2 };
                arcs.push(first);
                arcs.push(value - first * 40);
            } else {
                arcs.push(value);
            }
            value = 0;
        }
    }
    arcs.iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

/// Append a DER length field.
pub fn write_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

/// Append one element.
pub fn write(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    write_length(out, content.len());
    out.extend_from_slice(content);
}

/// Encode one element.
pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    write(&mut out, tag, content);
    out
}

/// Encode a constructed element from already-encoded children.
pub fn constructed(tag: u8, children: &[&[u8]]) -> Vec<u8> {
    let content: Vec<u8> = children.concat();
    tlv(tag, &content)
}

/// Encode a SEQUENCE from already-encoded children.
pub fn sequence(children: &[&[u8]]) -> Vec<u8> {
    constructed(SEQUENCE, children)
}

/// Encode a small non-negative INTEGER (container versions).
pub fn small_integer(value: u8) -> Vec<u8> {
    if value & 0x80 != 0 {
        tlv(INTEGER, &[0x00, value])
    } else {
        tlv(INTEGER, &[value])
    }
}

/// Encode a BIT STRING with zero unused bits.
pub fn bit_string(bits: &[u8]) -> Vec<u8> {
    let mut content = Vec::with_capacity(bits.len() + 1);
    content.push(0);
    content.extend_from_slice(bits);
    tlv(BIT_STRING, &content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_form_element() {
        let data = [0x04, 0x03, 0xAA, 0xBB, 0xCC];
        let mut reader = Reader::new(&data);
        let element = reader.expect(OCTET_STRING).unwrap();
        assert_eq!(element.content, &[0xAA, 0xBB, 0xCC]);
        assert_eq!(element.range, 2..5);
        reader.finish().unwrap();
    }

    #[test]
    fn test_long_form_length() {
        let mut data = vec![0x04, 0x81, 0xC8];
        data.extend_from_slice(&[0x5A; 200]);
        let element = Reader::new(&data).read().unwrap();
        assert_eq!(element.content.len(), 200);

        let mut data = vec![0x04, 0x82, 0x01, 0x2C];
        data.extend_from_slice(&[0x00; 300]);
        let element = Reader::new(&data).read().unwrap();
        assert_eq!(element.content.len(), 300);
    }

    #[test]
    fn test_write_length_matches_reader() {
        for len in [0usize, 1, 127, 128, 255, 256, 1000, 70_000] {
            let content = vec![0x11; len];
            let encoded = tlv(OCTET_STRING, &content);
            let element = Reader::new(&encoded).read().unwrap();
            assert_eq!(element.content.len(), len);
        }
    }

    #[test]
    fn test_reject_truncated_content() {
        let data = [0x30, 0x05, 0x02, 0x01];
        let err = Reader::new(&data).read().unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn test_reject_truncated_length() {
        assert!(Reader::new(&[0x04, 0x82, 0x01]).read().is_err());
        assert!(Reader::new(&[0x04]).read().is_err());
        assert!(Reader::new(&[]).read().is_err());
    }

    #[test]
    fn test_reject_non_minimal_lengths() {
        // Long form for a length that fits in short form
        assert!(Reader::new(&[0x04, 0x81, 0x01, 0x00]).read().is_err());
        // Leading zero octet
        assert!(Reader::new(&[0x04, 0x82, 0x00, 0x81]).read().is_err());
        // Indefinite length
        assert!(Reader::new(&[0x30, 0x80, 0x00, 0x00]).read().is_err());
    }

    #[test]
    fn test_reject_oversized_length_field() {
        let data = [0x04, 0x85, 0x01, 0x00, 0x00, 0x00, 0x00];
        assert!(Reader::new(&data).read().is_err());
    }

    #[test]
    fn test_reject_multibyte_tag() {
        assert!(Reader::new(&[0x1F, 0x81, 0x00]).read().is_err());
    }

    #[test]
    fn test_expect_wrong_tag() {
        let data = [0x02, 0x01, 0x01];
        assert!(Reader::new(&data).expect(SEQUENCE).is_err());
    }

    #[test]
    fn test_trailing_bytes() {
        let data = [0x02, 0x01, 0x01, 0x00];
        let mut reader = Reader::new(&data);
        reader.read().unwrap();
        assert!(reader.finish().is_err());
    }

    #[test]
    fn test_nested_children() {
        let inner_a = small_integer(1);
        let inner_b = tlv(OCTET_STRING, b"abc");
        let outer = sequence(&[&inner_a, &inner_b]);

        let mut reader = Reader::new(&outer);
        let seq = reader.expect(SEQUENCE).unwrap();
        reader.finish().unwrap();

        let mut children = seq.children();
        let version = children.expect(INTEGER).unwrap();
        assert_eq!(parse_small_integer(version.content).unwrap(), 1);
        assert_eq!(children.expect(OCTET_STRING).unwrap().content, b"abc");
        children.finish().unwrap();
    }

    #[test]
    fn test_optional_context_tag() {
        let explicit = constructed(context(1), &[&bit_string(&[0x04, 0x01])]);
        let mut reader = Reader::new(&explicit);
        assert!(reader.optional(context(0)).unwrap().is_none());
        let tagged = reader.optional(context(1)).unwrap().unwrap();
        let bits = tagged.children().expect(BIT_STRING).unwrap();
        assert_eq!(parse_bit_string(bits.content).unwrap(), &[0x04, 0x01]);
    }

    #[test]
    fn test_small_integer() {
        assert_eq!(parse_small_integer(&[0x00]).unwrap(), 0);
        assert_eq!(parse_small_integer(&[0x00, 0x80]).unwrap(), 128);
        assert!(parse_small_integer(&[]).is_err());
        assert!(parse_small_integer(&[0xFF]).is_err());
        assert!(parse_small_integer(&[0x00, 0x01]).is_err());
        assert_eq!(small_integer(0x80), vec![0x02, 0x02, 0x00, 0x80]);
    }

    #[test]
    fn test_bit_string_unused_bits() {
        assert!(parse_bit_string(&[0x03, 0xFF]).is_err());
        assert!(parse_bit_string(&[]).is_err());
    }

    #[test]
    fn test_oid_to_string() {
        let prime256v1 = [0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x03, 0x01, 0x07];
        assert_eq!(oid_to_string(&prime256v1), "1.2.840.10045.3.1.7");
    }
}
