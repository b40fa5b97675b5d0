//! PEM armour: `-----BEGIN <label>-----`, a base64 body wrapped at 64
//! columns, `-----END <label>-----`.
//!
//! Decoding ignores anything outside the delimiters and all whitespace inside
//! the body, so keys pasted from terminals or config files still parse.

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};

const BEGIN: &[u8] = b"-----BEGIN ";
const END: &[u8] = b"-----END ";
const DASHES: &[u8] = b"-----";
const LINE_WIDTH: usize = 64;

/// Armour `der` under `label`.
pub fn encode(label: &str, der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let mut out =
        String::with_capacity(body.len() + body.len() / LINE_WIDTH + 2 * label.len() + 40);

    out.push_str("-----BEGIN ");
    out.push_str(label);
    out.push_str("-----\n");
    // base64 output is ASCII, so byte chunks are valid str boundaries
    for line in body.as_bytes().chunks(LINE_WIDTH) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str("-----END ");
    out.push_str(label);
    out.push_str("-----\n");
    out
}

/// True if `input` contains a BEGIN marker.
pub fn is_pem(input: &[u8]) -> bool {
    find(input, BEGIN, 0).is_some()
}

/// Decode the first armoured block in `input`, returning `(label, der)`.
pub fn decode(input: &[u8]) -> Result<(String, Vec<u8>)> {
    let begin = find(input, BEGIN, 0).ok_or_else(|| Error::InvalidPem("no BEGIN marker".into()))?;
    let label_start = begin + BEGIN.len();
    let label_end = find(input, DASHES, label_start)
        .ok_or_else(|| Error::InvalidPem("unterminated BEGIN marker".into()))?;
    let label = &input[label_start..label_end];
    if label.contains(&b'\n') {
        return Err(Error::InvalidPem("BEGIN marker spans lines".into()));
    }

    let body_start = label_end + DASHES.len();
    let end = find(input, END, body_start)
        .ok_or_else(|| Error::InvalidPem("no END marker".into()))?;

    let end_label_start = end + END.len();
    let end_label_end = find(input, DASHES, end_label_start)
        .ok_or_else(|| Error::InvalidPem("unterminated END marker".into()))?;
    if &input[end_label_start..end_label_end] != label {
        return Err(Error::InvalidPem("BEGIN and END labels differ".into()));
    }

    let body: Vec<u8> = input[body_start..end]
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    let der = STANDARD
        .decode(&body)
        .map_err(|e| Error::InvalidPem(format!("bad base64 body: {e}")))?;

    let label = core::str::from_utf8(label)
        .map_err(|_| Error::InvalidPem("label is not UTF-8".into()))?
        .to_string();

    Ok((label, der))
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}
