//! Bytes covered by authentication tags.
//!
//! The handshake tag is `HMAC-SHA256(auth_key, metadata ‖ 0xFF ‖ session_info)`
//! where metadata is a run of `tag ‖ len ‖ value` items in ascending tag order.
//! Command payloads bind `counter(LE) ‖ epoch ‖ domain ‖ routing_address` as
//! AES-GCM associated data, followed by `expires_at(LE)` when an expiry is set.

use crate::envelope::{Domain, EPOCH_LEN, ROUTING_ADDRESS_LEN};
use crate::error::{Error, Result, Stage};

/// Terminates the metadata run.
pub const METADATA_END: u8 = 0xFF;

const TAG_SIGNATURE_TYPE: u8 = 0x00;
const TAG_DOMAIN: u8 = 0x01;
const TAG_PERSONALIZATION: u8 = 0x02;
const TAG_CHALLENGE: u8 = 0x06;

/// Signature type value for an HMAC-tagged handshake response.
pub const SIGNATURE_TYPE_HMAC: u8 = 0x06;

fn push_item(out: &mut Vec<u8>, tag: u8, value: &[u8]) -> Result<()> {
    let len = u8::try_from(value.len())
        .map_err(|_| Error::format(Stage::Handshake, format!("metadata item {tag} too long")))?;
    out.push(tag);
    out.push(len);
    out.extend_from_slice(value);
    Ok(())
}

/// Input to the handshake response tag.
///
/// # Errors
/// Fails if `verifier_name` exceeds 255 bytes.
pub fn handshake_tag_input(
    domain: Domain,
    verifier_name: &str,
    challenge: &[u8; 16],
    session_info: &[u8],
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(32 + verifier_name.len() + session_info.len());
    push_item(&mut out, TAG_SIGNATURE_TYPE, &[SIGNATURE_TYPE_HMAC])?;
    push_item(&mut out, TAG_DOMAIN, &[domain.to_u8()])?;
    push_item(&mut out, TAG_PERSONALIZATION, verifier_name.as_bytes())?;
    push_item(&mut out, TAG_CHALLENGE, challenge)?;
    out.push(METADATA_END);
    out.extend_from_slice(session_info);
    Ok(out)
}

/// Associated data for a sealed command or response.
pub fn command_aad(
    counter: u32,
    epoch: &[u8; EPOCH_LEN],
    domain: Domain,
    routing_address: &[u8; ROUTING_ADDRESS_LEN],
    expires_at: Option<u32>,
) -> Vec<u8> {
    let mut aad = Vec::with_capacity(4 + EPOCH_LEN + 1 + ROUTING_ADDRESS_LEN + 4);
    aad.extend_from_slice(&counter.to_le_bytes());
    aad.extend_from_slice(epoch);
    aad.push(domain.to_u8());
    aad.extend_from_slice(routing_address);
    if let Some(expires_at) = expires_at {
        aad.extend_from_slice(&expires_at.to_le_bytes());
    }
    aad
}
