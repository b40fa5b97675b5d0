//! Handshake retry.

use crate::connection::VehicleConnection;
use crate::error::Result;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;
use vcp_core::Domain;

/// How often and how fast to repeat a failed handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Pause between attempts.
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 500,
        }
    }
}

/// Handshake `domain`, retrying timeouts, tag failures and transient faults.
///
/// Errors that a retry cannot fix (unpaired key, link loss, unknown domain)
/// are returned immediately.
pub async fn handshake_with_retry(
    connection: &VehicleConnection,
    domain: Domain,
    policy: RetryPolicy,
) -> Result<()> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match connection.handshake(domain).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts && e.is_retryable() => {
                warn!(?domain, attempt, error = %e, "handshake failed, retrying");
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(policy.delay_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
