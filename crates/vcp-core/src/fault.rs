//! Controller status codes carried in response envelopes.

/// Outcome of a request as reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationStatus {
    /// Request completed.
    #[default]
    Ok,
    /// Request accepted; a further response follows.
    Wait,
    /// Request failed; see the accompanying [`Fault`].
    Error,
}

impl OperationStatus {
    /// Convert to wire format.
    pub fn to_u32(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::Wait => 1,
            Self::Error => 2,
        }
    }

    /// Convert from wire format.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Wait),
            2 => Some(Self::Error),
            _ => None,
        }
    }
}

/// Reason a controller refused a request.
///
/// Codes the client does not know are kept as [`Fault::Other`] so they can be
/// surfaced to the caller verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fault {
    /// No fault (0).
    #[default]
    None,
    /// Controller busy (1).
    Busy,
    /// Controller timed out (2).
    Timeout,
    /// Signer key unknown (3).
    UnknownKeyId,
    /// Signer key not active (4).
    InactiveKey,
    /// Signature or tag invalid (5).
    InvalidSignature,
    /// Counter stale or token invalid (6).
    InvalidTokenOrCounter,
    /// Key lacks permission for the command (7).
    InsufficientPrivileges,
    /// Command addressed to the wrong domain (8).
    InvalidDomains,
    /// Unknown command (9).
    InvalidCommand,
    /// Controller could not decode the request (10).
    Decoding,
    /// Internal controller error (11).
    Internal,
    /// Verifier name did not match (12).
    WrongPersonalization,
    /// Command parameter rejected (13).
    BadParameter,
    /// No room for another key (14).
    KeychainFull,
    /// Epoch no longer current (15).
    IncorrectEpoch,
    /// Nonce had the wrong length (16).
    IvIncorrectLength,
    /// Request expired before it arrived (17).
    TimeExpired,
    /// Controller has no identity provisioned (18).
    NotProvisionedWithIdentity,
    /// Controller could not hash the request metadata (19).
    CouldNotHashMetadata,
    /// Code outside the known catalog.
    Other(u32),
}

impl Fault {
    /// Convert to wire format.
    pub fn to_u32(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Busy => 1,
            Self::Timeout => 2,
            Self::UnknownKeyId => 3,
            Self::InactiveKey => 4,
            Self::InvalidSignature => 5,
            Self::InvalidTokenOrCounter => 6,
            Self::InsufficientPrivileges => 7,
            Self::InvalidDomains => 8,
            Self::InvalidCommand => 9,
            Self::Decoding => 10,
            Self::Internal => 11,
            Self::WrongPersonalization => 12,
            Self::BadParameter => 13,
            Self::KeychainFull => 14,
            Self::IncorrectEpoch => 15,
            Self::IvIncorrectLength => 16,
            Self::TimeExpired => 17,
            Self::NotProvisionedWithIdentity => 18,
            Self::CouldNotHashMetadata => 19,
            Self::Other(code) => code,
        }
    }

    /// Convert from wire format.
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Busy,
            2 => Self::Timeout,
            3 => Self::UnknownKeyId,
            4 => Self::InactiveKey,
            5 => Self::InvalidSignature,
            6 => Self::InvalidTokenOrCounter,
            7 => Self::InsufficientPrivileges,
            8 => Self::InvalidDomains,
            9 => Self::InvalidCommand,
            10 => Self::Decoding,
            11 => Self::Internal,
            12 => Self::WrongPersonalization,
            13 => Self::BadParameter,
            14 => Self::KeychainFull,
            15 => Self::IncorrectEpoch,
            16 => Self::IvIncorrectLength,
            17 => Self::TimeExpired,
            18 => Self::NotProvisionedWithIdentity,
            19 => Self::CouldNotHashMetadata,
            code => Self::Other(code),
        }
    }

    /// True for any code other than [`Fault::None`].
    pub fn is_fault(self) -> bool {
        self != Self::None
    }

    /// Faults that mean the controller's view of the session has drifted
    /// from ours; a fresh handshake usually clears them.
    pub fn requires_resync(self) -> bool {
        matches!(
            self,
            Self::InvalidSignature
                | Self::InvalidTokenOrCounter
                | Self::IncorrectEpoch
                | Self::TimeExpired
        )
    }
}

impl core::fmt::Display for Fault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Other(code) => write!(f, "fault {code}"),
            known => write!(f, "{known:?} ({})", known.to_u32()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_codes_roundtrip() {
        for code in 0..=25 {
            assert_eq!(Fault::from_u32(code).to_u32(), code);
        }
        assert_eq!(Fault::from_u32(99), Fault::Other(99));
    }

    #[test]
    fn test_resync_faults() {
        assert!(Fault::IncorrectEpoch.requires_resync());
        assert!(Fault::InvalidTokenOrCounter.requires_resync());
        assert!(!Fault::Busy.requires_resync());
        assert!(!Fault::None.is_fault());
    }

    #[test]
    fn test_display() {
        assert_eq!(Fault::Busy.to_string(), "Busy (1)");
        assert_eq!(Fault::Other(42).to_string(), "fault 42");
    }

    #[test]
    fn test_operation_status() {
        assert_eq!(OperationStatus::from_u32(1), Some(OperationStatus::Wait));
        assert_eq!(OperationStatus::from_u32(7), None);
        assert_eq!(OperationStatus::Error.to_u32(), 2);
    }
}
