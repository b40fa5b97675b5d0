//! P-256 key material and its container encodings.
//!
//! Three containers are understood:
//!
//! | kind | PEM label | structure |
//! |------|-----------|-----------|
//! | [`ContainerKind::Sec1`] | `EC PRIVATE KEY` | `SEQUENCE { 1, OCTET STRING scalar, [0] curve OID, [1] BIT STRING point }` |
//! | [`ContainerKind::Pkcs8`] | `PRIVATE KEY` | `SEQUENCE { 0, AlgorithmIdentifier, OCTET STRING { SEC1 without [0] } }` |
//! | [`ContainerKind::Spki`] | `PUBLIC KEY` | `SEQUENCE { AlgorithmIdentifier, BIT STRING point }` |
//!
//! SEC1 and PKCS8 are both accepted on import; export defaults to SEC1 because
//! existing provisioning tooling expects it. Output is byte-identical to
//! OpenSSL's for the same key.

use crate::der::{self, Reader, BIT_STRING, INTEGER, OBJECT_IDENTIFIER, OCTET_STRING, SEQUENCE};
use crate::kex::ecdh_p256::{self, PUBLIC_KEY_LEN, SCALAR_LEN};
use crate::{pem, Error, Result};
use p256::SecretKey;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// OID 1.2.840.10045.2.1 (id-ecPublicKey), DER content bytes.
pub const OID_EC_PUBLIC_KEY: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01];

/// OID 1.2.840.10045.3.1.7 (prime256v1), DER content bytes.
pub const OID_PRIME256V1: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x03, 0x01, 0x07];

/// Container formats for key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContainerKind {
    /// SEC1 `ECPrivateKey` (RFC 5915).
    #[default]
    Sec1,
    /// PKCS #8 `PrivateKeyInfo` (RFC 5208).
    Pkcs8,
    /// X.509 `SubjectPublicKeyInfo` (RFC 5280).
    Spki,
}

impl ContainerKind {
    /// PEM label for this container.
    pub fn label(self) -> &'static str {
        match self {
            Self::Sec1 => "EC PRIVATE KEY",
            Self::Pkcs8 => "PRIVATE KEY",
            Self::Spki => "PUBLIC KEY",
        }
    }

    /// Container for a PEM label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "EC PRIVATE KEY" => Some(Self::Sec1),
            "PRIVATE KEY" => Some(Self::Pkcs8),
            "PUBLIC KEY" => Some(Self::Spki),
            _ => None,
        }
    }

    /// Whether the container carries a private scalar.
    pub fn is_private(self) -> bool {
        !matches!(self, Self::Spki)
    }
}

/// A P-256 key pair, or a public point on its own.
///
/// The private scalar never leaves this type except through an explicit
/// container export. `Debug` prints a short fingerprint of the public point.
#[derive(Clone)]
pub struct KeyMaterial {
    secret: Option<SecretKey>,
    public: [u8; PUBLIC_KEY_LEN],
}

impl KeyMaterial {
    /// Generate a fresh key pair.
    pub fn generate() -> Self {
        let secret = ecdh_p256::generate_secret();
        let public = ecdh_p256::encode_public(&secret.public_key());
        Self {
            secret: Some(secret),
            public,
        }
    }

    /// Key pair from a raw 32-byte big-endian scalar.
    pub fn from_scalar(scalar: &[u8]) -> Result<Self> {
        let secret = ecdh_p256::secret_from_scalar(scalar)?;
        let public = ecdh_p256::encode_public(&secret.public_key());
        Ok(Self {
            secret: Some(secret),
            public,
        })
    }

    /// Public-only key from an uncompressed point.
    pub fn from_public(point: &[u8]) -> Result<Self> {
        let public = ecdh_p256::decode_public(point)?;
        Ok(Self {
            secret: None,
            public: ecdh_p256::encode_public(&public),
        })
    }

    /// Uncompressed public point (`0x04 ‖ x ‖ y`).
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.public
    }

    /// True if the private scalar is present.
    pub fn has_private(&self) -> bool {
        self.secret.is_some()
    }

    /// ECDH with a peer's uncompressed public point.
    pub fn exchange(&self, peer_public: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        let secret = self.secret.as_ref().ok_or(Error::MissingPrivateKey)?;
        ecdh_p256::exchange(secret, peer_public)
    }

    /// First four bytes of SHA-1 over the public point, hex encoded.
    ///
    /// Safe to log; identifies which key a session used.
    pub fn fingerprint(&self) -> String {
        Sha1::digest(self.public)[..4]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    fn scalar(&self) -> Result<Zeroizing<[u8; SCALAR_LEN]>> {
        let secret = self.secret.as_ref().ok_or(Error::MissingPrivateKey)?;
        let mut scalar = Zeroizing::new([0u8; SCALAR_LEN]);
        scalar.copy_from_slice(secret.to_bytes().as_slice());
        Ok(scalar)
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        if self.public != other.public {
            return false;
        }
        match (self.scalar(), other.scalar()) {
            (Ok(a), Ok(b)) => bool::from(a[..].ct_eq(&b[..])),
            (Err(_), Err(_)) => true,
            _ => false,
        }
    }
}

impl Eq for KeyMaterial {}

impl core::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("fingerprint", &self.fingerprint())
            .field("private", &self.has_private())
            .finish()
    }
}

/// Decode key material from PEM text or raw DER, detecting the container.
pub fn decode(input: &[u8]) -> Result<KeyMaterial> {
    if pem::is_pem(input) {
        let (label, der) = pem::decode(input)?;
        let der = Zeroizing::new(der);
        let kind = ContainerKind::from_label(&label)
            .ok_or_else(|| Error::UnsupportedAlgorithm(format!("PEM label {label:?}")))?;
        decode_der(&der, kind)
    } else {
        decode_der(input, detect_kind(input)?)
    }
}

/// Identify the container of a DER blob from its first inner element.
pub fn detect_kind(der: &[u8]) -> Result<ContainerKind> {
    let mut outer = Reader::new(der);
    let seq = outer.expect(SEQUENCE)?;
    let mut children = seq.children();
    let first = children.read()?;
    match first.tag {
        SEQUENCE => Ok(ContainerKind::Spki),
        INTEGER => match der::parse_small_integer(first.content)? {
            1 => Ok(ContainerKind::Sec1),
            0 => Ok(ContainerKind::Pkcs8),
            v => Err(Error::InvalidDer(format!("unknown container version {v}"))),
        },
        tag => Err(Error::InvalidDer(format!(
            "unrecognised container starting with tag 0x{tag:02X}"
        ))),
    }
}

/// Decode a DER container of a known kind.
pub fn decode_der(der: &[u8], kind: ContainerKind) -> Result<KeyMaterial> {
    match kind {
        ContainerKind::Sec1 => parse_sec1(der),
        ContainerKind::Pkcs8 => parse_pkcs8(der),
        ContainerKind::Spki => parse_spki(der),
    }
}

/// Encode key material as PEM text.
pub fn encode(key: &KeyMaterial, kind: ContainerKind) -> Result<Zeroizing<String>> {
    let der = encode_der(key, kind)?;
    Ok(Zeroizing::new(pem::encode(kind.label(), &der)))
}

/// Encode key material as a DER container.
///
/// # Errors
///
/// Returns [`Error::MissingPrivateKey`] when a private container is requested
/// for a public-only key.
pub fn encode_der(key: &KeyMaterial, kind: ContainerKind) -> Result<Zeroizing<Vec<u8>>> {
    match kind {
        ContainerKind::Sec1 => encode_sec1(key, true),
        ContainerKind::Pkcs8 => {
            let inner = encode_sec1(key, false)?;
            let version = der::small_integer(0);
            let algorithm = algorithm_identifier();
            let wrapped = Zeroizing::new(der::tlv(OCTET_STRING, &inner));
            Ok(Zeroizing::new(der::sequence(&[&version, &algorithm, &wrapped[..]])))
        }
        ContainerKind::Spki => {
            let algorithm = algorithm_identifier();
            let point = der::bit_string(key.public_key());
            Ok(Zeroizing::new(der::sequence(&[&algorithm, &point])))
        }
    }
}

fn encode_sec1(key: &KeyMaterial, with_parameters: bool) -> Result<Zeroizing<Vec<u8>>> {
    let scalar = key.scalar()?;
    let version = der::small_integer(1);
    let private = Zeroizing::new(der::tlv(OCTET_STRING, &*scalar));
    let public = der::constructed(der::context(1), &[&der::bit_string(key.public_key())]);

    let encoded = if with_parameters {
        let parameters =
            der::constructed(der::context(0), &[&der::tlv(OBJECT_IDENTIFIER, OID_PRIME256V1)]);
        der::sequence(&[&version, &private[..], &parameters, &public])
    } else {
        der::sequence(&[&version, &private[..], &public])
    };
    Ok(Zeroizing::new(encoded))
}

fn algorithm_identifier() -> Vec<u8> {
    der::sequence(&[
        &der::tlv(OBJECT_IDENTIFIER, OID_EC_PUBLIC_KEY),
        &der::tlv(OBJECT_IDENTIFIER, OID_PRIME256V1),
    ])
}

fn check_curve(oid: &[u8]) -> Result<()> {
    if oid != OID_PRIME256V1 {
        return Err(Error::UnsupportedAlgorithm(format!(
            "curve {}",
            der::oid_to_string(oid)
        )));
    }
    Ok(())
}

fn check_algorithm(algorithm: &der::Element<'_>) -> Result<()> {
    let mut fields = algorithm.children();
    let oid = fields.expect(OBJECT_IDENTIFIER)?;
    if oid.content != OID_EC_PUBLIC_KEY {
        return Err(Error::UnsupportedAlgorithm(der::oid_to_string(oid.content)));
    }
    check_curve(fields.expect(OBJECT_IDENTIFIER)?.content)?;
    fields.finish()
}

fn parse_sec1(der: &[u8]) -> Result<KeyMaterial> {
    let mut outer = Reader::new(der);
    let seq = outer.expect(SEQUENCE)?;
    outer.finish()?;

    let mut fields = seq.children();
    let version = der::parse_small_integer(fields.expect(INTEGER)?.content)?;
    if version != 1 {
        return Err(Error::InvalidDer(format!("ECPrivateKey version {version}")));
    }

    let scalar = fields.expect(OCTET_STRING)?.content;
    if scalar.len() != SCALAR_LEN {
        return Err(Error::InvalidLength {
            expected: SCALAR_LEN,
            actual: scalar.len(),
        });
    }

    if let Some(parameters) = fields.optional(der::context(0))? {
        let mut inner = parameters.children();
        check_curve(inner.expect(OBJECT_IDENTIFIER)?.content)?;
        inner.finish()?;
    }

    let embedded_public = match fields.optional(der::context(1))? {
        Some(tagged) => {
            let mut inner = tagged.children();
            let bits = inner.expect(BIT_STRING)?;
            inner.finish()?;
            Some(der::parse_bit_string(bits.content)?)
        }
        None => None,
    };
    fields.finish()?;

    let key = KeyMaterial::from_scalar(scalar)?;
    if let Some(point) = embedded_public {
        if point != key.public_key().as_slice() {
            return Err(Error::InvalidPrivateKey(
                "embedded public key does not match scalar".into(),
            ));
        }
    }
    Ok(key)
}

fn parse_pkcs8(der: &[u8]) -> Result<KeyMaterial> {
    let mut outer = Reader::new(der);
    let seq = outer.expect(SEQUENCE)?;
    outer.finish()?;

    let mut fields = seq.children();
    let version = der::parse_small_integer(fields.expect(INTEGER)?.content)?;
    if version > 1 {
        return Err(Error::InvalidDer(format!("PrivateKeyInfo version {version}")));
    }

    check_algorithm(&fields.expect(SEQUENCE)?)?;
    let private = fields.expect(OCTET_STRING)?;

    // attributes [0] and v2 publicKey [1] IMPLICIT carry nothing we need
    fields.optional(der::context(0))?;
    fields.optional(0x81)?;
    fields.finish()?;

    parse_sec1(private.content)
}

fn parse_spki(der: &[u8]) -> Result<KeyMaterial> {
    let mut outer = Reader::new(der);
    let seq = outer.expect(SEQUENCE)?;
    outer.finish()?;

    let mut fields = seq.children();
    check_algorithm(&fields.expect(SEQUENCE)?)?;
    let point = der::parse_bit_string(fields.expect(BIT_STRING)?.content)?;
    fields.finish()?;

    KeyMaterial::from_public(point)
}
