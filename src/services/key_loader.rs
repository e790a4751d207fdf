//! Private-key credential loading.
//!
//! A key file does not reliably say which algorithm it holds: the OpenSSH
//! container and unencrypted PKCS#8 both hide it inside the body. The loader
//! therefore walks a fixed try order (RSA, Ed25519, ECDSA, DSA) and returns
//! the first algorithm that recognises the file. A passphrase-protected key
//! stops the walk immediately; it is never reported as a type mismatch.

use crate::errors::RemoteError;
use base64::Engine;
use der::asn1::{AnyRef, OctetStringRef, UintRef};
use der::Decode;
use pkcs8::{ObjectIdentifier, PrivateKeyInfo};
use serde::Serialize;
use ssh_key::{Algorithm, PrivateKey};
use std::fmt;
use std::path::{Path, PathBuf};

const OID_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const OID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");
const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_DSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10040.4.1");

/// version, p, q, g, y, x
const OPENSSL_DSA_FIELDS: usize = 6;
const ED25519_SEED_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Rsa,
    Ed25519,
    Ecdsa,
    Dsa,
}

impl KeyAlgorithm {
    pub const TRY_ORDER: [KeyAlgorithm; 4] = [
        KeyAlgorithm::Rsa,
        KeyAlgorithm::Ed25519,
        KeyAlgorithm::Ecdsa,
        KeyAlgorithm::Dsa,
    ];

    pub fn name(self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa => "rsa",
            KeyAlgorithm::Ed25519 => "ed25519",
            KeyAlgorithm::Ecdsa => "ecdsa",
            KeyAlgorithm::Dsa => "dsa",
        }
    }

    fn legacy_label(self) -> Option<&'static str> {
        match self {
            KeyAlgorithm::Rsa => Some("RSA PRIVATE KEY"),
            KeyAlgorithm::Ecdsa => Some("EC PRIVATE KEY"),
            KeyAlgorithm::Dsa => Some("DSA PRIVATE KEY"),
            KeyAlgorithm::Ed25519 => None,
        }
    }

    fn pkcs8_oid(self) -> ObjectIdentifier {
        match self {
            KeyAlgorithm::Rsa => OID_RSA,
            KeyAlgorithm::Ed25519 => OID_ED25519,
            KeyAlgorithm::Ecdsa => OID_EC_PUBLIC_KEY,
            KeyAlgorithm::Dsa => OID_DSA,
        }
    }

    /// Full DER decode of a traditional OpenSSL body: PKCS#1 for RSA, SEC1
    /// for EC, the bare six-integer sequence for DSA.
    fn decodes_legacy(self, der: &[u8]) -> bool {
        match self {
            KeyAlgorithm::Rsa => pkcs1::RsaPrivateKey::from_der(der).is_ok(),
            KeyAlgorithm::Ecdsa => sec1::EcPrivateKey::from_der(der).is_ok(),
            KeyAlgorithm::Dsa => Vec::<UintRef>::from_der(der)
                .map(|fields| fields.len() == OPENSSL_DSA_FIELDS)
                .unwrap_or(false),
            KeyAlgorithm::Ed25519 => false,
        }
    }

    /// Decodes the `privateKey` octets carried inside a PKCS#8 envelope.
    fn decodes_pkcs8_key(self, private_key: &[u8]) -> bool {
        match self {
            KeyAlgorithm::Rsa => pkcs1::RsaPrivateKey::from_der(private_key).is_ok(),
            KeyAlgorithm::Ecdsa => sec1::EcPrivateKey::from_der(private_key).is_ok(),
            KeyAlgorithm::Ed25519 => OctetStringRef::from_der(private_key)
                .map(|seed| seed.as_bytes().len() == ED25519_SEED_LEN)
                .unwrap_or(false),
            KeyAlgorithm::Dsa => UintRef::from_der(private_key).is_ok(),
        }
    }

    fn matches_openssh(self, algorithm: &Algorithm) -> bool {
        matches!(
            (self, algorithm),
            (KeyAlgorithm::Rsa, Algorithm::Rsa { .. })
                | (KeyAlgorithm::Ed25519, Algorithm::Ed25519)
                | (KeyAlgorithm::Ecdsa, Algorithm::Ecdsa { .. })
                | (KeyAlgorithm::Dsa, Algorithm::Dsa)
        )
    }

    fn attempt(self, envelope: &KeyEnvelope) -> Attempt {
        match envelope {
            KeyEnvelope::OpenSsh {
                algorithm,
                encrypted,
            } if self.matches_openssh(algorithm) => {
                if *encrypted {
                    Attempt::PassphraseRequired
                } else {
                    Attempt::Matched
                }
            }
            KeyEnvelope::Legacy {
                label,
                encrypted,
                der,
            } if self.legacy_label() == Some(label.as_str()) => {
                if *encrypted {
                    Attempt::PassphraseRequired
                } else if der.as_deref().map(|der| self.decodes_legacy(der)).unwrap_or(false) {
                    Attempt::Matched
                } else {
                    Attempt::Mismatch
                }
            }
            KeyEnvelope::Pkcs8 { oid, private_key }
                if *oid == self.pkcs8_oid() && self.decodes_pkcs8_key(private_key) =>
            {
                Attempt::Matched
            }
            KeyEnvelope::EncryptedPkcs8 => Attempt::PassphraseRequired,
            _ => Attempt::Mismatch,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Matched,
    Mismatch,
    PassphraseRequired,
}

#[derive(Debug, thiserror::Error)]
pub enum KeyLoadError {
    #[error("Private key file not found at: {}", .0.display())]
    KeyFileNotFound(PathBuf),
    #[error("Private key at {} is encrypted with a passphrase", .0.display())]
    PassphraseRequired(PathBuf),
    #[error("Failed to read private key {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not load private key from {} (tried {tried})", .path.display())]
    Unsupported { path: PathBuf, tried: String },
}

impl From<KeyLoadError> for RemoteError {
    fn from(err: KeyLoadError) -> Self {
        let message = err.to_string();
        match err {
            KeyLoadError::KeyFileNotFound(path) => RemoteError::key_file_not_found(message)
                .with_detail("key_file", path.display().to_string())
                .with_hint("Set SSH_KEY_FILE to an existing private key."),
            KeyLoadError::PassphraseRequired(path) => RemoteError::passphrase_required(message)
                .with_detail("key_file", path.display().to_string())
                .with_hint("Passphrase-protected keys are not supported; use an unencrypted copy."),
            KeyLoadError::Unreadable { path, .. } | KeyLoadError::Unsupported { path, .. } => {
                RemoteError::key_load(message).with_detail("key_file", path.display().to_string())
            }
        }
    }
}

/// A private key matched by one of the attempts. Owned by the session that
/// loaded it and never written anywhere else.
#[derive(Clone)]
pub struct Credential {
    algorithm: KeyAlgorithm,
    source: PathBuf,
    pem: String,
}

impl Credential {
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub(crate) fn private_key_pem(&self) -> &str {
        &self.pem
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("algorithm", &self.algorithm)
            .field("source", &self.source)
            .field("pem", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct KeyLoader {
    order: Vec<KeyAlgorithm>,
}

impl Default for KeyLoader {
    fn default() -> Self {
        Self {
            order: KeyAlgorithm::TRY_ORDER.to_vec(),
        }
    }
}

impl KeyLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(order: &[KeyAlgorithm]) -> Self {
        Self {
            order: order.to_vec(),
        }
    }

    pub fn load(&self, path: &Path) -> Result<Credential, KeyLoadError> {
        if !path.is_file() {
            return Err(KeyLoadError::KeyFileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| KeyLoadError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse(path, &text)
    }

    pub fn parse(&self, source: &Path, text: &str) -> Result<Credential, KeyLoadError> {
        let envelope = KeyEnvelope::classify(text);
        for algorithm in &self.order {
            match algorithm.attempt(&envelope) {
                Attempt::Matched => {
                    return Ok(Credential {
                        algorithm: *algorithm,
                        source: source.to_path_buf(),
                        pem: text.trim().to_string() + "\n",
                    })
                }
                Attempt::PassphraseRequired => {
                    return Err(KeyLoadError::PassphraseRequired(source.to_path_buf()))
                }
                Attempt::Mismatch => continue,
            }
        }
        Err(KeyLoadError::Unsupported {
            path: source.to_path_buf(),
            tried: self
                .order
                .iter()
                .map(|a| a.name())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

#[derive(Debug)]
enum KeyEnvelope {
    OpenSsh {
        algorithm: Algorithm,
        encrypted: bool,
    },
    Legacy {
        label: String,
        encrypted: bool,
        der: Option<Vec<u8>>,
    },
    Pkcs8 {
        oid: ObjectIdentifier,
        private_key: Vec<u8>,
    },
    EncryptedPkcs8,
    Unrecognized,
}

impl KeyEnvelope {
    fn classify(text: &str) -> Self {
        let Some(block) = PemBlock::parse(text) else {
            return KeyEnvelope::Unrecognized;
        };
        match block.label.as_str() {
            "OPENSSH PRIVATE KEY" => match PrivateKey::from_openssh(text.trim()) {
                Ok(key) => KeyEnvelope::OpenSsh {
                    algorithm: key.algorithm(),
                    encrypted: key.is_encrypted(),
                },
                Err(_) => KeyEnvelope::Unrecognized,
            },
            "ENCRYPTED PRIVATE KEY" => match block.der() {
                Some(der) if is_encrypted_pkcs8(&der) => KeyEnvelope::EncryptedPkcs8,
                _ => KeyEnvelope::Unrecognized,
            },
            "PRIVATE KEY" => block
                .der()
                .and_then(|der| {
                    PrivateKeyInfo::from_der(&der)
                        .ok()
                        .map(|info| KeyEnvelope::Pkcs8 {
                            oid: info.algorithm.oid,
                            private_key: info.private_key.to_vec(),
                        })
                })
                .unwrap_or(KeyEnvelope::Unrecognized),
            label if label.ends_with(" PRIVATE KEY") => KeyEnvelope::Legacy {
                label: label.to_string(),
                encrypted: block.is_encrypted(),
                der: block.der(),
            },
            _ => KeyEnvelope::Unrecognized,
        }
    }
}

struct PemBlock {
    label: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl PemBlock {
    fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines().map(str::trim);
        let label = lines.find_map(|line| {
            line.strip_prefix("-----BEGIN ")
                .and_then(|rest| rest.strip_suffix("-----"))
        })?;
        let end_marker = format!("-----END {}-----", label);
        let mut headers = Vec::new();
        let mut body = String::new();
        let mut closed = false;
        for line in lines {
            if line == end_marker {
                closed = true;
                break;
            }
            if body.is_empty() {
                if let Some((name, value)) = line.split_once(':') {
                    headers.push((name.trim().to_string(), value.trim().to_string()));
                    continue;
                }
            }
            body.push_str(line);
        }
        if !closed {
            return None;
        }
        Some(Self {
            label: label.to_string(),
            headers,
            body,
        })
    }

    fn is_encrypted(&self) -> bool {
        self.headers
            .iter()
            .any(|(name, value)| name.eq_ignore_ascii_case("Proc-Type") && value.contains("ENCRYPTED"))
    }

    fn der(&self) -> Option<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(self.body.as_bytes())
            .ok()
            .filter(|der| !der.is_empty())
    }
}

/// `EncryptedPrivateKeyInfo`: an algorithm identifier and the ciphertext.
/// The ciphertext itself cannot be checked without the passphrase.
fn is_encrypted_pkcs8(der: &[u8]) -> bool {
    Vec::<AnyRef>::from_der(der)
        .map(|fields| fields.len() == 2)
        .unwrap_or(false)
}
