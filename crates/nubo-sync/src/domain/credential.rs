//! Credential primitives: selector/validator tokens and the password record.
//!
//! A token is `"<selector>:<validator>"`. The store never sees the validator,
//! only its SHA-256 digest, so a leaked database does not leak live tokens.
//!
//! The install password is kept as `v1$<rounds>$<salt hex>$<digest hex>`,
//! where the digest is PBKDF2-HMAC-SHA256 over a single 32-byte block.

use crate::domain::error::{NuboError, StoreError};
use rand::RngCore;
use rmpv::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

const PASSWORD_SCHEME: &str = "v1";
const PASSWORD_SALT_LEN: usize = 16;

/// Why a presented credential was refused. Reported as `FORBIDDEN` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("credential is not a selector:validator string")]
    Malformed,

    #[error("unknown selector")]
    UnknownSelector,

    #[error("credential was revoked")]
    Revoked,

    #[error("validator does not match")]
    ValidatorMismatch,

    /// The store failed while checking or renewing. Not an auth decision.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CredentialError> for NuboError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Store(e) => e.into(),
            _ => NuboError::forbidden(),
        }
    }
}

/// Parsed `selector:validator` token.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub selector: String,
    pub validator: String,
}

impl AuthToken {
    pub fn new(selector: impl Into<String>, validator: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            validator: validator.into(),
        }
    }

    /// Accepts a string or a UTF-8 byte string holding `selector:validator`.
    pub fn parse(credential: &Value) -> Result<Self, CredentialError> {
        let text = match credential {
            Value::String(s) => s.as_str(),
            Value::Binary(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
        .ok_or(CredentialError::Malformed)?;

        let (selector, validator) = text.split_once(':').ok_or(CredentialError::Malformed)?;
        if selector.is_empty() || validator.is_empty() {
            return Err(CredentialError::Malformed);
        }
        Ok(Self::new(selector, validator))
    }

    pub fn to_value(&self) -> Value {
        Value::from(self.to_string())
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.selector, self.validator)
    }
}

// Keep validators out of logs.
impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("selector", &self.selector)
            .field("validator", &"<redacted>")
            .finish()
    }
}

/// Hex SHA-256 of a validator, as stored in `tbl_computer.validator`.
pub fn digest_validator(validator: &str) -> String {
    hex::encode(Sha256::digest(validator.as_bytes()))
}

/// Constant-time comparison of two digests.
pub fn digests_match(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Password record parse failures. A bad record is a server-side problem.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PasswordError {
    #[error("malformed password record: {0}")]
    Malformed(&'static str),

    #[error("password hashing rounds must be positive")]
    ZeroRounds,
}

impl From<PasswordError> for NuboError {
    fn from(_: PasswordError) -> Self {
        NuboError::internal()
    }
}

/// Salted, iterated password digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordRecord {
    pub rounds: u32,
    pub salt: Vec<u8>,
    pub digest: [u8; 32],
}

impl PasswordRecord {
    /// Derives a record from `password` with a fresh random salt.
    pub fn generate(password: &str, rounds: u32) -> Result<Self, PasswordError> {
        let mut salt = vec![0u8; PASSWORD_SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::derive(password, salt, rounds)
    }

    pub fn derive(password: &str, salt: Vec<u8>, rounds: u32) -> Result<Self, PasswordError> {
        if rounds == 0 {
            return Err(PasswordError::ZeroRounds);
        }
        let digest = pbkdf2_block(password.as_bytes(), &salt, rounds);
        Ok(Self {
            rounds,
            salt,
            digest,
        })
    }

    pub fn parse(record: &str) -> Result<Self, PasswordError> {
        let mut parts = record.split('$');
        let (Some(scheme), Some(rounds), Some(salt), Some(digest), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(PasswordError::Malformed("expected four fields"));
        };

        if scheme != PASSWORD_SCHEME {
            return Err(PasswordError::Malformed("unknown scheme"));
        }
        let rounds: u32 = rounds
            .parse()
            .map_err(|_| PasswordError::Malformed("rounds"))?;
        if rounds == 0 {
            return Err(PasswordError::ZeroRounds);
        }
        let salt = hex::decode(salt).map_err(|_| PasswordError::Malformed("salt"))?;
        let digest: [u8; 32] = hex::decode(digest)
            .ok()
            .and_then(|d| d.try_into().ok())
            .ok_or(PasswordError::Malformed("digest"))?;

        Ok(Self {
            rounds,
            salt,
            digest,
        })
    }

    pub fn encode(&self) -> String {
        format!(
            "{}${}${}${}",
            PASSWORD_SCHEME,
            self.rounds,
            hex::encode(&self.salt),
            hex::encode(self.digest)
        )
    }

    pub fn verify(&self, password: &str) -> bool {
        let candidate = pbkdf2_block(password.as_bytes(), &self.salt, self.rounds);
        candidate[..].ct_eq(&self.digest[..]).into()
    }
}

/// First (and only) PBKDF2-HMAC-SHA256 output block.
fn pbkdf2_block(password: &[u8], salt: &[u8], rounds: u32) -> [u8; 32] {
    let mut output = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, rounds, &mut output);
    output
}
