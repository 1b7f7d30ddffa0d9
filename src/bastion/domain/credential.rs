//! Stored and offered SSH credentials.

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error returned when a stored authorized key cannot be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthorizedKeyError {
    /// The entry has no key blob.
    #[error("authorized key entry is empty or missing its key blob")]
    Incomplete,
    /// The key blob is not valid base64.
    #[error("authorized key blob is not valid base64: {0}")]
    InvalidBlob(String),
    /// The algorithm field disagrees with the algorithm inside the blob.
    #[error("authorized key declares {declared} but encodes {encoded}")]
    AlgorithmMismatch {
        /// Algorithm named in the text entry.
        declared: String,
        /// Algorithm encoded in the blob.
        encoded: String,
    },
}

/// Public key stored for a user, in OpenSSH `authorized_keys` form.
///
/// Only the wire encoding takes part in comparisons; the trailing comment
/// is kept for display.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AuthorizedKey {
    algorithm: String,
    blob: Vec<u8>,
    comment: Option<String>,
}

impl AuthorizedKey {
    /// Parses `algorithm base64-blob [comment]`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorizedKeyError`] when a field is missing, the blob is
    /// not base64, or the blob encodes a different algorithm.
    pub fn parse(line: &str) -> Result<Self, AuthorizedKeyError> {
        let mut fields = line.split_whitespace();
        let (Some(algorithm), Some(encoded)) = (fields.next(), fields.next()) else {
            return Err(AuthorizedKeyError::Incomplete);
        };
        let blob = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|err| AuthorizedKeyError::InvalidBlob(err.to_string()))?;

        if let Some(encoded_algorithm) = blob_algorithm(&blob) {
            if encoded_algorithm != algorithm.as_bytes() {
                return Err(AuthorizedKeyError::AlgorithmMismatch {
                    declared: algorithm.to_owned(),
                    encoded: String::from_utf8_lossy(encoded_algorithm).into_owned(),
                });
            }
        }

        let comment = fields.collect::<Vec<_>>().join(" ");
        Ok(Self {
            algorithm: algorithm.to_owned(),
            blob,
            comment: (!comment.is_empty()).then_some(comment),
        })
    }

    /// Returns the key algorithm name.
    #[must_use]
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Returns the SSH wire encoding of the key.
    #[must_use]
    pub fn wire_bytes(&self) -> &[u8] {
        &self.blob
    }

    /// Returns whether `offered` is byte-for-byte this key.
    #[must_use]
    pub fn matches(&self, offered: &[u8]) -> bool {
        self.blob == offered
    }
}

/// Reads the algorithm name from the length-prefixed head of a key blob.
fn blob_algorithm(blob: &[u8]) -> Option<&[u8]> {
    let (length, rest) = blob.split_first_chunk::<4>()?;
    let length = usize::try_from(u32::from_be_bytes(*length)).ok()?;
    rest.get(..length)
}

impl fmt::Display for AuthorizedKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{} {}",
            self.algorithm,
            general_purpose::STANDARD.encode(&self.blob)
        )?;
        if let Some(comment) = &self.comment {
            write!(formatter, " {comment}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for AuthorizedKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthorizedKey")
            .field("algorithm", &self.algorithm)
            .field("comment", &self.comment)
            .finish_non_exhaustive()
    }
}

impl TryFrom<String> for AuthorizedKey {
    type Error = AuthorizedKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AuthorizedKey> for String {
    fn from(value: AuthorizedKey) -> Self {
        value.to_string()
    }
}

/// Stored bcrypt password hash.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// Wraps an encoded hash such as `$2b$12$...`.
    #[must_use]
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Returns the encoded hash.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("PasswordHash(<redacted>)")
    }
}

/// Credential presented by an SSH client.
#[derive(Clone, PartialEq, Eq)]
pub enum OfferedCredential {
    /// Wire encoding of the offered public key.
    PublicKey(Vec<u8>),
    /// Plaintext password.
    Password(String),
}

impl OfferedCredential {
    /// Returns the SSH method name for logging.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::PublicKey(_) => "publickey",
            Self::Password(_) => "password",
        }
    }
}

impl fmt::Debug for OfferedCredential {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "OfferedCredential::{}", self.method())
    }
}
