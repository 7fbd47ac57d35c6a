//! Stored credential text formats.
//!
//! Two formats coexist in the user database. Old releases wrote
//! `iterations:hex(salt):hex(digest)`; current releases write
//! `base64(salt ‖ digest)` with fixed lengths. Hashing only ever produces
//! the compact form; the legacy form stays parseable so credentials stored
//! by old releases keep verifying.

use crate::error::Error;
use base64ct::{Base64, Encoding};

/// Salt length of the compact form, in bytes.
pub(crate) const SALT_LENGTH: usize = 16;

/// Digest length of the compact form, in bytes.
pub(crate) const DIGEST_LENGTH: usize = 64;

/// A parsed stored credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredCredential {
    /// `iterations:hex(salt):hex(digest)`, written by old releases. The
    /// digest length is whatever was stored.
    Legacy {
        iterations: u32,
        salt: Vec<u8>,
        digest: Vec<u8>,
    },
    /// `base64(salt ‖ digest)` with fixed lengths.
    Compact {
        salt: [u8; SALT_LENGTH],
        digest: [u8; DIGEST_LENGTH],
    },
}

impl StoredCredential {
    /// Parse a stored credential, sniffing the format: the legacy form is
    /// `:`-delimited, the compact form never contains a `:`.
    ///
    /// # Errors
    /// Returns [`Error::MalformedCredential`] when the text parses under
    /// neither format.
    pub fn parse(stored: &str) -> Result<Self, Error> {
        if stored.contains(':') {
            Self::parse_legacy(stored)
        } else {
            Self::parse_compact(stored)
        }
    }

    fn parse_legacy(stored: &str) -> Result<Self, Error> {
        let mut parts = stored.split(':');
        let (Some(iterations), Some(salt), Some(digest), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::MalformedCredential(
                "expected iterations:salt:digest".to_string(),
            ));
        };
        let iterations: u32 = iterations
            .parse()
            .map_err(|_| Error::MalformedCredential("invalid iteration count".to_string()))?;
        if iterations == 0 {
            return Err(Error::MalformedCredential(
                "iteration count must be positive".to_string(),
            ));
        }
        let salt = hex::decode(salt)
            .map_err(|_| Error::MalformedCredential("salt is not valid hex".to_string()))?;
        let digest = hex::decode(digest)
            .map_err(|_| Error::MalformedCredential("digest is not valid hex".to_string()))?;
        if salt.is_empty() || digest.is_empty() {
            return Err(Error::MalformedCredential(
                "salt and digest must not be empty".to_string(),
            ));
        }
        Ok(Self::Legacy {
            iterations,
            salt,
            digest,
        })
    }

    fn parse_compact(stored: &str) -> Result<Self, Error> {
        let decoded = Base64::decode_vec(stored)
            .map_err(|_| Error::MalformedCredential("not valid base64".to_string()))?;
        if decoded.len() != SALT_LENGTH + DIGEST_LENGTH {
            return Err(Error::MalformedCredential(format!(
                "expected {} bytes, got {}",
                SALT_LENGTH + DIGEST_LENGTH,
                decoded.len()
            )));
        }
        let mut salt = [0u8; SALT_LENGTH];
        let mut digest = [0u8; DIGEST_LENGTH];
        salt.copy_from_slice(&decoded[..SALT_LENGTH]);
        digest.copy_from_slice(&decoded[SALT_LENGTH..]);
        Ok(Self::Compact { salt, digest })
    }

    /// Serialize back to the textual form the variant was parsed from.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Legacy {
                iterations,
                salt,
                digest,
            } => format!("{iterations}:{}:{}", hex::encode(salt), hex::encode(digest)),
            Self::Compact { salt, digest } => {
                let mut combined = Vec::with_capacity(SALT_LENGTH + DIGEST_LENGTH);
                combined.extend_from_slice(salt);
                combined.extend_from_slice(digest);
                Base64::encode_string(&combined)
            }
        }
    }
}
