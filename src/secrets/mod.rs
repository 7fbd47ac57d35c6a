//! Encryption for operational secrets.
//!
//! Passwords and keys persisted to configuration or disk go through
//! [`SecretCipher`]: ChaCha20-Poly1305 under a key that is either loaded
//! from a password-protected store file or generated in memory for the
//! process lifetime. With an in-memory key, secrets do not survive a
//! restart — expected behavior for deployments that never configured a
//! store, not a defect.
//!
//! Deployments that predate the store wrote secrets in the v201 text
//! format; [`SecretCipher::decrypt`] falls back to that decoder when the
//! current scheme fails on input carrying the legacy marker.

mod keystore;
mod legacy;

use crate::{config::SecretsConfig, error::Error};
use base64ct::{Base64, Encoding};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use once_cell::sync::OnceCell;
use rand::{rngs::OsRng, RngCore};
use tracing::{debug, warn};

const NONCE_LENGTH: usize = 12;

/// Encrypts and decrypts operational secrets.
///
/// The key is acquired lazily, at most once per instance, behind a blocking
/// one-time initializer: concurrent callers that lose the initialization
/// race wait until the key is fully set rather than observing a partial
/// state. The underlying cipher object is rebuilt per call; only the key
/// bytes are shared.
pub struct SecretCipher {
    config: SecretsConfig,
    key: OnceCell<[u8; keystore::KEY_LENGTH]>,
}

impl SecretCipher {
    #[must_use]
    pub fn new(config: SecretsConfig) -> Self {
        Self {
            config,
            key: OnceCell::new(),
        }
    }

    fn key(&self) -> Result<&[u8; keystore::KEY_LENGTH], Error> {
        self.key.get_or_try_init(|| {
            match (&self.config.key_store, &self.config.key_store_password) {
                (Some(path), Some(password)) => {
                    keystore::load_or_create(path, password, &self.config.key_alias)
                }
                _ => {
                    debug!("no key store configured, generating an in-memory key");
                    let mut key = [0u8; keystore::KEY_LENGTH];
                    OsRng.fill_bytes(&mut key);
                    Ok(key)
                }
            }
        })
    }

    /// Encrypt raw bytes into base64 text.
    ///
    /// # Errors
    /// Fails when the key cannot be acquired or the cipher rejects the
    /// input.
    pub fn encrypt(&self, data: &[u8]) -> Result<String, Error> {
        let key = self.key()?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), data)
            .map_err(|_| Error::Cipher("encryption failure".to_string()))?;
        let mut message = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        message.extend_from_slice(&nonce);
        message.extend_from_slice(&ciphertext);
        Ok(Base64::encode_string(&message))
    }

    /// Decrypt base64 text produced by [`encrypt`](Self::encrypt).
    ///
    /// Input the current scheme cannot handle is retried through the v201
    /// decoder when it carries the legacy marker; anything else surfaces
    /// the original failure.
    ///
    /// # Errors
    /// Fails when the key cannot be acquired or the text decodes under
    /// neither scheme.
    pub fn decrypt(&self, data: &str) -> Result<Vec<u8>, Error> {
        let key = self.key()?;
        match Self::decrypt_current(key, data) {
            Ok(plaintext) => Ok(plaintext),
            Err(err) if legacy::looks_legacy(data) => {
                warn!(%err, "cannot decrypt with the current scheme, trying the v201 fallback");
                legacy::decode(data)
            }
            Err(err) => Err(err),
        }
    }

    fn decrypt_current(
        key: &[u8; keystore::KEY_LENGTH],
        data: &str,
    ) -> Result<Vec<u8>, Error> {
        let message = Base64::decode_vec(data)
            .map_err(|_| Error::MalformedSecret("not valid base64".to_string()))?;
        if message.len() < NONCE_LENGTH {
            return Err(Error::Cipher("ciphertext shorter than a nonce".to_string()));
        }
        let (nonce, ciphertext) = message.split_at(NONCE_LENGTH);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Cipher("ciphertext rejected".to_string()))
    }

    /// Encrypt, falling back to the plaintext on any failure.
    ///
    /// This trades confidentiality for availability: when the key cannot be
    /// acquired the secret is written in clear and a warning is logged.
    /// Call sites accept that by choosing this variant over
    /// [`encrypt`](Self::encrypt), which propagates instead.
    ///
    /// Output longer than `line_width` is split into fixed-width lines for
    /// line-oriented files.
    #[must_use]
    pub fn try_encrypt(&self, data: &str, line_width: usize) -> String {
        match self.encrypt(data.as_bytes()) {
            Ok(ciphertext) => break_into_lines(&ciphertext, line_width),
            Err(err) => {
                warn!(%err, "cannot encrypt");
                data.to_string()
            }
        }
    }

    /// Decrypt text written by [`try_encrypt`](Self::try_encrypt), falling
    /// back to the input on any failure.
    ///
    /// Same availability trade as `try_encrypt`: a secret that cannot be
    /// decrypted is returned as-is on the assumption it was stored in
    /// clear. Embedded line breaks are stripped before decoding.
    #[must_use]
    pub fn try_decrypt(&self, data: &str) -> String {
        let stripped = data.replace('\n', "");
        match self.decrypt(&stripped).map(String::from_utf8) {
            Ok(Ok(plaintext)) => plaintext,
            Ok(Err(err)) => {
                warn!(%err, "decrypted secret is not valid utf-8");
                data.to_string()
            }
            Err(err) => {
                warn!(%err, "cannot decrypt");
                data.to_string()
            }
        }
    }
}

/// Split `input` into `line_width`-character lines.
///
/// Single-line output is returned untouched; multi-line output is
/// `\n`-led and `\n`-terminated, matching what existing config files
/// already contain.
fn break_into_lines(input: &str, line_width: usize) -> String {
    if line_width == 0 || input.len() <= line_width {
        return input.to_string();
    }
    let mut lines = String::with_capacity(input.len() + input.len() / line_width + 2);
    let mut rest = input;
    while !rest.is_empty() {
        let split = rest.len().min(line_width);
        lines.push('\n');
        lines.push_str(&rest[..split]);
        rest = &rest[split..];
    }
    lines.push('\n');
    lines
}
