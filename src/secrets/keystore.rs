//! Disk-backed store for the secret-encryption key.
//!
//! The store is a JSON document holding a KDF header and one wrapped key
//! entry under a configured alias. The wrapping key is derived from the
//! store password with PBKDF2-SHA256; the entry itself is sealed with
//! ChaCha20-Poly1305, so a tampered or wrongly-decrypted store is detected
//! rather than yielding garbage key material.
//!
//! Creation writes through a temporary file followed by a rename, so a
//! concurrent reader never observes a partially written store.

use crate::error::Error;
use base64ct::{Base64, Encoding};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{collections::BTreeMap, fs, path::Path};
use tracing::debug;

const FORMAT_VERSION: u32 = 1;
const KDF_ITERATIONS: u32 = 100_000;
const SALT_LENGTH: usize = 16;
const NONCE_LENGTH: usize = 12;

/// Length of the stored symmetric key, in bytes.
pub(crate) const KEY_LENGTH: usize = 32;

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    kdf: KdfParams,
    entries: BTreeMap<String, WrappedKey>,
}

#[derive(Serialize, Deserialize)]
struct KdfParams {
    salt: String,
    iterations: u32,
}

#[derive(Serialize, Deserialize)]
struct WrappedKey {
    nonce: String,
    ciphertext: String,
}

/// Load the key named `alias` from the store at `path`, creating the store
/// with a freshly generated key when the file does not exist yet.
///
/// # Errors
/// Propagates I/O failures; a store that does not parse, a missing entry or
/// a rejected password surface as configuration errors.
pub(crate) fn load_or_create(
    path: &Path,
    password: &SecretString,
    alias: &str,
) -> Result<[u8; KEY_LENGTH], Error> {
    if path.exists() {
        load(path, password, alias)
    } else {
        create(path, password, alias)
    }
}

fn load(path: &Path, password: &SecretString, alias: &str) -> Result<[u8; KEY_LENGTH], Error> {
    debug!(path = %path.display(), alias, "loading key store");
    let raw = fs::read_to_string(path)?;
    let store: StoreFile = serde_json::from_str(&raw)
        .map_err(|err| Error::Configuration(format!("key store is not valid: {err}")))?;
    if store.version != FORMAT_VERSION {
        return Err(Error::Configuration(format!(
            "unsupported key store version {}",
            store.version
        )));
    }
    let entry = store.entries.get(alias).ok_or_else(|| {
        Error::Configuration(format!("key store has no entry named {alias}"))
    })?;

    let salt = decode_field(&store.kdf.salt, "kdf salt")?;
    let nonce = decode_field(&entry.nonce, "entry nonce")?;
    let ciphertext = decode_field(&entry.ciphertext, "entry ciphertext")?;
    if nonce.len() != NONCE_LENGTH {
        return Err(Error::Configuration("entry nonce has the wrong length".to_string()));
    }

    let wrapping = derive_wrapping_key(password, &salt, store.kdf.iterations);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&wrapping));
    let unwrapped = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_| Error::Configuration("key store password rejected".to_string()))?;

    let mut key = [0u8; KEY_LENGTH];
    if unwrapped.len() != KEY_LENGTH {
        return Err(Error::Configuration("stored key has the wrong length".to_string()));
    }
    key.copy_from_slice(&unwrapped);
    Ok(key)
}

fn create(path: &Path, password: &SecretString, alias: &str) -> Result<[u8; KEY_LENGTH], Error> {
    debug!(path = %path.display(), alias, "creating key store");
    let mut key = [0u8; KEY_LENGTH];
    OsRng.fill_bytes(&mut key);

    let mut salt = [0u8; SALT_LENGTH];
    OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce);

    let wrapping = derive_wrapping_key(password, &salt, KDF_ITERATIONS);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&wrapping));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), key.as_slice())
        .map_err(|_| Error::Cipher("cannot wrap the generated key".to_string()))?;

    let mut entries = BTreeMap::new();
    entries.insert(
        alias.to_string(),
        WrappedKey {
            nonce: Base64::encode_string(&nonce),
            ciphertext: Base64::encode_string(&ciphertext),
        },
    );
    let store = StoreFile {
        version: FORMAT_VERSION,
        kdf: KdfParams {
            salt: Base64::encode_string(&salt),
            iterations: KDF_ITERATIONS,
        },
        entries,
    };
    let body = serde_json::to_string_pretty(&store)
        .map_err(|err| Error::Configuration(format!("cannot serialize key store: {err}")))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    // Write to a sibling temp file and rename so readers only ever see a
    // complete store.
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &body)?;
    fs::rename(&tmp, path)?;
    Ok(key)
}

fn decode_field(value: &str, what: &str) -> Result<Vec<u8>, Error> {
    Base64::decode_vec(value)
        .map_err(|_| Error::Configuration(format!("key store {what} is not valid base64")))
}

fn derive_wrapping_key(
    password: &SecretString,
    salt: &[u8],
    iterations: u32,
) -> [u8; KEY_LENGTH] {
    let mut out = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(
        password.expose_secret().as_bytes(),
        salt,
        iterations,
        &mut out,
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn scratch_store(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "trustgate-keystore-{label}-{}",
            Uuid::new_v4()
        ))
    }

    #[test]
    fn create_then_load_returns_the_same_key() {
        let path = scratch_store("roundtrip").join("store.json");
        let password = SecretString::from("store-password".to_string());

        let created = load_or_create(&path, &password, "primary").expect("create");
        assert!(path.exists());
        let loaded = load_or_create(&path, &password, "primary").expect("load");
        assert_eq!(created, loaded);
    }

    #[test]
    fn wrong_password_is_rejected() {
        let path = scratch_store("badpass").join("store.json");
        load_or_create(&path, &SecretString::from("right".to_string()), "primary").expect("create");
        let result = load_or_create(&path, &SecretString::from("wrong".to_string()), "primary");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn unknown_alias_is_rejected() {
        let path = scratch_store("alias").join("store.json");
        let password = SecretString::from("store-password".to_string());
        load_or_create(&path, &password, "primary").expect("create");
        let result = load_or_create(&path, &password, "secondary");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn garbage_store_file_is_a_configuration_error() {
        let path = scratch_store("garbage").join("store.json");
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, "not json at all").expect("write");
        let result = load_or_create(&path, &SecretString::from("pw".to_string()), "primary");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn no_temp_file_is_left_behind() {
        let path = scratch_store("tmpfile").join("store.json");
        load_or_create(&path, &SecretString::from("pw".to_string()), "primary").expect("create");
        assert!(!path.with_extension("tmp").exists());
    }
}
