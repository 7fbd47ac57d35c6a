//! Password hashing and verification.
//!
//! Passwords are hashed with PBKDF2-HMAC-SHA1 under a random per-password
//! salt and serialized in the compact credential form. Verification sniffs
//! the stored format, recomputes the digest with the embedded parameters and
//! compares in constant time, so the comparison cost never depends on where
//! the digests first differ.

mod credential;

pub use credential::StoredCredential;

use crate::error::Error;
use credential::{DIGEST_LENGTH, SALT_LENGTH};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha1::Sha1;
use subtle::ConstantTimeEq;

/// PBKDF2 rounds applied to newly produced hashes.
const ITERATIONS: u32 = 10_000;

/// Hash `password` into a storable credential string.
///
/// Always produces the compact form: `base64(salt ‖ digest)` with a fresh
/// 16-byte salt and a 64-byte digest.
///
/// # Errors
/// Infallible today; kept fallible so the signature survives a key-derivation
/// backend that can fail.
pub fn hash(password: &str) -> Result<String, Error> {
    let mut salt = [0u8; SALT_LENGTH];
    OsRng.fill_bytes(&mut salt);
    let mut digest = [0u8; DIGEST_LENGTH];
    pbkdf2_hmac::<Sha1>(password.as_bytes(), &salt, ITERATIONS, &mut digest);
    Ok(StoredCredential::Compact { salt, digest }.encode())
}

/// Verify `password` against a stored credential in either format.
///
/// `Ok(false)` means the password is wrong; a stored value that parses under
/// neither format is an error, so callers can tell a corrupt credential from
/// a failed login.
///
/// # Errors
/// Returns [`Error::MalformedCredential`] when `stored` cannot be parsed.
pub fn verify(password: &str, stored: &str) -> Result<bool, Error> {
    match StoredCredential::parse(stored)? {
        StoredCredential::Legacy {
            iterations,
            salt,
            digest,
        } => {
            let mut computed = vec![0u8; digest.len()];
            pbkdf2_hmac::<Sha1>(password.as_bytes(), &salt, iterations, &mut computed);
            Ok(computed.ct_eq(&digest).into())
        }
        StoredCredential::Compact { salt, digest } => {
            let mut computed = [0u8; DIGEST_LENGTH];
            pbkdf2_hmac::<Sha1>(password.as_bytes(), &salt, ITERATIONS, &mut computed);
            Ok(computed.ct_eq(&digest).into())
        }
    }
}

/// Derive the deterministic password handed out for generated accounts.
///
/// The derivation is pure arithmetic over the source string, so the same
/// account name always yields the same password; it has to stay stable
/// because passwords already distributed to users were produced by it.
/// Not a substitute for [`hash`] — the output is low-entropy by
/// construction and only exists for provisioning.
#[must_use]
pub fn derive_account_password(source: &str) -> String {
    derive_sized(8, source.len() as i32, java_string_hash(source), i32::MAX)
}

fn derive_sized(size: usize, param1: i32, param2: i32, param3: i32) -> String {
    // All arithmetic wraps at 32 bits; the historical values depend on it.
    let seed2 = 55i32.wrapping_sub(param1);
    let mut tmp1 = seed2
        .wrapping_mul(param1)
        .wrapping_mul(param1)
        .wrapping_mul(param1.wrapping_add(param2).wrapping_add(param3));
    let mut tmp2 = param1
        .wrapping_mul(seed2)
        .wrapping_mul(seed2)
        .wrapping_mul(seed2.wrapping_add(param2).wrapping_add(param3));
    if tmp2 < 0 {
        tmp2 = tmp2.wrapping_neg();
    }
    if tmp1 < 0 {
        tmp1 = tmp1.wrapping_neg();
    }
    let mut tmp4 = tmp1.wrapping_add(tmp2);
    if tmp4 < 0 {
        tmp4 = tmp4.wrapping_neg();
    }
    let digits = format!("{tmp1}{tmp2}{tmp4}");
    let chars: &[u8] = b"qwertyuiopasdfghjklzxcvbnm";
    let mut password = String::new();
    let mut i = 0;
    while password.len() < size && i + 2 < digits.len() {
        let value: usize = digits[i..i + 2].parse().unwrap_or(usize::MAX);
        i += 2;
        if value < chars.len() {
            password.push(chars[value] as char);
        } else {
            password.push_str(&digits[i..i + 1]);
            i += 1;
        }
    }
    password
}

/// 32-bit wrapping hash over UTF-16 code units, matching the hash the
/// existing provisioned passwords were derived with.
fn java_string_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}
