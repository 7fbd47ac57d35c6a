use thiserror::Error;

/// Crate-wide error type.
///
/// Expected negative outcomes (wrong password, banned host, passcode refused
/// by the remote service) are reported as boolean results by the verification
/// functions; only exceptional conditions surface here.
#[derive(Debug, Error)]
pub enum Error {
    /// The attempt was refused and the failure recorded against the host.
    #[error("credentials rejected")]
    Rejected,
    #[error("malformed credential: {0}")]
    MalformedCredential(String),
    #[error("malformed secret: {0}")]
    MalformedSecret(String),
    #[error("cipher failure: {0}")]
    Cipher(String),
    #[error("verification service unavailable: {0}")]
    Unavailable(String),
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
