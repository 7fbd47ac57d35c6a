//! # Trustgate
//!
//! `trustgate` is the trust and access layer of a data-dissemination
//! platform. It decides whether a login attempt may proceed, turns
//! plaintext credentials into durably verifiable hashes, protects
//! operational secrets written to configuration or disk, governs which TLS
//! peers are trusted, and brokers one-time-passcode verification against an
//! external identity provider.
//!
//! ## Components
//!
//! - [`login::LoginGuard`] — per-host failure tracking with growing delays,
//!   a ban threshold and a self-cleaning background sweeper. Consulted
//!   before any credential is checked; fed on every failure.
//! - [`password`] — salted, iterated password hashing and verification.
//!   Two stored formats coexist; new hashes always use the compact one.
//! - [`secrets::SecretCipher`] — symmetric encryption for secrets at rest,
//!   with a persistent password-protected key store or an in-memory key,
//!   plus read-compatibility with the legacy v201 text format.
//! - [`tls::TlsTransport`] — rustls contexts built from PEM material, a
//!   chain evaluator with the data-proxy override, and the stream
//!   decorators the rest of the platform talks through.
//! - [`otp::OtpVerifier`] — structural passcode checks and delegated
//!   verification against the OTP service.
//!
//! ## Flow
//!
//! An inbound connection is accepted through [`tls::TlsTransport`], which
//! performs the handshake and trust decision first. Once authenticated data
//! arrives, [`login::LoginGuard::check`] is consulted before any credential
//! is touched; [`password::verify`] or [`otp::OtpVerifier::authenticate`]
//! does the actual verification, and every failure goes back through
//! [`login::LoginGuard::increment`], which records it and slows the caller
//! down. [`secrets::SecretCipher`] sits orthogonally wherever a secret is
//! persisted or read back.
//!
//! The crate is a library: it consumes typed configuration ([`config`]),
//! logs through `tracing`, and leaves subscriber installation, config
//! loading and the wire protocol to the embedding services.

pub mod config;
pub mod error;
pub mod login;
pub mod otp;
pub mod password;
pub mod secrets;
pub mod tls;

pub use config::{LoginConfig, OtpConfig, SecretsConfig, TlsConfig};
pub use error::Error;
pub use login::LoginGuard;
pub use otp::OtpVerifier;
pub use secrets::SecretCipher;
pub use tls::TlsTransport;
