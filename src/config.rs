//! Typed configuration consumed by the trust layer.
//!
//! The embedding platform owns loading and merging configuration files; the
//! structs here only carry the keys this crate consumes, with the defaults
//! the platform has historically shipped with. Secret-valued fields are
//! [`SecretString`] so they never end up in debug output.

use secrecy::SecretString;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Login throttling settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Record failed attempts and throttle repeat offenders.
    pub active: bool,
    /// Seconds a tracked host may sit idle before it is forgotten.
    pub reset_window_secs: u64,
    /// Hosts accepted without any checks.
    pub whitelist: Vec<String>,
    /// Failed attempts allowed before a host is refused outright.
    pub max_attempts: u32,
    /// Minimum delay after a failed attempt, in seconds.
    pub min_delay_secs: u64,
    /// Delay imposed when refusing a banned host, in seconds.
    pub ban_wait_secs: u64,
    /// Interval between background sweeps of the ban list, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            active: false,
            reset_window_secs: 3600,
            whitelist: Vec::new(),
            max_attempts: 20,
            min_delay_secs: 4,
            ban_wait_secs: 300,
            sweep_interval_secs: 600,
        }
    }
}

impl LoginConfig {
    #[must_use]
    pub fn reset_window(&self) -> Duration {
        Duration::from_secs(self.reset_window_secs)
    }

    #[must_use]
    pub fn min_delay(&self) -> Duration {
        Duration::from_secs(self.min_delay_secs)
    }

    #[must_use]
    pub fn ban_wait(&self) -> Duration {
        Duration::from_secs(self.ban_wait_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Secret-encryption settings.
///
/// When `key_store` and `key_store_password` are both set the encryption key
/// is persisted on disk and secrets survive restarts. Otherwise the key is
/// generated in memory and lives only for the process lifetime.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Path of the persistent key store.
    pub key_store: Option<PathBuf>,
    /// Password protecting the key store.
    pub key_store_password: Option<SecretString>,
    /// Name of the key entry inside the store.
    pub key_alias: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            key_store: None,
            key_store_password: None,
            key_alias: "trustgate".to_string(),
        }
    }
}

/// TLS material and trust policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// PEM certificate chain presented to peers.
    pub cert: PathBuf,
    /// PEM private key matching `cert`.
    pub key: PathBuf,
    /// PEM bundle of trusted roots. When unset the `cert` bundle doubles as
    /// the trust side, for deployments that ship one self-contained file.
    pub trust: Option<PathBuf>,
    /// Refuse handshakes whose chain fails validation and carries no
    /// override marker. Leave on outside of throwaway tooling.
    pub enforce_certificates: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert: PathBuf::new(),
            key: PathBuf::new(),
            trust: None,
            enforce_certificates: true,
        }
    }
}

impl TlsConfig {
    #[must_use]
    pub fn new(cert: PathBuf, key: PathBuf) -> Self {
        Self {
            cert,
            key,
            trust: None,
            enforce_certificates: true,
        }
    }

    #[must_use]
    pub fn trust_bundle(&self) -> &Path {
        self.trust.as_deref().unwrap_or(&self.cert)
    }
}

/// Remote passcode/password verification settings.
///
/// Two client id/secret pairs are pre-agreed with the OTP service: one for
/// user+password credentials and one for user+passcode credentials.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OtpConfig {
    /// Delegate credential verification to the OTP service.
    pub active: bool,
    /// Token endpoint of the OTP service.
    pub url: String,
    pub client_id_for_password: Option<String>,
    pub client_secret_for_password: Option<SecretString>,
    pub client_id_for_passcode: Option<String>,
    pub client_secret_for_passcode: Option<SecretString>,
    pub grant_type: String,
    /// Response status meaning "credentials accepted".
    pub expected_status: u16,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            active: false,
            url: "https://localhost/auth/realms/trustgate/protocol/openid-connect/token"
                .to_string(),
            client_id_for_password: None,
            client_secret_for_password: None,
            client_id_for_passcode: None,
            client_secret_for_passcode: None,
            grant_type: "password".to_string(),
            expected_status: 200,
            connect_timeout_secs: 5,
            request_timeout_secs: 5,
        }
    }
}

impl OtpConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
