//! Passcode checks and delegated verification.
//!
//! Structural validation is local and free; actual verification is
//! delegated to the platform's OTP service over HTTP. Both user+password
//! and user+passcode credentials are supported, each with its own
//! pre-agreed client id/secret pair.

use crate::{config::OtpConfig, error::Error};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use url::Url;

/// True when `passcode` has the shape of a one-time passcode: exactly six
/// or eight decimal digits.
#[must_use]
pub fn is_valid_shape(passcode: &str) -> bool {
    (passcode.len() == 6 || passcode.len() == 8)
        && passcode.bytes().all(|byte| byte.is_ascii_digit())
}

/// Client for the remote OTP service.
pub struct OtpVerifier {
    config: OtpConfig,
    url: Url,
    client: Client,
}

impl OtpVerifier {
    /// Validate the configuration and build the HTTP client.
    ///
    /// The endpoint URL and, when the feature is active, both client
    /// id/secret pairs are checked here so a misconfigured service fails at
    /// startup instead of on its first login.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] on an invalid endpoint or missing
    /// client credentials.
    pub fn new(config: OtpConfig) -> Result<Self, Error> {
        let url = Url::parse(&config.url)
            .map_err(|err| Error::Configuration(format!("invalid otp endpoint: {err}")))?;
        if config.active {
            if config.client_id_for_password.is_none()
                || config.client_secret_for_password.is_none()
            {
                return Err(Error::Configuration(
                    "missing client credentials for password mode".to_string(),
                ));
            }
            if config.client_id_for_passcode.is_none()
                || config.client_secret_for_passcode.is_none()
            {
                return Err(Error::Configuration(
                    "missing client credentials for passcode mode".to_string(),
                ));
            }
        }
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| Error::Configuration(format!("cannot build http client: {err}")))?;
        Ok(Self {
            config,
            url,
            client,
        })
    }

    /// Verify `user`'s credentials against the OTP service.
    ///
    /// One form-encoded request; the answer is the status code alone, the
    /// body is never interpreted. `Ok(false)` means the service refused the
    /// credentials — distinct from [`Error::Unavailable`], which means no
    /// answer was obtained at all.
    ///
    /// # Errors
    /// Returns [`Error::Unavailable`] when the feature is inactive or the
    /// service cannot be reached within the configured timeouts.
    pub async fn authenticate(
        &self,
        user: &str,
        credentials: &str,
        is_passcode: bool,
    ) -> Result<bool, Error> {
        if !self.config.active {
            return Err(Error::Unavailable(
                "otp verification is not active".to_string(),
            ));
        }
        let (client_id, client_secret) = self.client_pair(is_passcode)?;
        let credential_field = if is_passcode { "totp" } else { "password" };
        let params = [
            ("client_id", client_id),
            ("grant_type", self.config.grant_type.as_str()),
            ("client_secret", client_secret.expose_secret()),
            ("username", user),
            (credential_field, credentials),
        ];
        let response = self
            .client
            .post(self.url.clone())
            .form(&params)
            .send()
            .await
            .map_err(|err| Error::Unavailable(err.to_string()))?;
        let status = response.status().as_u16();
        debug!(user, status, is_passcode, "otp service answered");
        Ok(status == self.config.expected_status)
    }

    fn client_pair(&self, is_passcode: bool) -> Result<(&str, &SecretString), Error> {
        let (id, secret) = if is_passcode {
            (
                &self.config.client_id_for_passcode,
                &self.config.client_secret_for_passcode,
            )
        } else {
            (
                &self.config.client_id_for_password,
                &self.config.client_secret_for_password,
            )
        };
        match (id, secret) {
            (Some(id), Some(secret)) => Ok((id.as_str(), secret)),
            _ => Err(Error::Configuration(
                "missing client credentials".to_string(),
            )),
        }
    }
}
