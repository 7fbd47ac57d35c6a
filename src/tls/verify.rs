//! Certificate-chain evaluation.
//!
//! Standard webpki validation runs first. A chain that fails validation is
//! still accepted when one of its certificates carries the subject of the
//! data-proxy peer — an operational exception for the one internal hop that
//! terminates connections with its own certificate. When enforcement is
//! switched off entirely, failed chains are accepted with a warning; that
//! mode exists for throwaway tooling and defaults to off (enforcement on).
//!
//! Every outcome is logged with subject, issuer and expiry of every
//! certificate in the presented chain, for accounting.

use crate::error::Error;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Subject markers of the data-proxy peer. A certificate whose subject
/// carries all three is accepted even when chain validation fails.
const OVERRIDE_MARKERS: [&str; 3] = ["O=ECMWF", "OU=NSS", "CN=ecproxy"];

/// Outcome of evaluating one presented chain. Derived per handshake and
/// logged; never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    /// Standard validation passed.
    TrustedValid,
    /// Validation failed but the chain carries the data-proxy subject.
    TrustedOverride,
    /// Validation failed and enforcement is on.
    UntrustedRejected,
    /// Validation failed, no override, enforcement switched off.
    UntrustedAccepted,
}

impl TrustDecision {
    fn as_str(self) -> &'static str {
        match self {
            Self::TrustedValid => "trusted (valid)",
            Self::TrustedOverride => "trusted (override)",
            Self::UntrustedRejected => "NOT trusted",
            Self::UntrustedAccepted => "not trusted (accepted, enforcement off)",
        }
    }
}

/// Chain evaluator wrapping the standard webpki verifier.
#[derive(Debug)]
pub struct ChainEvaluator {
    delegate: Arc<WebPkiServerVerifier>,
    enforce: bool,
}

impl ChainEvaluator {
    /// Build an evaluator trusting `roots`.
    ///
    /// # Errors
    /// Fails when the root store cannot back a verifier (e.g. it is empty).
    pub fn new(roots: Arc<RootCertStore>, enforce: bool) -> Result<Self, Error> {
        let delegate = WebPkiServerVerifier::builder(roots)
            .build()
            .map_err(|err| Error::Configuration(format!("cannot build verifier: {err}")))?;
        Ok(Self { delegate, enforce })
    }

    /// Run validation and derive the trust decision for one handshake.
    pub fn evaluate(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> (TrustDecision, Option<rustls::Error>) {
        match self
            .delegate
            .verify_server_cert(end_entity, intermediates, server_name, &[], now)
        {
            Ok(_) => (TrustDecision::TrustedValid, None),
            Err(err) => {
                let chain_has_override = std::iter::once(end_entity)
                    .chain(intermediates)
                    .any(|cert| has_override_markers(cert));
                if chain_has_override {
                    (TrustDecision::TrustedOverride, None)
                } else if self.enforce {
                    (TrustDecision::UntrustedRejected, Some(err))
                } else {
                    (TrustDecision::UntrustedAccepted, Some(err))
                }
            }
        }
    }

    fn log_decision(
        decision: TrustDecision,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
    ) {
        for cert in std::iter::once(end_entity).chain(intermediates) {
            let Ok((_, parsed)) = x509_parser::parse_x509_certificate(cert) else {
                warn!(decision = decision.as_str(), "certificate not parseable");
                continue;
            };
            let subject = parsed.subject().to_string();
            let issuer = parsed.issuer().to_string();
            let not_after = parsed.validity().not_after.to_string();
            match decision {
                TrustDecision::TrustedValid | TrustDecision::TrustedOverride => {
                    info!(decision = decision.as_str(), %subject, %issuer, %not_after, "certificate");
                }
                TrustDecision::UntrustedAccepted => {
                    warn!(decision = decision.as_str(), %subject, %issuer, %not_after, "certificate");
                }
                TrustDecision::UntrustedRejected => {
                    error!(decision = decision.as_str(), %subject, %issuer, %not_after, "certificate");
                }
            }
        }
    }
}

impl ServerCertVerifier for ChainEvaluator {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let (decision, failure) = self.evaluate(end_entity, intermediates, server_name, now);
        Self::log_decision(decision, end_entity, intermediates);
        match decision {
            TrustDecision::TrustedValid
            | TrustDecision::TrustedOverride
            | TrustDecision::UntrustedAccepted => Ok(ServerCertVerified::assertion()),
            TrustDecision::UntrustedRejected => {
                Err(failure.unwrap_or(rustls::Error::InvalidCertificate(
                    rustls::CertificateError::ApplicationVerificationFailure,
                )))
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.delegate.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.delegate.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.delegate.supported_verify_schemes()
    }
}

/// True when the certificate subject carries every override marker.
fn has_override_markers(cert: &CertificateDer<'_>) -> bool {
    let Ok((_, parsed)) = x509_parser::parse_x509_certificate(cert) else {
        return false;
    };
    let subject = parsed.subject().to_string();
    OVERRIDE_MARKERS
        .iter()
        .all(|marker| subject.contains(marker))
}
