//! TLS contexts and trusted transport.
//!
//! Key material and trust material are PEM files, each independently
//! configurable; the trust side defaults to the key-side bundle so small
//! deployments can ship one self-contained file. Server and client configs
//! come out of the same loaded material: the server presents the chain, the
//! client installs the [`verify::ChainEvaluator`] so outbound handshakes go
//! through the platform's trust policy instead of bare webpki.
//!
//! Streams returned by [`TlsTransport::accept`] and
//! [`TlsTransport::connect`] are decorated (see [`stream`]) so connection
//! handlers stay independent of the underlying TLS types and legacy clients
//! keep their single-write header framing.

mod stream;
mod verify;

pub use stream::{DeferredHeaderStream, PassThroughStream};
pub use verify::{ChainEvaluator, TrustDecision};

use crate::{config::TlsConfig, error::Error};
use base64ct::{Base64, Encoding};
use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer, ServerName},
    ClientConfig, RootCertStore, ServerConfig,
};
use rustls_pemfile::{certs, ec_private_keys, pkcs8_private_keys};
use std::{fs::File, io::BufReader, path::Path, sync::Arc};
use tokio::net::TcpStream;
use tokio_rustls::{client, server, TlsAcceptor, TlsConnector};
use tracing::debug;

/// Decorated inbound TLS stream.
pub type ServerStream = PassThroughStream<DeferredHeaderStream<server::TlsStream<TcpStream>>>;

/// Decorated outbound TLS stream.
pub type ClientStream = PassThroughStream<DeferredHeaderStream<client::TlsStream<TcpStream>>>;

/// TLS contexts for one service: an accepting side presenting the
/// configured chain and a connecting side enforcing the trust policy.
pub struct TlsTransport {
    server_config: Arc<ServerConfig>,
    client_config: Arc<ClientConfig>,
}

impl TlsTransport {
    /// Load key and trust material and build both contexts.
    ///
    /// # Errors
    /// Fails fast on unreadable or empty PEM files and on key material
    /// rustls cannot use, so a misconfigured service dies at startup rather
    /// than on its first connection.
    pub fn new(config: &TlsConfig) -> Result<Self, Error> {
        let cert_chain = load_cert_chain(&config.cert)?;
        let key = load_private_key(&config.key)?;
        let roots = Arc::new(load_root_store(config.trust_bundle())?);

        let server_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(cert_chain.clone(), key.clone_key())
            .map_err(|err| Error::Configuration(format!("cannot build server context: {err}")))?;

        let evaluator = ChainEvaluator::new(roots, config.enforce_certificates)?;
        let client_config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(evaluator))
            .with_client_auth_cert(cert_chain, key)
            .map_err(|err| Error::Configuration(format!("cannot build client context: {err}")))?;

        debug!(
            cert = %config.cert.display(),
            trust = %config.trust_bundle().display(),
            enforce = config.enforce_certificates,
            "TLS material loaded"
        );
        Ok(Self {
            server_config: Arc::new(server_config),
            client_config: Arc::new(client_config),
        })
    }

    #[must_use]
    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.server_config.clone())
    }

    #[must_use]
    pub fn connector(&self) -> TlsConnector {
        TlsConnector::from(self.client_config.clone())
    }

    /// Accept an inbound connection: handshake, then decorate.
    ///
    /// # Errors
    /// Propagates handshake I/O failures.
    pub async fn accept(&self, stream: TcpStream) -> Result<ServerStream, Error> {
        let tls = self.acceptor().accept(stream).await?;
        Ok(PassThroughStream::new(DeferredHeaderStream::new(tls)))
    }

    /// Connect outbound to `domain`: handshake through the trust policy,
    /// then decorate.
    ///
    /// # Errors
    /// Propagates handshake I/O failures; an invalid `domain` is a
    /// configuration error.
    pub async fn connect(&self, domain: &str, stream: TcpStream) -> Result<ClientStream, Error> {
        let name = ServerName::try_from(domain.to_string())
            .map_err(|_| Error::Configuration(format!("invalid server name: {domain}")))?;
        let tls = self.connector().connect(name, stream).await?;
        Ok(PassThroughStream::new(DeferredHeaderStream::new(tls)))
    }
}

/// Build an outbound HTTPS client that accepts any server certificate.
///
/// Never a default: only tooling that talks to peers with throwaway
/// certificates should reach for this, and the name makes every call site
/// say so.
///
/// # Errors
/// Fails when the client cannot be constructed.
pub fn danger_trust_all_client() -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|err| Error::Configuration(format!("cannot build trust-all client: {err}")))
}

/// Render a DER certificate as PEM, the form exchanged with peers and
/// pasted into trust bundles.
#[must_use]
pub fn certificate_to_pem(cert: &CertificateDer<'_>) -> String {
    let encoded = Base64::encode_string(cert.as_ref());
    let mut pem = String::with_capacity(encoded.len() + 64);
    pem.push_str("-----BEGIN CERTIFICATE-----\n");
    let mut rest = encoded.as_str();
    while !rest.is_empty() {
        let split = rest.len().min(64);
        pem.push_str(&rest[..split]);
        pem.push('\n');
        rest = &rest[split..];
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

/// Parse the first certificate out of a PEM document.
///
/// # Errors
/// Returns [`Error::MalformedSecret`] when the text contains no parseable
/// certificate.
pub fn certificate_from_pem(pem: &str) -> Result<CertificateDer<'static>, Error> {
    let mut reader = BufReader::new(pem.as_bytes());
    let cert = certs(&mut reader)
        .next()
        .transpose()
        .map_err(|err| Error::MalformedSecret(format!("not a certificate: {err}")))?
        .ok_or_else(|| Error::MalformedSecret("no certificate in input".to_string()));
    cert
}

fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    let file = File::open(path).map_err(|err| {
        Error::Configuration(format!("cannot open certificate {}: {err}", path.display()))
    })?;
    let mut reader = BufReader::new(file);
    let certs = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| {
            Error::Configuration(format!("cannot read certificate {}: {err}", path.display()))
        })?;
    if certs.is_empty() {
        return Err(Error::Configuration(format!(
            "certificate is empty: {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, Error> {
    let file = File::open(path).map_err(|err| {
        Error::Configuration(format!("cannot open key {}: {err}", path.display()))
    })?;
    let mut reader = BufReader::new(file);
    let mut keys = pkcs8_private_keys(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| {
            Error::Configuration(format!("cannot read PKCS#8 key {}: {err}", path.display()))
        })?;
    if let Some(key) = keys.pop() {
        return Ok(PrivateKeyDer::Pkcs8(key));
    }

    let file = File::open(path).map_err(|err| {
        Error::Configuration(format!("cannot open key {}: {err}", path.display()))
    })?;
    let mut reader = BufReader::new(file);
    let mut keys = ec_private_keys(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| {
            Error::Configuration(format!("cannot read SEC1 key {}: {err}", path.display()))
        })?;
    if let Some(key) = keys.pop() {
        return Ok(PrivateKeyDer::Sec1(key));
    }

    Err(Error::Configuration(format!(
        "no private key found in {}",
        path.display()
    )))
}

fn load_root_store(path: &Path) -> Result<RootCertStore, Error> {
    let file = File::open(path).map_err(|err| {
        Error::Configuration(format!("cannot open CA bundle {}: {err}", path.display()))
    })?;
    let mut reader = BufReader::new(file);
    let certs = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| {
            Error::Configuration(format!("cannot read CA bundle {}: {err}", path.display()))
        })?;
    if certs.is_empty() {
        return Err(Error::Configuration(format!(
            "CA bundle is empty: {}",
            path.display()
        )));
    }
    let mut store = RootCertStore::empty();
    let (added, _) = store.add_parsable_certificates(certs);
    if added == 0 {
        return Err(Error::Configuration(format!(
            "no valid CA certificates in {}",
            path.display()
        )));
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn missing_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("trustgate-tls-{label}-{}", Uuid::new_v4()))
    }

    #[test]
    fn loaders_fail_on_missing_files() {
        assert!(matches!(
            load_private_key(&missing_path("key")),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            load_root_store(&missing_path("ca")),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            load_cert_chain(&missing_path("cert")),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn transport_builds_from_valid_material() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let dir = std::env::temp_dir().join(format!("trustgate-tls-valid-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let cert_path = dir.join("tls.crt");
        let key_path = dir.join("tls.key");

        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        std::fs::write(&cert_path, cert.cert.pem()).unwrap();
        std::fs::write(&key_path, cert.key_pair.serialize_pem()).unwrap();

        let config = crate::config::TlsConfig::new(cert_path, key_path);
        assert!(TlsTransport::new(&config).is_ok());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn pem_roundtrip() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let der = cert.cert.der().clone();

        let pem = certificate_to_pem(&der);
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(pem.ends_with("-----END CERTIFICATE-----\n"));
        assert!(pem.lines().all(|line| line.len() <= 64));

        let parsed = certificate_from_pem(&pem).unwrap();
        assert_eq!(parsed, der);

        assert!(certificate_from_pem("no certificate here").is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn empty_trust_bundle_is_rejected() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let dir = std::env::temp_dir().join(format!("trustgate-tls-empty-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let cert_path = dir.join("tls.crt");
        let key_path = dir.join("tls.key");
        let empty_ca = dir.join("ca.pem");

        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        std::fs::write(&cert_path, cert.cert.pem()).unwrap();
        std::fs::write(&key_path, cert.key_pair.serialize_pem()).unwrap();
        std::fs::write(&empty_ca, "").unwrap();

        let config = crate::config::TlsConfig {
            trust: Some(empty_ca),
            ..crate::config::TlsConfig::new(cert_path, key_path)
        };
        assert!(matches!(
            TlsTransport::new(&config),
            Err(Error::Configuration(_))
        ));
    }
}
