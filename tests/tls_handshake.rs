//! Full handshakes through the transport, covering the trust override, the
//! enforcing and non-enforcing rejection paths, and data flow through the
//! decorated streams.

use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};
use std::path::PathBuf;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use trustgate::{config::TlsConfig, tls::TlsTransport};
use uuid::Uuid;

struct Ca {
    cert: rcgen::Certificate,
    key: KeyPair,
}

fn make_ca(name: &str) -> Ca {
    let key = KeyPair::generate().expect("ca key");
    let mut params = CertificateParams::new(Vec::new()).expect("ca params");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
        .distinguished_name
        .push(DnType::CommonName, name.to_string());
    let cert = params.self_signed(&key).expect("ca cert");
    Ca { cert, key }
}

/// A leaf signed by `ca`, optionally carrying the data-proxy subject.
fn make_leaf(ca: &Ca, with_markers: bool) -> (String, String) {
    let key = KeyPair::generate().expect("leaf key");
    let mut params = CertificateParams::new(vec!["localhost".to_string()]).expect("leaf params");
    let mut dn = DistinguishedName::new();
    if with_markers {
        dn.push(DnType::OrganizationName, "ECMWF");
        dn.push(DnType::OrganizationalUnitName, "NSS");
        dn.push(DnType::CommonName, "ecproxy");
    } else {
        dn.push(DnType::OrganizationName, "Example");
        dn.push(DnType::CommonName, "localhost");
    }
    params.distinguished_name = dn;
    let cert = params.signed_by(&key, &ca.cert, &ca.key).expect("leaf");
    (cert.pem(), key.serialize_pem())
}

fn scratch_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("trustgate-handshake-{label}-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("mkdir");
    dir
}

/// Make the trust decision logs visible when running with `RUST_LOG` set.
fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

struct Setup {
    server: TlsTransport,
    client: TlsTransport,
}

/// Server presents a leaf signed by `server_ca`; the client trusts
/// `trusted_ca` and enforces (or not) certificate checks.
fn build_setup(
    label: &str,
    server_ca: &Ca,
    trusted_ca: &Ca,
    server_has_markers: bool,
    enforce: bool,
) -> Setup {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let dir = scratch_dir(label);

    let (server_cert, server_key) = make_leaf(server_ca, server_has_markers);
    let server_cert_path = dir.join("server.crt");
    let server_key_path = dir.join("server.key");
    std::fs::write(&server_cert_path, server_cert).expect("server cert");
    std::fs::write(&server_key_path, server_key).expect("server key");

    let (client_cert, client_key) = make_leaf(trusted_ca, false);
    let client_cert_path = dir.join("client.crt");
    let client_key_path = dir.join("client.key");
    std::fs::write(&client_cert_path, client_cert).expect("client cert");
    std::fs::write(&client_key_path, client_key).expect("client key");

    let trust_path = dir.join("trusted.pem");
    std::fs::write(&trust_path, trusted_ca.cert.pem()).expect("trust bundle");

    let server = TlsTransport::new(&TlsConfig::new(server_cert_path, server_key_path))
        .expect("server transport");
    let client = TlsTransport::new(&TlsConfig {
        trust: Some(trust_path),
        enforce_certificates: enforce,
        ..TlsConfig::new(client_cert_path, client_key_path)
    })
    .expect("client transport");

    Setup { server, client }
}

async fn run_handshake(setup: Setup) -> Result<(), trustgate::Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server = setup.server;
    let server_task = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept tcp");
        let mut stream = match server.accept(tcp).await {
            Ok(stream) => stream,
            Err(_) => return, // handshake refused by the peer
        };
        let mut buf = [0u8; 4];
        if stream.read_exact(&mut buf).await.is_ok() {
            assert_eq!(&buf, b"ping");
            stream.write_all(b"pong").await.expect("write pong");
            stream.flush().await.expect("flush");
        }
    });

    let tcp = TcpStream::connect(addr).await.expect("connect tcp");
    let mut stream = setup.client.connect("localhost", tcp).await?;
    stream.write_all(b"ping").await?;
    stream.flush().await?;
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"pong");

    server_task.await.expect("server task");
    Ok(())
}

#[tokio::test]
async fn valid_chain_handshakes() {
    init_logs();
    let ca = make_ca("shared-ca");
    let setup = build_setup("valid", &ca, &ca, false, true);
    run_handshake(setup).await.expect("handshake");
}

#[tokio::test]
async fn override_markers_rescue_an_untrusted_chain() {
    init_logs();
    let rogue = make_ca("rogue-ca");
    let trusted = make_ca("trusted-ca");
    let setup = build_setup("override", &rogue, &trusted, true, true);
    run_handshake(setup).await.expect("handshake");
}

#[tokio::test]
async fn untrusted_chain_without_markers_is_refused() {
    init_logs();
    let rogue = make_ca("rogue-ca");
    let trusted = make_ca("trusted-ca");
    let setup = build_setup("refused", &rogue, &trusted, false, true);
    assert!(run_handshake(setup).await.is_err());
}

#[tokio::test]
async fn non_enforcing_mode_accepts_an_untrusted_chain() {
    init_logs();
    let rogue = make_ca("rogue-ca");
    let trusted = make_ca("trusted-ca");
    let setup = build_setup("lenient", &rogue, &trusted, false, false);
    run_handshake(setup).await.expect("handshake");
}

#[tokio::test]
async fn deferred_agent_header_flows_through_a_real_connection() {
    init_logs();
    let ca = make_ca("shared-ca");
    let setup = build_setup("header", &ca, &ca, false, true);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server = setup.server;
    let header = b"GET /check HTTP/1.0\r\nAgent-Name: ectools\r\n\r\n";
    let payload = b"payload-bytes";
    let expected_len = header.len() + payload.len();

    let server_task = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept tcp");
        let mut stream = server.accept(tcp).await.expect("accept tls");
        let mut buf = vec![0u8; expected_len];
        stream.read_exact(&mut buf).await.expect("read");
        buf
    });

    let tcp = TcpStream::connect(addr).await.expect("connect tcp");
    let mut stream = setup
        .client
        .connect("localhost", tcp)
        .await
        .expect("connect tls");
    // The first write is held back...
    stream.write_all(header).await.expect("write header");
    // ...and rides in front of the second one.
    stream.write_all(payload).await.expect("write payload");
    stream.flush().await.expect("flush");

    let received = server_task.await.expect("server task");
    let mut expected = header.to_vec();
    expected.extend_from_slice(payload);
    assert_eq!(received, expected);
}
