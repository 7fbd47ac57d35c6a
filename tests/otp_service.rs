//! Exercises the OTP verifier against a local HTTP stand-in.

use anyhow::Result;
use secrecy::SecretString;
use std::net::SocketAddr;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    task::JoinHandle,
};
use trustgate::{config::OtpConfig, error::Error, otp::OtpVerifier};

fn content_length(request: &str) -> usize {
    request
        .lines()
        .find_map(|line| {
            let lower = line.to_ascii_lowercase();
            lower
                .strip_prefix("content-length:")
                .map(|value| value.trim().parse().unwrap_or(0))
        })
        .unwrap_or(0)
}

/// Accept one connection, answer with `status_line` and hand back the raw
/// request for assertions.
async fn spawn_service(status_line: &'static str) -> (SocketAddr, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut buf = vec![0u8; 8192];
        let mut request = String::new();
        loop {
            let read = socket.read(&mut buf).await.expect("read");
            if read == 0 {
                break;
            }
            request.push_str(&String::from_utf8_lossy(&buf[..read]));
            if let Some(headers_end) = request.find("\r\n\r\n") {
                let body_len = request.len() - headers_end - 4;
                if body_len >= content_length(&request) {
                    break;
                }
            }
        }
        let response = format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
        socket.write_all(response.as_bytes()).await.expect("write");
        socket.flush().await.expect("flush");
        request
    });
    (addr, handle)
}

fn service_config(addr: SocketAddr) -> OtpConfig {
    OtpConfig {
        active: true,
        url: format!("http://{addr}/token"),
        client_id_for_password: Some("cli-password".to_string()),
        client_secret_for_password: Some(SecretString::from("s3cret-password".to_string())),
        client_id_for_passcode: Some("cli-passcode".to_string()),
        client_secret_for_passcode: Some(SecretString::from("s3cret-passcode".to_string())),
        ..OtpConfig::default()
    }
}

#[tokio::test]
async fn passcode_mode_posts_the_totp_field() -> Result<()> {
    let (addr, handle) = spawn_service("HTTP/1.1 200 OK").await;
    let verifier = OtpVerifier::new(service_config(addr))?;

    let accepted = verifier.authenticate("walter", "123456", true).await?;
    assert!(accepted);

    let request = handle.await?;
    assert!(request.starts_with("POST /token"));
    assert!(request.contains("username=walter"));
    assert!(request.contains("totp=123456"));
    assert!(request.contains("client_id=cli-passcode"));
    assert!(request.contains("client_secret=s3cret-passcode"));
    assert!(request.contains("grant_type=password"));
    assert!(!request.contains("password="));
    Ok(())
}

#[tokio::test]
async fn password_mode_posts_the_password_field_url_encoded() {
    let (addr, handle) = spawn_service("HTTP/1.1 200 OK").await;
    let verifier = OtpVerifier::new(service_config(addr)).expect("verifier");

    let accepted = verifier
        .authenticate("walter", "p@ss word", false)
        .await
        .expect("authenticate");
    assert!(accepted);

    let request = handle.await.expect("request");
    assert!(request.contains("client_id=cli-password"));
    assert!(request.contains("password=p%40ss"));
    assert!(!request.contains("totp="));
}

#[tokio::test]
async fn unexpected_status_is_a_rejection_not_an_error() {
    let (addr, _handle) = spawn_service("HTTP/1.1 401 Unauthorized").await;
    let verifier = OtpVerifier::new(service_config(addr)).expect("verifier");

    let accepted = verifier
        .authenticate("walter", "123456", true)
        .await
        .expect("authenticate");
    assert!(!accepted);
}

#[tokio::test]
async fn configured_expected_status_wins() -> Result<()> {
    let (addr, _handle) = spawn_service("HTTP/1.1 204 No Content").await;
    let config = OtpConfig {
        expected_status: 204,
        ..service_config(addr)
    };
    let verifier = OtpVerifier::new(config)?;

    let accepted = verifier.authenticate("walter", "12345678", true).await?;
    assert!(accepted);
    Ok(())
}

#[tokio::test]
async fn unreachable_service_is_unavailable() {
    // Grab a free port, then close the listener so nothing answers.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let config = OtpConfig {
        connect_timeout_secs: 1,
        request_timeout_secs: 1,
        ..service_config(addr)
    };
    let verifier = OtpVerifier::new(config).expect("verifier");

    let result = verifier.authenticate("walter", "123456", true).await;
    assert!(matches!(result, Err(Error::Unavailable(_))));
}
