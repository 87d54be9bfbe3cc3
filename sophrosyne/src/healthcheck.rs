//! The `healthcheck` subcommand: dial `/healthz/ready` over TLS and map the
//! response onto the exit-code contract (§6). Deliberately skips certificate
//! verification — this tool is meant to run alongside the server it's
//! checking, which in development dials its own self-signed cert (§4.8),
//! and there is no trust-store crate in this workspace to validate a real one.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::Request;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};

#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}

/// Dial `addr`, GET `/healthz/ready`, and return the exit code §6 prescribes:
/// 0 healthy, 1 transport error, 2 connection refused, 3 non-OK status.
pub async fn run(addr: &str) -> i32 {
    let tcp = match tokio::net::TcpStream::connect(addr).await {
        Ok(stream) => stream,
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            eprintln!("connection refused: {addr}");
            return 2;
        }
        Err(e) => {
            eprintln!("transport error dialing {addr}: {e}");
            return 1;
        }
    };

    let tls_config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));

    let host = addr.split(':').next().unwrap_or("localhost").to_string();
    let server_name = match ServerName::try_from(host.clone()) {
        Ok(name) => name,
        Err(e) => {
            eprintln!("invalid server name {host}: {e}");
            return 1;
        }
    };

    let tls_stream = match connector.connect(server_name, tcp).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("TLS handshake failed: {e}");
            return 1;
        }
    };

    let io = hyper_util::rt::TokioIo::new(tls_stream);
    let (mut sender, connection) = match hyper::client::conn::http1::handshake(io).await {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("HTTP handshake failed: {e}");
            return 1;
        }
    };
    tokio::spawn(async move {
        let _ = connection.await;
    });

    let request = Request::builder()
        .method("GET")
        .uri("/healthz/ready")
        .header("host", host)
        .body(Empty::<Bytes>::new())
        .expect("static request always builds");

    let response = match sender.send_request(request).await {
        Ok(resp) => resp,
        Err(e) => {
            eprintln!("request failed: {e}");
            return 1;
        }
    };

    let status = response.status();
    let _ = response.into_body().collect().await;

    if status.is_success() {
        0
    } else {
        eprintln!("health endpoint returned {status}");
        3
    }
}
