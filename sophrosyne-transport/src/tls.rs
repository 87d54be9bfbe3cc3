//! TLS 1.3-minimum configuration: either load a PKCS#8 key/certificate pair
//! from disk, or — in development — generate a self-signed one in memory.
//!
//! `rcgen` isn't in the teacher's dependency table; it's imported here the
//! way the rest of the example pack (`agentgateway`, `hyperspot`) reaches for
//! it to cover the same need.

use std::io::BufReader;
use std::sync::Arc;

use rcgen::{CertificateParams, DistinguishedName, ExtendedKeyUsagePurpose, KeyPair, SanType};
use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio_rustls::rustls;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

#[derive(Debug, Clone, Copy)]
pub enum DevKeyType {
    Rsa,
    EcdsaP256,
    EcdsaP384,
    Ed25519,
}

impl DevKeyType {
    /// Parse `security.tls.keyType`. Unrecognized values fall back to
    /// ECDSA P-256, this repo's default.
    pub fn parse(s: &str) -> Self {
        match s {
            "rsa" | "rsa-4096" => DevKeyType::Rsa,
            "ecdsa-p384" => DevKeyType::EcdsaP384,
            "ed25519" => DevKeyType::Ed25519,
            _ => DevKeyType::EcdsaP256,
        }
    }
}

/// Generate a self-signed certificate/key pair valid for 365 days, scoped to
/// `hosts` (IP literals become IP SANs, everything else a DNS SAN).
pub fn generate_dev_cert(
    key_type: DevKeyType,
    hosts: &[String],
) -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>), String> {
    let key_pair = match key_type {
        DevKeyType::Rsa => KeyPair::generate_for(&rcgen::PKCS_RSA_SHA256),
        DevKeyType::EcdsaP256 => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256),
        DevKeyType::EcdsaP384 => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384),
        DevKeyType::Ed25519 => KeyPair::generate_for(&rcgen::PKCS_ED25519),
    }
    .map_err(|e| e.to_string())?;

    let mut params = CertificateParams::new(hosts.to_vec()).map_err(|e| e.to_string())?;
    params.distinguished_name = DistinguishedName::new();
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.subject_alt_names = hosts
        .iter()
        .map(|host| {
            if let Ok(ip) = host.parse::<std::net::IpAddr>() {
                SanType::IpAddress(ip)
            } else {
                SanType::DnsName(host.clone().try_into().expect("valid DNS name"))
            }
        })
        .collect();

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(365);

    let cert = params.self_signed(&key_pair).map_err(|e| e.to_string())?;

    let cert_der = cert.der().clone();
    let key_der = PrivateKeyDer::Pkcs8(key_pair.serialize_der().into());
    Ok((cert_der, key_der))
}

/// Load a PKCS#8 key/certificate pair from disk.
pub fn load_cert_from_disk(
    cert_path: &str,
    key_path: &str,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), String> {
    let cert_file = std::fs::File::open(cert_path).map_err(|e| e.to_string())?;
    let mut cert_reader = BufReader::new(cert_file);
    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| e.to_string())?;

    let key_file = std::fs::File::open(key_path).map_err(|e| e.to_string())?;
    let mut key_reader = BufReader::new(key_file);
    let mut keys: Vec<_> = pkcs8_private_keys(&mut key_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| e.to_string())?;
    let key = keys.pop().ok_or_else(|| "no PKCS#8 private key found".to_string())?;

    Ok((cert_chain, PrivateKeyDer::Pkcs8(key)))
}

/// Build a TLS 1.3-minimum `rustls::ServerConfig` for a single certificate
/// chain/key pair, ALPN-advertising both HTTP/1.1 and h2 (gRPC requires h2).
pub fn build_server_config(
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<rustls::ServerConfig>, String> {
    let mut config = rustls::ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| e.to_string())?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_cert_for_each_supported_key_type() {
        for key_type in [
            DevKeyType::EcdsaP256,
            DevKeyType::EcdsaP384,
            DevKeyType::Ed25519,
        ] {
            let result = generate_dev_cert(key_type, &["localhost".to_string()]);
            assert!(result.is_ok());
        }
    }

    #[test]
    fn ip_literal_host_is_accepted() {
        let result = generate_dev_cert(DevKeyType::EcdsaP256, &["127.0.0.1".to_string()]);
        assert!(result.is_ok());
    }

    #[test]
    fn unrecognized_key_type_falls_back_to_ecdsa_p256() {
        assert!(matches!(DevKeyType::parse("bogus"), DevKeyType::EcdsaP256));
    }
}
