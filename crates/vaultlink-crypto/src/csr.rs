//! Certificate signing request generation.
//!
//! The broker never sees a CA: it generates an RSA key, hands the operator a
//! PEM CSR for their own CA and keeps the key as a [`PendingKey`] until the
//! signed certificate is installed.

use std::net::IpAddr;

use rand::rngs::OsRng;
use rcgen::{CertificateParams, CustomExtension, DistinguishedName, DnType, KeyPair, SanType};
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::pkcs8::EncodePrivateKey;
use sha1::{Digest, Sha1};

use crate::error::CryptoError;
use crate::material::PendingKey;
use crate::role::CertificateRole;
use crate::x509::pem_encode;

pub const DEFAULT_KEY_SIZE: usize = 2048;
const MIN_KEY_SIZE: usize = 2048;
const MAX_KEY_SIZE: usize = 8192;

const OID_BASIC_CONSTRAINTS: &[u64] = &[2, 5, 29, 19];
const OID_KEY_USAGE: &[u64] = &[2, 5, 29, 15];
const OID_EXT_KEY_USAGE: &[u64] = &[2, 5, 29, 37];
const OID_SUBJECT_KEY_ID: &[u64] = &[2, 5, 29, 14];

/// Inputs for [`generate_csr`].
#[derive(Debug, Clone)]
pub struct CsrOptions {
    pub role: CertificateRole,
    pub key_size_bits: usize,
    /// Distinguished name such as `CN=host,O=Example`. Derived from the
    /// instance id and role when absent.
    pub subject: Option<String>,
    /// Comma-separated DNS names.
    pub san_dns: Option<String>,
    /// Comma-separated IP addresses.
    pub san_ip: Option<String>,
}

impl CsrOptions {
    pub const fn new(role: CertificateRole) -> Self {
        Self {
            role,
            key_size_bits: DEFAULT_KEY_SIZE,
            subject: None,
            san_dns: None,
            san_ip: None,
        }
    }
}

/// A CSR and the key that must later be paired with its certificate.
#[derive(Debug, Clone)]
pub struct GeneratedCsr {
    pub role: CertificateRole,
    pub subject: String,
    /// PEM text with CRLF line breaks.
    pub pem: String,
    pub pending_key: PendingKey,
}

/// Generate an RSA key and a CSR for `options.role`.
///
/// All inputs are validated before the key is generated.
pub fn generate_csr(options: &CsrOptions, instance_id: &str) -> Result<GeneratedCsr, CryptoError> {
    if !(MIN_KEY_SIZE..=MAX_KEY_SIZE).contains(&options.key_size_bits) {
        return Err(CryptoError::InvalidKeySize(options.key_size_bits));
    }

    let subject = options
        .subject
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map_or_else(|| options.role.default_subject(instance_id), ToString::to_string);
    let distinguished_name = parse_distinguished_name(&subject)?;

    let mut sans = parse_san_dns(options.san_dns.as_deref())?;
    sans.extend(parse_san_ip(options.san_ip.as_deref())?);

    let rsa_key = RsaPrivateKey::new(&mut OsRng, options.key_size_bits)
        .map_err(|e| CryptoError::Generation(format!("RSA key generation failed: {e}")))?;
    let pkcs8 = rsa_key
        .to_pkcs8_der()
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let key_pair = KeyPair::try_from(pkcs8.as_bytes())
        .map_err(|e| CryptoError::Generation(e.to_string()))?;
    let public_der = rsa_key
        .to_public_key()
        .to_pkcs1_der()
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name;
    params.subject_alt_names = sans;
    params.custom_extensions = role_extensions(options.role, public_der.as_bytes());

    let csr = params
        .serialize_request(&key_pair)
        .map_err(|e| CryptoError::Generation(e.to_string()))?;

    tracing::info!(role = options.role.as_str(), %subject, bits = options.key_size_bits, "generated CSR");

    Ok(GeneratedCsr {
        role: options.role,
        subject,
        pem: pem_encode("CERTIFICATE REQUEST", &csr.der().to_vec(), "\r\n"),
        pending_key: PendingKey::from_rsa(&rsa_key)?,
    })
}

/// Basic constraints (end entity), key usage (critical), role EKU and SKI.
fn role_extensions(role: CertificateRole, rsa_public_pkcs1: &[u8]) -> Vec<CustomExtension> {
    let basic_constraints = CustomExtension::from_oid_content(OID_BASIC_CONSTRAINTS, vec![0x30, 0x00]);

    // digitalSignature | keyEncipherment | keyAgreement
    let mut key_usage = CustomExtension::from_oid_content(OID_KEY_USAGE, vec![0x03, 0x02, 0x03, 0xA8]);
    key_usage.set_criticality(true);

    let purpose = match role {
        CertificateRole::Client => 0x02,
        CertificateRole::Server => 0x01,
    };
    let eku = CustomExtension::from_oid_content(
        OID_EXT_KEY_USAGE,
        vec![
            0x30, 0x0A, 0x06, 0x08, 0x2B, 0x06, 0x01, 0x05, 0x05, 0x07, 0x03, purpose,
        ],
    );

    let mut ski_content = vec![0x04, 0x14];
    ski_content.extend_from_slice(&Sha1::digest(rsa_public_pkcs1));
    let ski = CustomExtension::from_oid_content(OID_SUBJECT_KEY_ID, ski_content);

    vec![basic_constraints, key_usage, eku, ski]
}

/// Parse `CN=..,O=..` into a distinguished name.
fn parse_distinguished_name(subject: &str) -> Result<DistinguishedName, CryptoError> {
    let mut dn = DistinguishedName::new();
    for part in subject.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| CryptoError::InvalidSubject(format!("'{part}' is not KEY=VALUE")))?;
        let value = value.trim().trim_matches('"').trim();
        if value.is_empty() {
            return Err(CryptoError::InvalidSubject(format!("empty value for {}", key.trim())));
        }
        let ty = match key.trim().to_ascii_uppercase().as_str() {
            "CN" => DnType::CommonName,
            "O" => DnType::OrganizationName,
            "OU" => DnType::OrganizationalUnitName,
            "C" => DnType::CountryName,
            "ST" | "S" => DnType::StateOrProvinceName,
            "L" => DnType::LocalityName,
            other => {
                return Err(CryptoError::InvalidSubject(format!(
                    "unsupported attribute '{other}'"
                )));
            }
        };
        dn.push(ty, value.to_string());
    }
    Ok(dn)
}

fn split_list(list: Option<&str>) -> impl Iterator<Item = &str> {
    list.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_san_ip(list: Option<&str>) -> Result<Vec<SanType>, CryptoError> {
    split_list(list)
        .map(|entry| {
            entry
                .parse::<IpAddr>()
                .map(SanType::IpAddress)
                .map_err(|_| CryptoError::InvalidSanIp(entry.to_string()))
        })
        .collect()
}

fn parse_san_dns(list: Option<&str>) -> Result<Vec<SanType>, CryptoError> {
    split_list(list)
        .map(|entry| {
            let valid = entry
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '*'));
            if !valid {
                return Err(CryptoError::InvalidSanDns(entry.to_string()));
            }
            rcgen::string::Ia5String::try_from(entry.to_string())
                .map(SanType::DnsName)
                .map_err(|_| CryptoError::InvalidSanDns(entry.to_string()))
        })
        .collect()
}
