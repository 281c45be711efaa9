//! X.509 certificate inspection.
//!
//! Certificates are kept as DER with the handful of fields the broker reports
//! (thumbprint, subject, issuer, validity) extracted once at parse time.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rsa::RsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use x509_parser::pem::Pem;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::CryptoError;
use crate::role::CertificateRole;

/// Summary of an installed or trusted certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    /// Uppercase hex SHA-1 of the DER encoding.
    pub thumbprint: String,
    pub issued_by: String,
    pub subject: String,
    /// Start of the validity window (Unix timestamp).
    pub not_before: i64,
    /// End of the validity window (Unix timestamp).
    pub not_after: i64,
    /// PEM encoding of the certificate (public part only).
    pub base64_certificate_data: String,
}

/// A parsed X.509 certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCertificate {
    der: Vec<u8>,
    thumbprint: String,
    subject: String,
    issuer: String,
    not_before: i64,
    not_after: i64,
}

impl ParsedCertificate {
    /// Parse a DER-encoded certificate.
    pub fn from_der(der: &[u8]) -> Result<Self, CryptoError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?;
        let validity = cert.validity();
        Ok(Self {
            der: der.to_vec(),
            thumbprint: thumbprint_of(der),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            not_before: validity.not_before.timestamp(),
            not_after: validity.not_after.timestamp(),
        })
    }

    /// Parse the first `CERTIFICATE` block of a PEM document, or a bare
    /// base64 DER string as found in federation metadata and in storage.
    pub fn from_text(text: &str) -> Result<Self, CryptoError> {
        let trimmed = text.trim();
        if trimmed.contains("-----BEGIN") {
            let der = first_pem_block(trimmed.as_bytes(), "CERTIFICATE")?.ok_or_else(|| {
                CryptoError::InvalidCertificate("no CERTIFICATE block in PEM data".into())
            })?;
            return Self::from_der(&der);
        }
        let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
        let der = STANDARD
            .decode(compact)
            .map_err(|e| CryptoError::InvalidCertificate(format!("invalid base64: {e}")))?;
        Self::from_der(&der)
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub const fn not_before(&self) -> i64 {
        self.not_before
    }

    pub const fn not_after(&self) -> i64 {
        self.not_after
    }

    /// Whether `now` falls inside the validity window.
    pub const fn is_valid_at(&self, now: i64) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    /// Whether the certificate's extended key usage admits `role`.
    pub fn allows_role(&self, role: CertificateRole) -> Result<bool, CryptoError> {
        let (_, cert) = X509Certificate::from_der(&self.der)
            .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?;
        let eku = cert
            .extended_key_usage()
            .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?;
        Ok(eku.is_some_and(|ext| {
            let usage = ext.value;
            usage.any
                || match role {
                    CertificateRole::Client => usage.client_auth,
                    CertificateRole::Server => usage.server_auth,
                }
        }))
    }

    /// RSA public key carried in the subject public key info.
    pub fn rsa_public_key(&self) -> Result<RsaPublicKey, CryptoError> {
        let (_, cert) = X509Certificate::from_der(&self.der)
            .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?;
        RsaPublicKey::from_public_key_der(cert.public_key().raw).map_err(|e| {
            CryptoError::InvalidCertificate(format!("certificate does not carry an RSA key: {e}"))
        })
    }

    /// Standard base64 of the DER encoding (no line breaks).
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.der)
    }

    pub fn to_pem(&self) -> String {
        pem_encode("CERTIFICATE", &self.der, "\n")
    }

    pub fn info(&self) -> CertificateInfo {
        CertificateInfo {
            thumbprint: self.thumbprint.clone(),
            issued_by: self.issuer.clone(),
            subject: self.subject.clone(),
            not_before: self.not_before,
            not_after: self.not_after,
            base64_certificate_data: self.to_pem(),
        }
    }
}

/// The appliance certificate used exclusively to verify token signatures.
#[derive(Debug, Clone)]
pub struct SigningCertificate {
    certificate: ParsedCertificate,
    public_key: RsaPublicKey,
}

impl SigningCertificate {
    pub fn new(certificate: ParsedCertificate) -> Result<Self, CryptoError> {
        let public_key = certificate.rsa_public_key()?;
        Ok(Self {
            certificate,
            public_key,
        })
    }

    pub fn from_text(text: &str) -> Result<Self, CryptoError> {
        Self::new(ParsedCertificate::from_text(text)?)
    }

    pub const fn certificate(&self) -> &ParsedCertificate {
        &self.certificate
    }

    pub const fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }
}

/// Uppercase hex SHA-1 of `der`, the appliance's thumbprint format.
pub fn thumbprint_of(der: &[u8]) -> String {
    hex::encode_upper(Sha1::digest(der))
}

/// Render DER as PEM with 64-character lines.
pub fn pem_encode(label: &str, der: &[u8], line_ending: &str) -> String {
    let body = STANDARD.encode(der);
    let mut out = format!("-----BEGIN {label}-----{line_ending}");
    let lines: Vec<&str> = body
        .as_bytes()
        .chunks(64)
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .collect();
    out.push_str(&lines.join(line_ending));
    out.push_str(line_ending);
    out.push_str(&format!("-----END {label}-----"));
    out
}

/// Contents of the first PEM block labelled `label`, if any.
pub fn first_pem_block(data: &[u8], label: &str) -> Result<Option<Vec<u8>>, CryptoError> {
    for pem in Pem::iter_from_buffer(data) {
        let pem = pem.map_err(|e| CryptoError::InvalidCertificate(format!("bad PEM: {e}")))?;
        if pem.label == label {
            return Ok(Some(pem.contents));
        }
    }
    Ok(None)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::test_utils::{SigningFixture, self_signed_for_role};

    #[test]
    fn thumbprint_is_uppercase_sha1_hex() {
        let tp = thumbprint_of(b"abc");
        assert_eq!(tp, "A9993E364706816ABA3E25717850C26C9CD0D89D");
    }

    #[test]
    fn pem_lines_are_wrapped_at_64() {
        let pem = pem_encode("TEST", &[0u8; 100], "\n");
        let lines: Vec<&str> = pem.lines().collect();
        assert_eq!(lines[0], "-----BEGIN TEST-----");
        assert_eq!(lines[1].len(), 64);
        assert_eq!(lines.last().copied(), Some("-----END TEST-----"));
    }

    #[test]
    fn pem_and_base64_forms_parse_identically() {
        let (cert_pem, _) = self_signed_for_role(CertificateRole::Server);
        let from_pem = ParsedCertificate::from_text(&cert_pem).unwrap();
        let from_b64 = ParsedCertificate::from_text(&from_pem.to_base64()).unwrap();
        assert_eq!(from_pem, from_b64);
        assert_eq!(from_pem.thumbprint().len(), 40);
    }

    #[test]
    fn info_uses_conventional_validity_order() {
        let (cert_pem, _) = self_signed_for_role(CertificateRole::Client);
        let info = ParsedCertificate::from_text(&cert_pem).unwrap().info();
        assert!(info.not_before < info.not_after);
        assert!(info.base64_certificate_data.starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn role_usage_follows_eku() {
        let (client_pem, _) = self_signed_for_role(CertificateRole::Client);
        let cert = ParsedCertificate::from_text(&client_pem).unwrap();
        assert!(cert.allows_role(CertificateRole::Client).unwrap());
        assert!(!cert.allows_role(CertificateRole::Server).unwrap());
    }

    #[test]
    fn signing_certificate_exposes_rsa_key() {
        let fixture = SigningFixture::new();
        let signing = SigningCertificate::from_text(&fixture.certificate_pem).unwrap();
        assert_eq!(
            signing.public_key(),
            &fixture.private_key().to_public_key()
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(ParsedCertificate::from_text("not a certificate").is_err());
        assert!(ParsedCertificate::from_der(&[0x30, 0x03, 0x01, 0x01, 0x00]).is_err());
    }
}
