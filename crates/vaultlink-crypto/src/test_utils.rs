//! Fixtures for tests: appliance signing keys, tokens, role certificates and a
//! throwaway CA that signs pending CSR keys.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::missing_panics_doc)]

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand::rngs::OsRng;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, date_time_ymd,
};
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::EncodePrivateKey;

use crate::material::PendingKey;
use crate::role::CertificateRole;
use crate::x509::ParsedCertificate;

fn rsa_key_pair() -> (RsaPrivateKey, KeyPair) {
    let key = RsaPrivateKey::new(&mut OsRng, 2048).expect("rsa keygen");
    let der = key.to_pkcs8_der().expect("pkcs8");
    let pair = KeyPair::try_from(der.as_bytes()).expect("rcgen key pair");
    (key, pair)
}

/// An appliance token-signing identity.
pub struct SigningFixture {
    key: RsaPrivateKey,
    pub certificate_pem: String,
}

impl SigningFixture {
    pub fn new() -> Self {
        let (key, pair) = rsa_key_pair();
        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, "Appliance Token Signing");
        let cert = params.self_signed(&pair).expect("self-signed signing cert");
        Self {
            key,
            certificate_pem: cert.pem(),
        }
    }

    pub const fn private_key(&self) -> &RsaPrivateKey {
        &self.key
    }

    /// Base64 DER of the signing certificate, as stored and as embedded in
    /// federation metadata.
    pub fn certificate_base64(&self) -> String {
        ParsedCertificate::from_text(&self.certificate_pem)
            .expect("fixture cert")
            .to_base64()
    }

    /// An RS256 token for `subject`.
    pub fn sign_token(&self, subject: &str) -> String {
        let der = self.key.to_pkcs1_der().expect("pkcs1");
        let claims = serde_json::json!({
            "sub": subject,
            "iat": 1_700_000_000_u64,
            "exp": 4_000_000_000_u64,
        });
        jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &EncodingKey::from_rsa_der(der.as_bytes()),
        )
        .expect("sign token")
    }
}

impl Default for SigningFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal SAML2 federation metadata embedding `cert_pem`.
pub fn federation_metadata(cert_pem: &str) -> String {
    let b64 = ParsedCertificate::from_text(cert_pem)
        .expect("fixture cert")
        .to_base64();
    format!(
        r#"<?xml version="1.0"?><EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata" xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><IDPSSODescriptor><KeyDescriptor use="signing"><ds:KeyInfo><ds:X509Data><ds:X509Certificate>{b64}</ds:X509Certificate></ds:X509Data></ds:KeyInfo></KeyDescriptor></IDPSSODescriptor></EntityDescriptor>"#
    )
}

fn role_params(role: CertificateRole, cn: &str) -> CertificateParams {
    let mut params = CertificateParams::new(vec!["localhost".to_string()]).expect("params");
    params.distinguished_name.push(DnType::CommonName, cn);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages.push(match role {
        CertificateRole::Client => ExtendedKeyUsagePurpose::ClientAuth,
        CertificateRole::Server => ExtendedKeyUsagePurpose::ServerAuth,
    });
    params
}

/// Self-signed RSA certificate for `role`: `(cert_pem, pkcs8_key_pem)`.
pub fn self_signed_for_role(role: CertificateRole) -> (String, String) {
    let (_, pair) = rsa_key_pair();
    let cert = role_params(role, &format!("fixture-{}", role.as_str()))
        .self_signed(&pair)
        .expect("self-signed");
    (cert.pem(), pair.serialize_pem())
}

/// Like [`self_signed_for_role`] but valid only during 2000.
pub fn expired_for_role(role: CertificateRole) -> (String, String) {
    let (_, pair) = rsa_key_pair();
    let mut params = role_params(role, "expired");
    params.not_before = date_time_ymd(2000, 1, 1);
    params.not_after = date_time_ymd(2001, 1, 1);
    let cert = params.self_signed(&pair).expect("self-signed");
    (cert.pem(), pair.serialize_pem())
}

/// A CA standing in for the operator's enterprise CA.
pub struct TestCa {
    params: CertificateParams,
    key_pair: KeyPair,
    pub certificate_pem: String,
}

impl TestCa {
    pub fn new() -> Self {
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(DnType::CommonName, "VaultLink Test CA");
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let key_pair = KeyPair::generate().expect("ca key");
        let cert = params.self_signed(&key_pair).expect("ca cert");
        Self {
            params,
            key_pair,
            certificate_pem: cert.pem(),
        }
    }

    /// Sign a certificate for the key generated with a CSR. Returns the
    /// public-only certificate as PEM.
    pub fn issue_for_pending_key(&self, pending: &PendingKey, role: CertificateRole) -> String {
        let private = pending.to_private_key().expect("pending key");
        let subject_key = KeyPair::try_from(private.pkcs8_der()).expect("subject key");
        let issuer = Issuer::from_params(&self.params, &self.key_pair);
        role_params(role, &format!("issued-{}", role.as_str()))
            .signed_by(&subject_key, &issuer)
            .expect("issue")
            .pem()
    }

    /// Base64 DER of the CA certificate.
    pub fn certificate_base64(&self) -> String {
        let der = crate::x509::first_pem_block(self.certificate_pem.as_bytes(), "CERTIFICATE")
            .expect("pem")
            .expect("block");
        STANDARD.encode(der)
    }
}

impl Default for TestCa {
    fn default() -> Self {
        Self::new()
    }
}
