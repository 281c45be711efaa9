//! Self-signed default server certificate.
//!
//! The broker always has a TLS server identity: when the operator removes the
//! installed server certificate, a self-signed one takes its place until a
//! CA-issued certificate is installed again.

use rand::rngs::OsRng;
use rcgen::{
    CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
    date_time_ymd,
};
use rsa::RsaPrivateKey;
use rsa::pkcs8::EncodePrivateKey;

use crate::error::CryptoError;
use crate::material::{CertificateMaterial, PrivateKey};
use crate::role::CertificateRole;
use crate::x509::ParsedCertificate;

const DEFAULT_SERVER_KEY_BITS: usize = 2048;
const DEFAULT_SERVER_VALIDITY_YEARS: i32 = 10;

fn current_year() -> i32 {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    // Average Gregorian year; only used to pick a Jan 1st boundary.
    1970 + i32::try_from(secs / 31_556_952).unwrap_or(0)
}

/// Generate the default self-signed server certificate for `instance_id`.
///
/// RSA 2048, serverAuth EKU, valid from January 1st of the current year for
/// ten years, with `localhost` and any extra `hostnames` as DNS SANs.
pub fn generate_default_server_certificate(
    instance_id: &str,
    hostnames: &[String],
) -> Result<CertificateMaterial, CryptoError> {
    let mut sans = vec!["localhost".to_string()];
    sans.extend(hostnames.iter().filter(|h| !h.is_empty()).cloned());

    let mut params =
        CertificateParams::new(sans).map_err(|e| CryptoError::Generation(e.to_string()))?;
    params.is_ca = IsCa::ExplicitNoCa;
    params.distinguished_name.push(
        DnType::CommonName,
        CertificateRole::Server.default_subject(instance_id).trim_start_matches("CN="),
    );
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params
        .extended_key_usages
        .push(ExtendedKeyUsagePurpose::ServerAuth);
    let year = current_year();
    params.not_before = date_time_ymd(year, 1, 1);
    params.not_after = date_time_ymd(year + DEFAULT_SERVER_VALIDITY_YEARS, 1, 1);

    let rsa_key = RsaPrivateKey::new(&mut OsRng, DEFAULT_SERVER_KEY_BITS)
        .map_err(|e| CryptoError::Generation(e.to_string()))?;
    let pkcs8 = rsa_key
        .to_pkcs8_der()
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let key_pair =
        KeyPair::try_from(pkcs8.as_bytes()).map_err(|e| CryptoError::Generation(e.to_string()))?;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CryptoError::Generation(e.to_string()))?;

    tracing::info!(instance_id, "generated default server certificate");
    Ok(CertificateMaterial::new(
        ParsedCertificate::from_der(cert.der())?,
        Some(PrivateKey::from_pkcs8_der(pkcs8.as_bytes())),
        Vec::new(),
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::policy::validate_for_role;

    #[test]
    fn default_server_certificate_is_fit_for_server_role() {
        let material = generate_default_server_certificate("abc", &[]).unwrap();
        validate_for_role(&material, CertificateRole::Server).unwrap();
        assert!(validate_for_role(&material, CertificateRole::Client).is_err());
        assert_eq!(material.certificate().subject(), "CN=VaultLink-abc-Server");
        assert_eq!(material.certificate().issuer(), material.certificate().subject());
    }

    #[test]
    fn regenerated_certificates_differ() {
        let a = generate_default_server_certificate("abc", &["broker.local".into()]).unwrap();
        let b = generate_default_server_certificate("abc", &[]).unwrap();
        assert_ne!(a.certificate().thumbprint(), b.certificate().thumbprint());
    }
}
