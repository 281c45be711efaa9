//! Certificate acceptance rules.

use crate::error::CryptoError;
use crate::material::CertificateMaterial;
use crate::role::CertificateRole;
use crate::x509::ParsedCertificate;

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

fn check_validity(cert: &ParsedCertificate, at: i64) -> Result<(), CryptoError> {
    if at < cert.not_before() {
        return Err(CryptoError::PolicyViolation("certificate is not yet valid".into()));
    }
    if at > cert.not_after() {
        return Err(CryptoError::PolicyViolation("certificate has expired".into()));
    }
    Ok(())
}

/// Check that `material` can serve as the broker's certificate for `role`:
/// it carries a private key matching its public key, it is inside its
/// validity window and its extended key usage admits the role.
pub fn validate_for_role(material: &CertificateMaterial, role: CertificateRole) -> Result<(), CryptoError> {
    validate_for_role_at(material, role, now())
}

pub fn validate_for_role_at(
    material: &CertificateMaterial,
    role: CertificateRole,
    at: i64,
) -> Result<(), CryptoError> {
    let cert = material.certificate();
    let key = material
        .private_key()
        .ok_or_else(|| CryptoError::PolicyViolation("private key is missing".into()))?;

    check_validity(cert, at)?;

    if !cert.allows_role(role)? {
        return Err(CryptoError::PolicyViolation(format!(
            "{role} requires the {} extended key usage",
            match role {
                CertificateRole::Client => "client authentication",
                CertificateRole::Server => "server authentication",
            }
        )));
    }

    let from_key = key.rsa()?.to_public_key();
    if from_key != cert.rsa_public_key()? {
        return Err(CryptoError::PolicyViolation(
            "private key does not match the certificate".into(),
        ));
    }
    Ok(())
}

/// Trusted certificates only need to be currently valid.
pub fn validate_trusted(cert: &ParsedCertificate) -> Result<(), CryptoError> {
    check_validity(cert, now())
}
