//! Bearer token signature verification.
//!
//! Appliance tokens are JWS compact serializations signed with RS256. Only the
//! signature is checked here; claims are left to the appliance, which remains
//! the authority on expiry and revocation.

use std::fmt;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::x509::SigningCertificate;

/// base64url that accepts segments with or without trailing padding.
const SEGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// An appliance bearer token. Wiped from memory on drop, redacted in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(Zeroizing<String>);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Zeroizing::new(token.into()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken([REDACTED])")
    }
}

impl From<&str> for BearerToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for BearerToken {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Check that `token` carries a valid RS256 signature from `cert`.
///
/// Any malformation (wrong segment count, bad base64, bad signature length)
/// yields `false`; the reason is not surfaced to the caller.
pub fn verify_token(token: &str, cert: &SigningCertificate) -> bool {
    let ok = verify_inner(token, cert).is_some();
    if !ok {
        tracing::debug!("bearer token signature check failed");
    }
    ok
}

fn verify_inner(token: &str, cert: &SigningCertificate) -> Option<()> {
    let parts: Vec<&str> = token.trim().split('.').collect();
    let [header, payload, signature] = parts.as_slice() else {
        return None;
    };
    if header.is_empty() || payload.is_empty() || signature.is_empty() {
        return None;
    }

    let raw = SEGMENT_ENGINE.decode(signature).ok()?;
    let signature = Signature::try_from(raw.as_slice()).ok()?;
    let key = VerifyingKey::<Sha256>::new(cert.public_key().clone());
    let signed = format!("{header}.{payload}");
    key.verify(signed.as_bytes(), &signature).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::test_utils::SigningFixture;

    fn signing(fixture: &SigningFixture) -> SigningCertificate {
        SigningCertificate::from_text(&fixture.certificate_pem).unwrap()
    }

    #[test]
    fn accepts_token_signed_by_certificate_key() {
        let fixture = SigningFixture::new();
        let token = fixture.sign_token("admin");
        assert!(verify_token(&token, &signing(&fixture)));
    }

    #[test]
    fn accepts_padded_signature_segment() {
        let fixture = SigningFixture::new();
        let token = fixture.sign_token("admin");
        let (signed, sig) = token.rsplit_once('.').unwrap();
        let raw = SEGMENT_ENGINE.decode(sig).unwrap();
        let padded = base64::engine::general_purpose::URL_SAFE.encode(raw);
        assert!(verify_token(&format!("{signed}.{padded}"), &signing(&fixture)));
    }

    #[test]
    fn rejects_token_from_other_key() {
        let fixture = SigningFixture::new();
        let other = SigningFixture::new();
        let token = other.sign_token("admin");
        assert!(!verify_token(&token, &signing(&fixture)));
    }

    #[test]
    fn rejects_tampered_payload() {
        let fixture = SigningFixture::new();
        let token = fixture.sign_token("admin");
        let mut parts: Vec<String> = token.split('.').map(String::from).collect();
        parts[1] = SEGMENT_ENGINE.encode(br#"{"sub":"root"}"#);
        assert!(!verify_token(&parts.join("."), &signing(&fixture)));
    }

    #[test]
    fn rejects_malformed_tokens() {
        let fixture = SigningFixture::new();
        let cert = signing(&fixture);
        let token = fixture.sign_token("admin");
        assert!(!verify_token("", &cert));
        assert!(!verify_token("a.b", &cert));
        assert!(!verify_token(&format!("{token}.extra"), &cert));
        assert!(!verify_token("a.b.!!!notbase64!!!", &cert));
        assert!(!verify_token("a.b.c2hvcnQ", &cert));
    }

    #[test]
    fn debug_does_not_leak_token() {
        let token = BearerToken::new("secret-token-value");
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret"));
        assert_eq!(token.as_str(), "secret-token-value");
    }
}
