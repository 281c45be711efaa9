//! SAML2 federation metadata handling.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::CryptoError;
use crate::x509::SigningCertificate;

static X509_ELEMENT: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:[\w.-]+:)?X509Certificate[^>]*>(.*?)</(?:[\w.-]+:)?X509Certificate>")
});

/// Extract the first `X509Certificate` element of a federation metadata
/// document as the appliance's token signing certificate.
pub fn extract_signing_certificate(xml: &str) -> Result<SigningCertificate, CryptoError> {
    let re = X509_ELEMENT
        .as_ref()
        .map_err(|e| CryptoError::Metadata(e.to_string()))?;
    let body = re
        .captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| CryptoError::Metadata("no X509Certificate element found".into()))?;
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(CryptoError::Metadata("X509Certificate element is empty".into()));
    }
    SigningCertificate::from_text(&compact)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::{SigningFixture, federation_metadata};

    #[test]
    fn extracts_first_certificate() {
        let fixture = SigningFixture::new();
        let second = SigningFixture::new();
        let doc = format!(
            "{}{}",
            federation_metadata(&fixture.certificate_pem),
            federation_metadata(&second.certificate_pem)
        );
        let cert = extract_signing_certificate(&doc).unwrap();
        assert_eq!(cert.public_key(), &fixture.private_key().to_public_key());
    }

    #[test]
    fn unprefixed_element_with_wrapped_body() {
        let fixture = SigningFixture::new();
        let der_b64 = SigningCertificate::from_text(&fixture.certificate_pem)
            .unwrap()
            .certificate()
            .to_base64();
        let wrapped: Vec<String> = der_b64
            .as_bytes()
            .chunks(76)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect();
        let doc = format!(
            "<KeyInfo><X509Data><X509Certificate>\n  {}\n</X509Certificate></X509Data></KeyInfo>",
            wrapped.join("\n  ")
        );
        assert!(extract_signing_certificate(&doc).is_ok());
    }

    #[test]
    fn missing_or_empty_element_is_an_error() {
        assert!(matches!(
            extract_signing_certificate("<EntityDescriptor/>"),
            Err(CryptoError::Metadata(_))
        ));
        assert!(matches!(
            extract_signing_certificate("<ds:X509Certificate>  </ds:X509Certificate>"),
            Err(CryptoError::Metadata(_))
        ));
    }
}
