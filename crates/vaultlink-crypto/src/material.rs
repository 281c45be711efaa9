//! Certificate material: a certificate, its optional private key and chain.
//!
//! Accepts the encodings operators actually upload (PEM bundles, base64 text,
//! DER certificates and PKCS#12 archives) and writes PKCS#12 for storage.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use p12_keystore::{Certificate as P12Certificate, KeyStore, KeyStoreEntry, PrivateKeyChain};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use x509_parser::pem::Pem;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::x509::{CertificateInfo, ParsedCertificate, pem_encode};

/// A private key held as PKCS#8 DER.
#[derive(Clone)]
pub struct PrivateKey {
    pkcs8_der: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

impl PrivateKey {
    pub fn from_pkcs8_der(der: &[u8]) -> Self {
        Self {
            pkcs8_der: Zeroizing::new(der.to_vec()),
        }
    }

    /// Convert a PKCS#1 `RSAPrivateKey` into PKCS#8.
    pub fn from_pkcs1_der(der: &[u8]) -> Result<Self, CryptoError> {
        let key = RsaPrivateKey::from_pkcs1_der(der)
            .map_err(|e| CryptoError::InvalidKey(format!("bad PKCS#1 key: {e}")))?;
        Self::from_rsa(&key)
    }

    pub fn from_rsa(key: &RsaPrivateKey) -> Result<Self, CryptoError> {
        let doc = key
            .to_pkcs8_der()
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self::from_pkcs8_der(doc.as_bytes()))
    }

    pub fn pkcs8_der(&self) -> &[u8] {
        &self.pkcs8_der
    }

    /// Interpret the key as RSA. Other algorithms are rejected.
    pub fn rsa(&self) -> Result<RsaPrivateKey, CryptoError> {
        RsaPrivateKey::from_pkcs8_der(&self.pkcs8_der)
            .map_err(|e| CryptoError::InvalidKey(format!("not an RSA private key: {e}")))
    }

    pub fn to_pem(&self) -> Zeroizing<String> {
        Zeroizing::new(pem_encode("PRIVATE KEY", &self.pkcs8_der, "\n"))
    }
}

/// Private key generated alongside a CSR and kept until the signed
/// certificate comes back.
#[derive(Clone)]
pub struct PendingKey {
    pkcs1_der: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for PendingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PendingKey([REDACTED])")
    }
}

impl PendingKey {
    pub fn from_rsa(key: &RsaPrivateKey) -> Result<Self, CryptoError> {
        let doc = key
            .to_pkcs1_der()
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self {
            pkcs1_der: Zeroizing::new(doc.as_bytes().to_vec()),
        })
    }

    /// Decode the stored base64 form.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let der = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("pending key is not base64: {e}")))?;
        RsaPrivateKey::from_pkcs1_der(&der)
            .map_err(|e| CryptoError::InvalidKey(format!("pending key is corrupt: {e}")))?;
        Ok(Self {
            pkcs1_der: Zeroizing::new(der),
        })
    }

    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(&*self.pkcs1_der))
    }

    pub fn rsa(&self) -> Result<RsaPrivateKey, CryptoError> {
        RsaPrivateKey::from_pkcs1_der(&self.pkcs1_der)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    pub fn public_key(&self) -> Result<RsaPublicKey, CryptoError> {
        Ok(self.rsa()?.to_public_key())
    }

    pub fn to_private_key(&self) -> Result<PrivateKey, CryptoError> {
        PrivateKey::from_rsa(&self.rsa()?)
    }
}

/// A certificate with its optional private key and issuing chain.
#[derive(Debug, Clone)]
pub struct CertificateMaterial {
    certificate: ParsedCertificate,
    private_key: Option<PrivateKey>,
    chain: Vec<ParsedCertificate>,
}

impl CertificateMaterial {
    pub const fn new(
        certificate: ParsedCertificate,
        private_key: Option<PrivateKey>,
        chain: Vec<ParsedCertificate>,
    ) -> Self {
        Self {
            certificate,
            private_key,
            chain,
        }
    }

    pub const fn certificate(&self) -> &ParsedCertificate {
        &self.certificate
    }

    pub const fn private_key(&self) -> Option<&PrivateKey> {
        self.private_key.as_ref()
    }

    pub const fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    pub fn chain(&self) -> &[ParsedCertificate] {
        &self.chain
    }

    /// Pair a public-only certificate with a pending CSR key.
    #[must_use]
    pub fn with_private_key(mut self, key: PrivateKey) -> Self {
        self.private_key = Some(key);
        self
    }

    pub fn info(&self) -> CertificateInfo {
        self.certificate.info()
    }

    /// Encode as a PKCS#12 archive protected by `passphrase`.
    pub fn to_pfx(&self, passphrase: &str) -> Result<Vec<u8>, CryptoError> {
        let key = self
            .private_key
            .as_ref()
            .ok_or_else(|| CryptoError::Pkcs12("cannot export a certificate without its private key".into()))?;

        let mut certs = Vec::with_capacity(1 + self.chain.len());
        for cert in std::iter::once(&self.certificate).chain(self.chain.iter()) {
            certs.push(
                P12Certificate::from_der(cert.der())
                    .map_err(|e| CryptoError::Pkcs12(e.to_string()))?,
            );
        }
        let local_key_id = hex::decode(self.certificate.thumbprint())
            .map_err(|e| CryptoError::Pkcs12(e.to_string()))?;
        let chain = PrivateKeyChain::new(key.pkcs8_der(), local_key_id, certs);

        let mut store = KeyStore::new();
        store.add_entry("vaultlink", KeyStoreEntry::PrivateKeyChain(chain));
        store
            .writer(passphrase)
            .write()
            .map_err(|e| CryptoError::Pkcs12(e.to_string()))
    }
}

/// Parse uploaded certificate bytes.
///
/// Tried in order: PEM text, base64 text wrapping a binary form, a DER
/// certificate and finally a PKCS#12 archive opened with `passphrase`.
pub fn parse_certificate_material(
    data: &[u8],
    passphrase: Option<&str>,
) -> Result<CertificateMaterial, CryptoError> {
    if let Ok(text) = std::str::from_utf8(data) {
        let trimmed = text.trim();
        if trimmed.contains("-----BEGIN") {
            return parse_pem_bundle(trimmed.as_bytes());
        }
        let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
        if !compact.is_empty() {
            if let Ok(decoded) = STANDARD.decode(&compact) {
                return parse_binary(&decoded, passphrase);
            }
        }
    }
    parse_binary(data, passphrase)
}

fn parse_binary(data: &[u8], passphrase: Option<&str>) -> Result<CertificateMaterial, CryptoError> {
    if let Ok(cert) = ParsedCertificate::from_der(data) {
        return Ok(CertificateMaterial::new(cert, None, Vec::new()));
    }
    parse_pfx(data, passphrase.unwrap_or_default())
}

fn parse_pem_bundle(data: &[u8]) -> Result<CertificateMaterial, CryptoError> {
    let mut certs = Vec::new();
    let mut key = None;
    for pem in Pem::iter_from_buffer(data) {
        let pem = pem.map_err(|e| CryptoError::InvalidCertificate(format!("bad PEM: {e}")))?;
        match pem.label.as_str() {
            "CERTIFICATE" => certs.push(ParsedCertificate::from_der(&pem.contents)?),
            "PRIVATE KEY" => key = Some(PrivateKey::from_pkcs8_der(&pem.contents)),
            "RSA PRIVATE KEY" => key = Some(PrivateKey::from_pkcs1_der(&pem.contents)?),
            "ENCRYPTED PRIVATE KEY" => {
                return Err(CryptoError::InvalidKey(
                    "encrypted PEM keys are not supported, upload a PKCS#12 archive instead".into(),
                ));
            }
            other => tracing::debug!(label = other, "ignoring PEM block"),
        }
    }
    let mut certs = certs.into_iter();
    let leaf = certs
        .next()
        .ok_or_else(|| CryptoError::InvalidCertificate("no CERTIFICATE block in PEM data".into()))?;
    Ok(CertificateMaterial::new(leaf, key, certs.collect()))
}

fn parse_pfx(data: &[u8], passphrase: &str) -> Result<CertificateMaterial, CryptoError> {
    let store = KeyStore::from_pkcs12(data, passphrase)
        .map_err(|e| CryptoError::Pkcs12(format!("unable to open archive: {e}")))?;

    let mut keyed: Option<CertificateMaterial> = None;
    let mut loose = Vec::new();
    for (_, entry) in store.entries() {
        if let KeyStoreEntry::PrivateKeyChain(chain) = entry {
            if keyed.is_some() {
                continue;
            }
            let mut certs = chain
                .chain()
                .iter()
                .map(|c| ParsedCertificate::from_der(c.as_der()));
            let leaf = certs
                .next()
                .ok_or_else(|| CryptoError::Pkcs12("key entry without certificate".into()))??;
            let rest = certs.collect::<Result<Vec<_>, _>>()?;
            keyed = Some(CertificateMaterial::new(
                leaf,
                Some(PrivateKey::from_pkcs8_der(chain.key())),
                rest,
            ));
        } else if let KeyStoreEntry::Certificate(cert) = entry {
            loose.push(ParsedCertificate::from_der(cert.as_der())?);
        }
    }

    if let Some(material) = keyed {
        return Ok(material);
    }
    let mut loose = loose.into_iter();
    let leaf = loose
        .next()
        .ok_or_else(|| CryptoError::Pkcs12("archive contains no certificate".into()))?;
    Ok(CertificateMaterial::new(leaf, None, loose.collect()))
}
