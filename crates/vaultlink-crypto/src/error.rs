//! Crypto error types.

/// Errors from certificate, key and CSR operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("PKCS#12 error: {0}")]
    Pkcs12(String),

    #[error("Invalid subject name: {0}")]
    InvalidSubject(String),

    #[error("Invalid SAN IP address list: {0}")]
    InvalidSanIp(String),

    #[error("Invalid SAN DNS list: {0}")]
    InvalidSanDns(String),

    #[error("Invalid key size {0}: must be between 2048 and 8192 bits")]
    InvalidKeySize(usize),

    #[error("Certificate generation error: {0}")]
    Generation(String),

    #[error("Certificate rejected: {0}")]
    PolicyViolation(String),

    #[error("Federation metadata error: {0}")]
    Metadata(String),
}
