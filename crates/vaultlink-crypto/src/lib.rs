//! `VaultLink` certificate and token primitives.
//!
//! Everything the broker needs to establish and keep trust with a PAM
//! appliance without a shared secret:
//!
//! - **Token**: RS256 (PKCS#1 v1.5, SHA-256) bearer token signature checks
//! - **X.509**: parsing, thumbprints, PEM rendering, certificate summaries
//! - **Metadata**: signing certificate extraction from SAML2 federation metadata
//! - **CSR**: RSA key + certificate signing request with role extensions
//! - **Material**: PEM bundles, PKCS#12 import/export, pending CSR keys
//! - **Policy**: role-fitness checks for client/server certificates
//! - **Certs**: the self-signed default server certificate

pub mod certs;
pub mod csr;
pub mod error;
pub mod material;
pub mod metadata;
pub mod policy;
pub mod role;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod token;
pub mod x509;

pub use certs::generate_default_server_certificate;
pub use csr::{CsrOptions, GeneratedCsr, generate_csr};
pub use error::CryptoError;
pub use material::{CertificateMaterial, PendingKey, PrivateKey, parse_certificate_material};
pub use metadata::extract_signing_certificate;
pub use policy::{validate_for_role, validate_trusted};
pub use role::CertificateRole;
pub use token::{BearerToken, verify_token};
pub use x509::{CertificateInfo, ParsedCertificate, SigningCertificate};
