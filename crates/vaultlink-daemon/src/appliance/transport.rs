//! Transport seam between the broker and the appliance.

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use vaultlink_crypto::BearerToken;

/// Appliance transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Appliance returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

impl TransportError {
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::Status { status: 404, .. })
    }
}

/// Appliance API surface a request is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Core,
    Appliance,
    Notification,
}

impl Service {
    pub const fn as_path(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Appliance => "appliance",
            Self::Notification => "notification",
        }
    }
}

/// How the appliance's TLS certificate is validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsPolicy {
    /// Accept any certificate.
    Insecure,
    /// Validate against these PEM certificates in addition to the platform roots.
    Pinned(Vec<String>),
}

/// Parameters for opening a connection.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub address: String,
    /// `None` opens an anonymous connection.
    pub credential: Option<BearerToken>,
    pub api_version: u32,
    pub tls: TlsPolicy,
}

/// A successful (2xx) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullResponse {
    pub status: u16,
    pub body: String,
}

impl FullResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_str(&self.body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// Opens connections to an appliance.
#[async_trait]
pub trait ApplianceTransport: Send + Sync {
    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<Box<dyn ApplianceConnection>, TransportError>;

    /// Fetch `RSTS/Saml2FedMetadata` without validating the TLS certificate.
    async fn fetch_federation_metadata(&self, address: &str) -> Result<String, TransportError>;
}

/// A connection scoped to one logical operation.
#[async_trait]
pub trait ApplianceConnection: Send + Sync {
    /// Invoke `method` on `path`. Non-2xx responses are errors; 404 maps to
    /// [`TransportError::NotFound`].
    async fn invoke(
        &self,
        service: Service,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, &str)],
    ) -> Result<FullResponse, TransportError>;
}
