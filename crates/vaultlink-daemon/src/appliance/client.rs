//! HTTPS transport to the appliance REST API.
//!
//! Uses reqwest with rustls. Each connection gets its own client so the TLS
//! policy and credential of one operation never leak into another.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, Url};
use serde_json::Value;

use super::transport::{
    ApplianceConnection, ApplianceTransport, ConnectRequest, FullResponse, Service, TlsPolicy,
    TransportError,
};

const FEDERATION_METADATA_PATH: &str = "RSTS/Saml2FedMetadata";

/// Upper bound on how much of an error body is echoed into error messages.
const MAX_ERROR_BODY: usize = 512;

/// reqwest-backed [`ApplianceTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    timeout: Duration,
}

impl HttpTransport {
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn client(
        &self,
        tls: &TlsPolicy,
        headers: HeaderMap,
    ) -> Result<reqwest::Client, TransportError> {
        // reqwest is built with `rustls-no-provider`; install ring once.
        // `Err` means a provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .default_headers(headers);
        match tls {
            TlsPolicy::Insecure => builder = builder.danger_accept_invalid_certs(true),
            TlsPolicy::Pinned(pems) => {
                for pem in pems {
                    let cert = reqwest::Certificate::from_pem(pem.as_bytes())
                        .map_err(|e| TransportError::Tls(e.to_string()))?;
                    builder = builder.add_root_certificate(cert);
                }
            }
        }
        builder
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))
    }
}

#[async_trait]
impl ApplianceTransport for HttpTransport {
    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<Box<dyn ApplianceConnection>, TransportError> {
        if request.address.trim().is_empty() {
            return Err(TransportError::Http("appliance address is empty".into()));
        }
        let mut headers = HeaderMap::new();
        if let Some(token) = &request.credential {
            let value = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
                .map_err(|_| TransportError::Http("Invalid token format".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        let http = self.client(&request.tls, headers)?;
        tracing::debug!(address = %request.address, authenticated = request.credential.is_some(), "connecting to appliance");
        Ok(Box::new(HttpConnection {
            http,
            address: request.address.trim().trim_end_matches('/').to_string(),
            api_version: request.api_version,
        }))
    }

    async fn fetch_federation_metadata(&self, address: &str) -> Result<String, TransportError> {
        let http = self.client(&TlsPolicy::Insecure, HeaderMap::new())?;
        let url = format!("https://{}/{FEDERATION_METADATA_PATH}", address.trim_end_matches('/'));
        let resp = http
            .get(&url)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let resp = check_status(resp, FEDERATION_METADATA_PATH).await?;
        resp.text()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))
    }
}

#[derive(Debug)]
struct HttpConnection {
    http: reqwest::Client,
    address: String,
    api_version: u32,
}

impl HttpConnection {
    fn url(&self, service: Service, path: &str, query: &[(&str, &str)]) -> Result<Url, TransportError> {
        let base = service_url(&self.address, service, self.api_version, path);
        Url::parse_with_params(&base, query).map_err(|e| TransportError::Http(e.to_string()))
    }
}

/// `https://{address}/service/{service}/v{version}/{path}`
pub(crate) fn service_url(address: &str, service: Service, api_version: u32, path: &str) -> String {
    format!(
        "https://{address}/service/{}/v{api_version}/{}",
        service.as_path(),
        path.trim_start_matches('/')
    )
}

async fn check_status(resp: reqwest::Response, path: &str) -> Result<reqwest::Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(TransportError::NotFound(path.to_string()));
    }
    let body = resp.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("Unknown").to_string()
    } else {
        body.chars().take(MAX_ERROR_BODY).collect()
    };
    Err(TransportError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ApplianceConnection for HttpConnection {
    async fn invoke(
        &self,
        service: Service,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, &str)],
    ) -> Result<FullResponse, TransportError> {
        let url = self.url(service, path, query)?;
        let mut req = self.http.request(method.clone(), url);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let resp = check_status(resp, path).await?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        tracing::debug!(%method, path, status, "appliance call");
        Ok(FullResponse { status, body })
    }
}
