//! Trust store: the appliance signing certificate and the certificates used
//! to validate the appliance's TLS identity.

use reqwest::Method;
use vaultlink_crypto::{CertificateInfo, ParsedCertificate, SigningCertificate, validate_trusted};

use crate::appliance::{ApplianceConnection, ApplianceTrustedCertificate, Service, TlsPolicy};
use crate::error::{BrokerError, Result};
use crate::storage::{ConfigDatabase, SettingKey, TrustedCertificateRow};

#[derive(Clone)]
pub struct TrustStore {
    db: ConfigDatabase,
}

fn row_info(row: TrustedCertificateRow) -> CertificateInfo {
    CertificateInfo {
        thumbprint: row.thumbprint,
        issued_by: row.issuer,
        subject: row.subject,
        not_before: row.not_before,
        not_after: row.not_after,
        base64_certificate_data: row.pem,
    }
}

fn require_thumbprint(thumbprint: &str) -> Result<&str> {
    let thumbprint = thumbprint.trim();
    if thumbprint.is_empty() {
        return Err(BrokerError::Configuration("Invalid thumbprint".into()));
    }
    Ok(thumbprint)
}

impl TrustStore {
    pub const fn new(db: ConfigDatabase) -> Self {
        Self { db }
    }

    /// The stored signing certificate, if bootstrap has completed.
    pub async fn signing_certificate(&self) -> Result<Option<SigningCertificate>> {
        let Some(stored) = self.db.get_setting(SettingKey::SigningCertificate).await? else {
            return Ok(None);
        };
        SigningCertificate::from_text(&stored)
            .map(Some)
            .map_err(|e| BrokerError::certificate("Stored signing certificate is unreadable", &e))
    }

    pub async fn list(&self) -> Result<Vec<CertificateInfo>> {
        Ok(self
            .db
            .list_trusted_certificates()
            .await?
            .into_iter()
            .map(row_info)
            .collect())
    }

    pub async fn get(&self, thumbprint: &str) -> Result<CertificateInfo> {
        let thumbprint = require_thumbprint(thumbprint)?;
        self.db
            .get_trusted_certificate(thumbprint)
            .await?
            .map(row_info)
            .ok_or_else(|| BrokerError::NotFound(format!("Trusted certificate {thumbprint} not found")))
    }

    /// Add a certificate given as PEM or base64 DER. Adding a certificate
    /// that is already trusted returns the existing entry.
    pub async fn add(&self, data: &str) -> Result<CertificateInfo> {
        let cert = ParsedCertificate::from_text(data)
            .map_err(|e| BrokerError::certificate("Failed to add the certificate", &e))?;
        tracing::debug!(subject = cert.subject(), thumbprint = cert.thumbprint(), "parsed trusted certificate");

        if let Some(existing) = self.db.get_trusted_certificate(cert.thumbprint()).await? {
            tracing::debug!(thumbprint = cert.thumbprint(), "trusted certificate already exists");
            return Ok(row_info(existing));
        }

        validate_trusted(&cert)
            .map_err(|e| BrokerError::certificate("Failed to add the certificate", &e))?;

        let row = TrustedCertificateRow {
            thumbprint: cert.thumbprint().to_string(),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            not_before: cert.not_before(),
            not_after: cert.not_after(),
            pem: cert.to_pem(),
            created_at: 0,
        };
        let (stored, inserted) = self.db.insert_trusted_certificate(&row).await?;
        if inserted {
            tracing::info!(thumbprint = %stored.thumbprint, subject = %stored.subject, "trusted certificate added");
        }
        Ok(row_info(stored))
    }

    /// Deleting an unknown thumbprint is not an error.
    pub async fn delete(&self, thumbprint: &str) -> Result<()> {
        let thumbprint = require_thumbprint(thumbprint)?;
        if self.db.delete_trusted_certificate(thumbprint).await? {
            tracing::info!(thumbprint, "trusted certificate deleted");
        }
        Ok(())
    }

    /// Removes every trusted certificate. The signing certificate is kept.
    pub async fn delete_all(&self) -> Result<u64> {
        let removed = self.db.delete_all_trusted_certificates().await?;
        tracing::info!(removed, "trusted certificates cleared");
        Ok(removed)
    }

    pub async fn has_trusted_certificates(&self) -> Result<bool> {
        Ok(!self.db.list_trusted_certificates().await?.is_empty())
    }

    /// TLS policy for connections to the appliance.
    pub async fn tls_policy(&self, ignore_ssl: bool) -> Result<TlsPolicy> {
        if ignore_ssl {
            return Ok(TlsPolicy::Insecure);
        }
        let pems = self
            .db
            .list_trusted_certificates()
            .await?
            .into_iter()
            .map(|row| row.pem)
            .collect();
        Ok(TlsPolicy::Pinned(pems))
    }

    /// Copy the appliance's own trusted certificates into the store. Each
    /// certificate is imported independently; failures are logged and
    /// skipped.
    pub async fn import_from_appliance(
        &self,
        conn: &dyn ApplianceConnection,
    ) -> Result<Vec<CertificateInfo>> {
        let remote: Vec<ApplianceTrustedCertificate> = conn
            .invoke(Service::Core, Method::GET, "TrustedCertificates", None, &[])
            .await
            .and_then(|resp| resp.json())
            .map_err(|e| BrokerError::remote("Failed to get the appliance trusted certificates", &e))?;
        tracing::debug!(count = remote.len(), "received trusted certificates from the appliance");

        let mut imported = Vec::with_capacity(remote.len());
        for cert in remote {
            match self.add(&cert.base64_certificate_data).await {
                Ok(info) => imported.push(info),
                Err(e) => tracing::error!(
                    subject = %cert.subject,
                    thumbprint = %cert.thumbprint,
                    error = %e,
                    "failed to import trusted certificate"
                ),
            }
        }
        Ok(imported)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use vaultlink_crypto::CertificateRole;
    use vaultlink_crypto::test_utils::{TestCa, expired_for_role, self_signed_for_role};

    async fn store() -> TrustStore {
        TrustStore::new(ConfigDatabase::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn add_accepts_pem_and_base64_der() {
        let store = store().await;
        let ca = TestCa::new();
        let from_pem = store.add(&ca.certificate_pem).await.unwrap();
        let from_der = store.add(&ca.certificate_base64()).await.unwrap();
        assert_eq!(from_pem, from_der);
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(from_pem.base64_certificate_data.starts_with("-----BEGIN CERTIFICATE-----"));

        let (cert_pem, _) = self_signed_for_role(CertificateRole::Server);
        store.add(&cert_pem).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn expired_and_garbage_certificates_are_rejected() {
        let store = store().await;
        let (expired, _) = expired_for_role(CertificateRole::Server);
        assert!(matches!(store.add(&expired).await, Err(BrokerError::Certificate(_))));
        assert!(matches!(store.add("not a cert").await, Err(BrokerError::Certificate(_))));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_and_delete_by_thumbprint() {
        let store = store().await;
        let info = store.add(&TestCa::new().certificate_pem).await.unwrap();

        let found = store.get(&info.thumbprint.to_ascii_lowercase()).await.unwrap();
        assert_eq!(found.thumbprint, info.thumbprint);

        store.delete(&info.thumbprint).await.unwrap();
        store.delete(&info.thumbprint).await.unwrap();
        assert!(matches!(store.get(&info.thumbprint).await, Err(BrokerError::NotFound(_))));
        assert!(matches!(store.get(" ").await, Err(BrokerError::Configuration(_))));
    }

    #[tokio::test]
    async fn tls_policy_pins_trusted_certificates() {
        let store = store().await;
        assert_eq!(store.tls_policy(true).await.unwrap(), TlsPolicy::Insecure);
        assert_eq!(store.tls_policy(false).await.unwrap(), TlsPolicy::Pinned(Vec::new()));

        let info = store.add(&TestCa::new().certificate_pem).await.unwrap();
        assert_eq!(
            store.tls_policy(false).await.unwrap(),
            TlsPolicy::Pinned(vec![info.base64_certificate_data])
        );
    }
}
