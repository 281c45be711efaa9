//! Certificate manager: CSR generation, installation and removal of the
//! broker's client and server certificates.
//!
//! An install either carries its own private key (PKCS#12, or a PEM bundle
//! with a key) or is public-only and gets paired with the key generated for
//! the role's last CSR. Nothing is written unless the result passes the
//! role's policy checks.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use vaultlink_crypto::{
    CertificateInfo, CertificateMaterial, CertificateRole, CsrOptions, PendingKey,
    generate_csr, generate_default_server_certificate, parse_certificate_material,
    validate_for_role,
};

use crate::error::{BrokerError, Result};
use crate::storage::{ConfigDatabase, SettingKey};

const MISMATCHED_CSR: &str =
    "Failed to find a matching private key. Possibly a mismatched CSR type was selected.";

#[derive(Clone)]
pub struct CertificateManager {
    db: ConfigDatabase,
}

const fn role_label(role: CertificateRole) -> &'static str {
    match role {
        CertificateRole::Client => "Client",
        CertificateRole::Server => "Server",
    }
}

impl CertificateManager {
    pub const fn new(db: ConfigDatabase) -> Self {
        Self { db }
    }

    /// Generate a CSR for `options.role` and cache its key as the role's
    /// pending key, replacing any earlier one. Returns the PEM.
    pub async fn generate_csr(&self, options: &CsrOptions) -> Result<String> {
        let instance_id = self.db.instance_id().await?;
        let csr = generate_csr(options, &instance_id)
            .map_err(|e| BrokerError::certificate("Failed to generate the CSR", &e))?;

        self.db
            .apply_settings(&[
                (SettingKey::Csr(csr.role), Some(csr.pem.clone())),
                (
                    SettingKey::PendingKey(csr.role),
                    Some(csr.pending_key.to_base64().to_string()),
                ),
            ])
            .await?;
        tracing::info!(role = %csr.role, subject = %csr.subject, "generated CSR");
        Ok(csr.pem)
    }

    pub async fn last_csr(&self, role: CertificateRole) -> Result<Option<String>> {
        Ok(self.db.get_setting(SettingKey::Csr(role)).await?)
    }

    /// Install a certificate for `role` from PEM, base64, DER or PKCS#12
    /// bytes.
    pub async fn install(
        &self,
        data: &[u8],
        passphrase: Option<&str>,
        role: CertificateRole,
    ) -> Result<CertificateInfo> {
        let material = parse_certificate_material(data, passphrase)
            .map_err(|e| BrokerError::certificate("Failed to convert the provided certificate", &e))?;
        tracing::debug!(
            subject = material.certificate().subject(),
            thumbprint = material.certificate().thumbprint(),
            has_private_key = material.has_private_key(),
            "parsed certificate for installation"
        );

        let (stored, stored_passphrase, material) = if material.has_private_key() {
            validate_for_role(&material, role)
                .map_err(|e| BrokerError::certificate("Invalid certificate", &e))?;
            (STANDARD.encode(data), passphrase.map(ToString::to_string), material)
        } else {
            let pending = self
                .pending_key(role)
                .await?
                .ok_or_else(|| BrokerError::Certificate(MISMATCHED_CSR.into()))?;
            let key = pending
                .to_private_key()
                .map_err(|e| BrokerError::certificate("Failed to import the certificate", &e))?;
            let combined = material.with_private_key(key);
            validate_for_role(&combined, role)
                .map_err(|e| BrokerError::certificate("Failed to import the certificate", &e))?;
            let pfx = combined
                .to_pfx("")
                .map_err(|e| BrokerError::certificate("Failed to import the certificate", &e))?;
            (STANDARD.encode(pfx), None, combined)
        };

        self.db
            .apply_settings(&[
                (SettingKey::CertificateData(role), Some(stored)),
                (SettingKey::CertificatePassphrase(role), stored_passphrase),
                (SettingKey::PendingKey(role), None),
                (SettingKey::Csr(role), None),
            ])
            .await?;

        let info = material.info();
        tracing::info!(%role, thumbprint = %info.thumbprint, subject = %info.subject, "certificate installed");
        Ok(info)
    }

    async fn pending_key(&self, role: CertificateRole) -> Result<Option<PendingKey>> {
        let Some(encoded) = self.db.get_setting(SettingKey::PendingKey(role)).await? else {
            return Ok(None);
        };
        PendingKey::from_base64(&encoded)
            .map(Some)
            .map_err(|e| BrokerError::certificate("Stored CSR key is unreadable", &e))
    }

    /// The installed certificate and key for `role`.
    pub async fn material(&self, role: CertificateRole) -> Result<Option<CertificateMaterial>> {
        let Some(encoded) = self.db.get_setting(SettingKey::CertificateData(role)).await? else {
            return Ok(None);
        };
        let passphrase = self
            .db
            .get_setting(SettingKey::CertificatePassphrase(role))
            .await?;
        let bytes = STANDARD.decode(encoded.trim()).map_err(|e| {
            BrokerError::Certificate(format!("Stored {role} is unreadable: {e}"))
        })?;
        parse_certificate_material(&bytes, passphrase.as_deref())
            .map(Some)
            .map_err(|e| BrokerError::certificate(format!("Stored {role} is unreadable"), &e))
    }

    pub async fn info(&self, role: CertificateRole) -> Result<CertificateInfo> {
        self.material(role)
            .await?
            .map(|m| m.info())
            .ok_or_else(|| {
                let msg = format!("{} certificate not found.", role_label(role));
                tracing::error!("{msg}");
                BrokerError::NotFound(msg)
            })
    }

    pub async fn thumbprint(&self, role: CertificateRole) -> Result<Option<String>> {
        Ok(self
            .material(role)
            .await?
            .map(|m| m.certificate().thumbprint().to_string()))
    }

    /// Remove the installed certificate. The server role immediately falls
    /// back to a fresh self-signed default.
    pub async fn remove(&self, role: CertificateRole) -> Result<()> {
        self.db
            .apply_settings(&[
                (SettingKey::CertificateData(role), None),
                (SettingKey::CertificatePassphrase(role), None),
            ])
            .await?;
        tracing::info!(%role, "certificate removed");
        if role == CertificateRole::Server {
            self.install_default_server_certificate().await?;
        }
        Ok(())
    }

    /// Install the default server certificate unless one is present.
    pub async fn ensure_server_certificate(&self) -> Result<()> {
        if self
            .db
            .get_setting(SettingKey::CertificateData(CertificateRole::Server))
            .await?
            .is_none()
        {
            self.install_default_server_certificate().await?;
        }
        Ok(())
    }

    async fn install_default_server_certificate(&self) -> Result<()> {
        let instance_id = self.db.instance_id().await?;
        let material = generate_default_server_certificate(&instance_id, &[])
            .map_err(|e| BrokerError::certificate("Failed to create the default server certificate", &e))?;
        let pfx = material
            .to_pfx("")
            .map_err(|e| BrokerError::certificate("Failed to create the default server certificate", &e))?;
        self.db
            .apply_settings(&[
                (
                    SettingKey::CertificateData(CertificateRole::Server),
                    Some(STANDARD.encode(pfx)),
                ),
                (SettingKey::CertificatePassphrase(CertificateRole::Server), None),
            ])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use vaultlink_crypto::test_utils::{TestCa, expired_for_role, self_signed_for_role};

    async fn manager() -> (CertificateManager, ConfigDatabase) {
        let db = ConfigDatabase::open_in_memory().await.unwrap();
        (CertificateManager::new(db.clone()), db)
    }

    #[tokio::test]
    async fn key_carrying_pem_bundle_installs_as_uploaded() {
        let (mgr, db) = manager().await;
        let (cert, key) = self_signed_for_role(CertificateRole::Client);
        let bundle = format!("{cert}{key}");

        let info = mgr
            .install(bundle.as_bytes(), None, CertificateRole::Client)
            .await
            .unwrap();
        assert_eq!(mgr.info(CertificateRole::Client).await.unwrap(), info);
        assert_eq!(
            db.get_setting(SettingKey::CertificateData(CertificateRole::Client))
                .await
                .unwrap(),
            Some(STANDARD.encode(bundle.as_bytes()))
        );
    }

    #[tokio::test]
    async fn wrong_role_is_rejected_without_side_effects() {
        let (mgr, _) = manager().await;
        let (cert, key) = self_signed_for_role(CertificateRole::Server);
        let err = mgr
            .install(format!("{cert}{key}").as_bytes(), None, CertificateRole::Client)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Certificate(_)));
        assert!(matches!(
            mgr.info(CertificateRole::Client).await,
            Err(BrokerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn expired_certificate_is_rejected() {
        let (mgr, _) = manager().await;
        let (cert, key) = expired_for_role(CertificateRole::Client);
        assert!(
            mgr.install(format!("{cert}{key}").as_bytes(), None, CertificateRole::Client)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn public_only_install_pairs_with_pending_key() {
        let (mgr, db) = manager().await;
        let csr = mgr
            .generate_csr(&CsrOptions::new(CertificateRole::Client))
            .await
            .unwrap();
        assert!(csr.starts_with("-----BEGIN CERTIFICATE REQUEST-----"));
        assert_eq!(mgr.last_csr(CertificateRole::Client).await.unwrap(), Some(csr));

        let encoded = db
            .get_setting(SettingKey::PendingKey(CertificateRole::Client))
            .await
            .unwrap()
            .unwrap();
        let pending = PendingKey::from_base64(&encoded).unwrap();
        let issued = TestCa::new().issue_for_pending_key(&pending, CertificateRole::Client);

        let info = mgr
            .install(issued.as_bytes(), None, CertificateRole::Client)
            .await
            .unwrap();
        let material = mgr.material(CertificateRole::Client).await.unwrap().unwrap();
        assert!(material.has_private_key());
        assert_eq!(material.info(), info);
        assert_eq!(
            db.get_setting(SettingKey::PendingKey(CertificateRole::Client))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn public_only_install_without_pending_key_reports_mismatch() {
        let (mgr, _) = manager().await;
        mgr.generate_csr(&CsrOptions::new(CertificateRole::Client))
            .await
            .unwrap();
        let (cert, _) = self_signed_for_role(CertificateRole::Server);
        let err = mgr
            .install(cert.as_bytes(), None, CertificateRole::Server)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("mismatched CSR type"));
    }

    #[tokio::test]
    async fn removing_the_server_certificate_regenerates_a_default() {
        let (mgr, _) = manager().await;
        mgr.ensure_server_certificate().await.unwrap();
        let first = mgr.info(CertificateRole::Server).await.unwrap();
        assert!(first.subject.contains("-Server"));

        mgr.remove(CertificateRole::Server).await.unwrap();
        let second = mgr.info(CertificateRole::Server).await.unwrap();
        assert_ne!(first.thumbprint, second.thumbprint);

        mgr.remove(CertificateRole::Client).await.unwrap();
        assert!(mgr.thumbprint(CertificateRole::Client).await.unwrap().is_none());
    }
}
