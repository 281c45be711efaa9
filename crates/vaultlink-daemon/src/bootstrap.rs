//! Trust bootstrap and login validation.
//!
//! Binding to an appliance needs its token-signing certificate, but that
//! certificate can only be fetched before any TLS trust exists. The
//! candidate certificate is therefore fetched without TLS validation and
//! only becomes durable once a caller-supplied token verifies against it and
//! the token's user turns out to be an administrator.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use vaultlink_crypto::{BearerToken, SigningCertificate, extract_signing_certificate, verify_token};

use crate::appliance::{
    ApplianceAvailability, ApplianceDescriptor, ApplianceTransport, ConnectRequest, LoggedInUser,
    Service, TlsPolicy,
};
use crate::error::{BrokerError, Result};
use crate::session::ActiveSession;
use crate::storage::{ConfigDatabase, SettingKey};
use crate::trust::TrustStore;

const INVALID_TOKEN: &str = "Invalid authorization token.";
const AUTHORIZATION_FAILED: &str = "Authorization Failed: Invalid token";
const CANNOT_REPURPOSE: &str = "Invalid token. The previously configured instance cannot be repurposed until the configuration is deleted.";

/// Appliance binding requested by an administrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplianceRequest {
    pub address: String,
    pub api_version: Option<u32>,
    pub ignore_ssl: Option<bool>,
}

/// The persisted appliance binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplianceBinding {
    pub address: String,
    pub api_version: u32,
    pub ignore_ssl: bool,
}

pub struct Bootstrap<'a> {
    db: &'a ConfigDatabase,
    trust: &'a TrustStore,
    transport: &'a dyn ApplianceTransport,
    default_api_version: u32,
}

impl<'a> Bootstrap<'a> {
    pub fn new(
        db: &'a ConfigDatabase,
        trust: &'a TrustStore,
        transport: &'a dyn ApplianceTransport,
        default_api_version: u32,
    ) -> Self {
        Self {
            db,
            trust,
            transport,
            default_api_version,
        }
    }

    pub async fn binding(&self) -> Result<Option<ApplianceBinding>> {
        let Some(address) = self.db.get_setting(SettingKey::ApplianceAddress).await? else {
            return Ok(None);
        };
        let api_version = self
            .db
            .get_parsed(SettingKey::ApiVersion)
            .await?
            .unwrap_or(self.default_api_version);
        let ignore_ssl = self
            .db
            .get_parsed(SettingKey::IgnoreSsl)
            .await?
            .unwrap_or(false);
        Ok(Some(ApplianceBinding {
            address,
            api_version,
            ignore_ssl,
        }))
    }

    /// Bind to the appliance at `request.address`, establishing trust in its
    /// signing certificate. On any failure the stored configuration is left
    /// untouched.
    pub async fn set_appliance(
        &self,
        token: &BearerToken,
        request: &ApplianceRequest,
    ) -> Result<ActiveSession> {
        if token.is_empty() {
            return Err(BrokerError::Unauthorized(INVALID_TOKEN.into()));
        }
        let address = request.address.trim();
        if address.is_empty() {
            return Err(BrokerError::Configuration("Missing appliance address.".into()));
        }

        if let Some(existing) = self.binding().await? {
            let current = match self.trust.signing_certificate().await? {
                Some(cert) => cert,
                None => self.fetch_signing_certificate(&existing.address).await?,
            };
            if !verify_token(token.as_str(), &current) {
                let msg = if existing.address == address {
                    AUTHORIZATION_FAILED
                } else {
                    CANNOT_REPURPOSE
                };
                tracing::error!(configured = %existing.address, requested = address, "{msg}");
                return Err(BrokerError::Unauthorized(msg.into()));
            }
        }

        if request.ignore_ssl == Some(false) && !self.trust.has_trusted_certificates().await? {
            return Err(BrokerError::Configuration(
                "Cannot enforce TLS validation before adding trusted certificates.".into(),
            ));
        }

        let api_version = request.api_version.unwrap_or(self.default_api_version);
        let ignore_ssl = request.ignore_ssl.unwrap_or(false);
        let appliance = self.probe(address, api_version, ignore_ssl).await?;

        let candidate = self.fetch_signing_certificate(address).await?;
        if !verify_token(token.as_str(), &candidate) {
            return Err(BrokerError::Unauthorized(AUTHORIZATION_FAILED.into()));
        }
        let user = self.authorize(token, &appliance).await?;

        self.db
            .apply_settings(&[
                (
                    SettingKey::SigningCertificate,
                    Some(candidate.certificate().to_base64()),
                ),
                (SettingKey::ApplianceAddress, Some(address.to_string())),
                (SettingKey::ApiVersion, Some(api_version.to_string())),
                (SettingKey::IgnoreSsl, Some(ignore_ssl.to_string())),
            ])
            .await?;
        tracing::info!(
            address,
            appliance_id = %appliance.appliance_id,
            signing_thumbprint = candidate.certificate().thumbprint(),
            "appliance trust established"
        );

        Ok(ActiveSession {
            token: token.clone(),
            appliance,
            user,
        })
    }

    /// Check `token` against the stored signing certificate and confirm its
    /// user is an administrator of the bound appliance.
    pub async fn validate_login(&self, token: &BearerToken) -> Result<ActiveSession> {
        if token.is_empty() {
            return Err(BrokerError::Unauthorized(INVALID_TOKEN.into()));
        }
        let binding = self.binding().await?.ok_or_else(|| {
            BrokerError::Configuration("Missing appliance configuration.".into())
        })?;
        let Some(signing) = self.trust.signing_certificate().await? else {
            return Err(BrokerError::Unauthorized(AUTHORIZATION_FAILED.into()));
        };
        if !verify_token(token.as_str(), &signing) {
            return Err(BrokerError::Unauthorized(AUTHORIZATION_FAILED.into()));
        }

        let appliance = self
            .probe(&binding.address, binding.api_version, binding.ignore_ssl)
            .await?;
        let user = self.authorize(token, &appliance).await?;
        Ok(ActiveSession {
            token: token.clone(),
            appliance,
            user,
        })
    }

    /// Anonymous availability query.
    pub async fn probe(
        &self,
        address: &str,
        api_version: u32,
        ignore_ssl: bool,
    ) -> Result<ApplianceDescriptor> {
        let contact_error =
            |e: &crate::appliance::TransportError| BrokerError::Remote(format!("Failed to contact the appliance at '{address}': {e}"));
        let tls = self.trust.tls_policy(ignore_ssl).await?;
        let conn = self
            .transport
            .connect(ConnectRequest {
                address: address.to_string(),
                credential: None,
                api_version,
                tls,
            })
            .await
            .map_err(|e| contact_error(&e))?;
        let availability: ApplianceAvailability = conn
            .invoke(Service::Notification, Method::GET, "Status/Availability", None, &[])
            .await
            .and_then(|resp| resp.json())
            .map_err(|e| contact_error(&e))?;
        Ok(ApplianceDescriptor::from_availability(
            address,
            api_version,
            ignore_ssl,
            availability,
        ))
    }

    async fn fetch_signing_certificate(&self, address: &str) -> Result<SigningCertificate> {
        let xml = self
            .transport
            .fetch_federation_metadata(address)
            .await
            .map_err(|e| {
                BrokerError::Remote(format!(
                    "Failed to fetch the federation metadata from '{address}': {e}"
                ))
            })?;
        extract_signing_certificate(&xml).map_err(|e| {
            BrokerError::certificate(format!("No signing certificate in the metadata from '{address}'"), &e)
        })
    }

    async fn authorize(
        &self,
        token: &BearerToken,
        appliance: &ApplianceDescriptor,
    ) -> Result<LoggedInUser> {
        let tls = if appliance.ignore_tls_validation {
            TlsPolicy::Insecure
        } else {
            self.trust.tls_policy(false).await?
        };
        let conn = self
            .transport
            .connect(ConnectRequest {
                address: appliance.address.clone(),
                credential: Some(token.clone()),
                api_version: appliance.api_version,
                tls,
            })
            .await
            .map_err(|e| BrokerError::remote("Failed to get the user information", &e))?;
        let user: LoggedInUser = conn
            .invoke(Service::Core, Method::GET, "Me", None, &[])
            .await
            .and_then(|resp| resp.json())
            .map_err(|e| BrokerError::remote("Failed to get the user information", &e))?;
        if !user.is_admin() {
            tracing::warn!(user = %user.user_name, "login rejected: missing administrator role");
            return Err(BrokerError::Unauthorized(format!(
                "User '{}' must hold the ApplianceAdmin or OperationsAdmin role.",
                user.user_name
            )));
        }
        Ok(user)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::appliance::fake::FakeAppliance;
    use vaultlink_crypto::test_utils::{SigningFixture, TestCa, federation_metadata};

    struct Harness {
        db: ConfigDatabase,
        trust: TrustStore,
        fake: FakeAppliance,
        signer: SigningFixture,
    }

    impl Harness {
        async fn new() -> Self {
            let db = ConfigDatabase::open_in_memory().await.unwrap();
            let fake = FakeAppliance::new();
            let signer = SigningFixture::new();
            fake.set_federation_metadata(federation_metadata(&signer.certificate_pem));
            Self {
                trust: TrustStore::new(db.clone()),
                db,
                fake,
                signer,
            }
        }

        fn bootstrap(&self) -> Bootstrap<'_> {
            Bootstrap::new(&self.db, &self.trust, &self.fake, 3)
        }

        fn token(&self) -> BearerToken {
            BearerToken::new(self.signer.sign_token("admin"))
        }
    }

    fn request(address: &str) -> ApplianceRequest {
        ApplianceRequest {
            address: address.into(),
            ..ApplianceRequest::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_persists_binding_and_signing_certificate() {
        let h = Harness::new().await;
        let session = h
            .bootstrap()
            .set_appliance(&h.token(), &request("spp.test"))
            .await
            .unwrap();
        assert_eq!(session.appliance.appliance_name, "spp-test");
        assert_eq!(session.user.user_name, "admin");

        let binding = h.bootstrap().binding().await.unwrap().unwrap();
        assert_eq!(
            binding,
            ApplianceBinding {
                address: "spp.test".into(),
                api_version: 3,
                ignore_ssl: false,
            }
        );
        assert_eq!(
            h.db.get_setting(SettingKey::SigningCertificate).await.unwrap(),
            Some(h.signer.certificate_base64())
        );
    }

    #[tokio::test]
    async fn token_from_another_signer_is_rejected_without_side_effects() {
        let h = Harness::new().await;
        let stranger = SigningFixture::new();
        let err = h
            .bootstrap()
            .set_appliance(&BearerToken::new(stranger.sign_token("admin")), &request("spp.test"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Unauthorized(_)));
        assert!(h.bootstrap().binding().await.unwrap().is_none());
        assert!(h.trust.signing_certificate().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_admin_users_cannot_bootstrap() {
        let h = Harness::new().await;
        h.fake.set_admin_roles(&["Auditor"]);
        let err = h
            .bootstrap()
            .set_appliance(&h.token(), &request("spp.test"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
        assert!(h.bootstrap().binding().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_token_and_unreachable_appliance() {
        let h = Harness::new().await;
        let err = h
            .bootstrap()
            .set_appliance(&BearerToken::new(""), &request("spp.test"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), INVALID_TOKEN);

        h.fake.set_reachable(false);
        let err = h
            .bootstrap()
            .set_appliance(&h.token(), &request("spp.test"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to contact the appliance at 'spp.test'"));
    }

    #[tokio::test]
    async fn tls_validation_requires_trusted_certificates() {
        let h = Harness::new().await;
        let req = ApplianceRequest {
            address: "spp.test".into(),
            api_version: Some(4),
            ignore_ssl: Some(false),
        };
        let err = h.bootstrap().set_appliance(&h.token(), &req).await.unwrap_err();
        assert!(matches!(err, BrokerError::Configuration(_)));

        h.trust.add(&TestCa::new().certificate_pem).await.unwrap();
        h.bootstrap().set_appliance(&h.token(), &req).await.unwrap();
        let last = h.fake.connects().pop().unwrap();
        assert!(matches!(last.tls, TlsPolicy::Pinned(ref pems) if pems.len() == 1));
        assert_eq!(h.bootstrap().binding().await.unwrap().unwrap().api_version, 4);
    }

    #[tokio::test]
    async fn repointing_requires_a_token_from_the_current_signer() {
        let h = Harness::new().await;
        h.bootstrap()
            .set_appliance(&h.token(), &request("spp.test"))
            .await
            .unwrap();

        // The new appliance signs with a different key.
        let other = SigningFixture::new();
        h.fake
            .set_federation_metadata(federation_metadata(&other.certificate_pem));
        let foreign = BearerToken::new(other.sign_token("admin"));

        let err = h
            .bootstrap()
            .set_appliance(&foreign, &request("spp-2.test"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), CANNOT_REPURPOSE);
        let err = h
            .bootstrap()
            .set_appliance(&foreign, &request("spp.test"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), AUTHORIZATION_FAILED);

        let binding = h.bootstrap().binding().await.unwrap().unwrap();
        assert_eq!(binding.address, "spp.test");
        assert_eq!(
            h.db.get_setting(SettingKey::SigningCertificate).await.unwrap(),
            Some(h.signer.certificate_base64())
        );
    }

    #[tokio::test]
    async fn validate_login_uses_stored_certificate() {
        let h = Harness::new().await;
        let err = h.bootstrap().validate_login(&h.token()).await.unwrap_err();
        assert!(matches!(err, BrokerError::Configuration(_)));

        h.bootstrap()
            .set_appliance(&h.token(), &request("spp.test"))
            .await
            .unwrap();
        let fetches = h.fake.metadata_fetches().len();

        let session = h.bootstrap().validate_login(&h.token()).await.unwrap();
        assert_eq!(session.appliance.address, "spp.test");
        assert_eq!(h.fake.metadata_fetches().len(), fetches);

        let forged = BearerToken::new(SigningFixture::new().sign_token("admin"));
        assert!(matches!(
            h.bootstrap().validate_login(&forged).await,
            Err(BrokerError::Unauthorized(_))
        ));
    }
}
