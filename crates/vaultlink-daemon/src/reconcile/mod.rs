//! Reconciliation of the broker's appliance-side resources.
//!
//! The broker owns one machine identity and two registrations (account and
//! vault) on the appliance. Their ids are cached in the configuration store;
//! every operation re-resolves them so that a resource deleted or recreated
//! behind the broker's back is found again by name.

mod accounts;
mod identity;
mod registration;
mod resolve;
mod teardown;

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::appliance::{ApplianceConnection, ApplianceDescriptor, RegistrationKind, Service};
use crate::error::Result;
use crate::storage::ConfigDatabase;

pub use teardown::TeardownReport;

/// Snapshot of the broker's configuration on the appliance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfiguration {
    pub instance_id: String,
    pub appliance: ApplianceDescriptor,
    pub user_name: Option<String>,
    pub user_display_name: Option<String>,
    pub identity_provider_name: Option<String>,
    pub admin_roles: Vec<String>,
    pub account_registration_name: Option<String>,
    pub vault_registration_name: Option<String>,
    /// Thumbprint of the installed client certificate.
    pub thumbprint: Option<String>,
}

/// Runs reconciliation steps over one appliance connection.
pub struct Reconciler<'a> {
    db: &'a ConfigDatabase,
    conn: &'a dyn ApplianceConnection,
    instance_id: String,
    ip_restrictions: &'a [String],
}

impl<'a> Reconciler<'a> {
    pub async fn new(
        db: &'a ConfigDatabase,
        conn: &'a dyn ApplianceConnection,
        ip_restrictions: &'a [String],
    ) -> Result<Self> {
        let instance_id = db.instance_id().await?;
        Ok(Self {
            db,
            conn,
            instance_id,
            ip_restrictions,
        })
    }

    /// Turn on the appliance's A2A service. Failures are only logged.
    pub async fn enable_service(&self) {
        match self
            .conn
            .invoke(Service::Appliance, Method::POST, "A2AService/Enable", None, &[])
            .await
        {
            Ok(_) => tracing::debug!("A2A service enabled"),
            Err(e) => tracing::error!(error = %e, "failed to start the A2A service"),
        }
    }

    /// Create or repair the identity and both registrations, then enable the
    /// A2A service. Steps already applied are kept if a later one fails.
    pub async fn configure_service(
        &self,
        client_thumbprint: Option<&str>,
        appliance: &ApplianceDescriptor,
    ) -> Result<ServiceConfiguration> {
        self.ensure_machine_identity(client_thumbprint).await?;
        self.ensure_registration(RegistrationKind::Account).await?;
        self.ensure_registration(RegistrationKind::Vault).await?;
        self.enable_service().await;
        self.configuration(appliance, client_thumbprint).await
    }

    /// Current view of the appliance-side resources.
    pub async fn configuration(
        &self,
        appliance: &ApplianceDescriptor,
        client_thumbprint: Option<&str>,
    ) -> Result<ServiceConfiguration> {
        let identity = self.machine_identity().await?;
        let account = self.registration(RegistrationKind::Account).await?;
        let vault = self.registration(RegistrationKind::Vault).await?;

        let mut config = ServiceConfiguration {
            instance_id: self.instance_id.clone(),
            appliance: appliance.clone(),
            account_registration_name: account.map(|r| r.app_name),
            vault_registration_name: vault.map(|r| r.app_name),
            thumbprint: client_thumbprint.map(ToString::to_string),
            ..ServiceConfiguration::default()
        };
        if let Some(identity) = identity {
            config.user_name = Some(identity.user_name);
            config.user_display_name = identity.display_name;
            config.identity_provider_name = identity.identity_provider_name;
            config.admin_roles = identity.admin_roles;
        }
        Ok(config)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    #![allow(clippy::unwrap_used)]

    use vaultlink_crypto::BearerToken;

    use super::*;
    use crate::appliance::fake::FakeAppliance;
    use crate::appliance::{ApplianceTransport, ConnectRequest, TlsPolicy};

    pub const THUMBPRINT: &str = "AABBCCDDEEFF00112233445566778899AABBCCDD";

    pub struct Fixture {
        pub db: ConfigDatabase,
        pub fake: FakeAppliance,
        pub conn: Box<dyn ApplianceConnection>,
        pub ip_restrictions: Vec<String>,
    }

    impl Fixture {
        pub async fn new() -> Self {
            let db = ConfigDatabase::open_in_memory().await.unwrap();
            let fake = FakeAppliance::new();
            let conn = fake
                .connect(ConnectRequest {
                    address: "spp.test".into(),
                    credential: Some(BearerToken::new("t")),
                    api_version: 3,
                    tls: TlsPolicy::Insecure,
                })
                .await
                .unwrap();
            Self {
                db,
                fake,
                conn,
                ip_restrictions: vec!["10.0.0.5".into()],
            }
        }

        pub async fn reconciler(&self) -> Reconciler<'_> {
            Reconciler::new(&self.db, self.conn.as_ref(), &self.ip_restrictions)
                .await
                .unwrap()
        }
    }
}
