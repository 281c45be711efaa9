use reqwest::Method;
use serde_json::Value;

use super::Reconciler;
use super::resolve::USERS;
use crate::appliance::types::machine_identity_name;
use crate::appliance::{MachineIdentity, Service};
use crate::error::{BrokerError, Result};
use crate::storage::SettingKey;

impl Reconciler<'_> {
    pub async fn machine_identity(&self) -> Result<Option<MachineIdentity>> {
        self.resolve(&USERS, SettingKey::IdentityId, &machine_identity_name(&self.instance_id))
            .await
    }

    /// Make sure the machine identity exists and authenticates with the
    /// client certificate `client_thumbprint`.
    pub async fn ensure_machine_identity(
        &self,
        client_thumbprint: Option<&str>,
    ) -> Result<MachineIdentity> {
        let thumbprint = client_thumbprint.ok_or_else(|| {
            BrokerError::Configuration(
                "Failed to create the machine identity due to missing client certificate".into(),
            )
        })?;

        match self.machine_identity().await? {
            None => self.create_machine_identity(thumbprint).await,
            Some(identity)
                if identity
                    .primary_authentication_identity
                    .eq_ignore_ascii_case(thumbprint) =>
            {
                Ok(identity)
            }
            Some(mut identity) => {
                tracing::info!(id = identity.id, "updating machine identity certificate thumbprint");
                identity.primary_authentication_identity = thumbprint.to_string();
                let body = serde_json::to_value(&identity)
                    .map_err(|e| BrokerError::Remote(format!("Failed to update the machine identity: {e}")))?;
                self.conn
                    .invoke(Service::Core, Method::PUT, &format!("Users/{}", identity.id), Some(&body), &[])
                    .await
                    .and_then(|resp| resp.json())
                    .map_err(|e| BrokerError::remote("Failed to update the machine identity", &e))
            }
        }
    }

    async fn create_machine_identity(&self, thumbprint: &str) -> Result<MachineIdentity> {
        let identity = MachineIdentity {
            user_name: machine_identity_name(&self.instance_id),
            primary_authentication_identity: thumbprint.to_string(),
            ..MachineIdentity::default()
        };
        let body: Value = serde_json::to_value(&identity)
            .map_err(|e| BrokerError::Remote(format!("Failed to create the machine identity: {e}")))?;
        let resp = self
            .conn
            .invoke(Service::Core, Method::POST, "Users", Some(&body), &[])
            .await
            .map_err(|e| BrokerError::remote("Failed to create the machine identity", &e))?;
        if resp.status != 201 {
            return Err(BrokerError::Remote(format!(
                "Failed to create the machine identity: unexpected status {}",
                resp.status
            )));
        }
        let created: MachineIdentity = resp
            .json()
            .map_err(|e| BrokerError::remote("Failed to create the machine identity", &e))?;
        self.db
            .set_setting(SettingKey::IdentityId, &created.id.to_string())
            .await?;
        tracing::info!(id = created.id, user = %created.user_name, "machine identity created");
        Ok(created)
    }
}
