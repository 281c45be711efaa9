use reqwest::Method;

use super::Reconciler;
use super::resolve::REGISTRATIONS;
use crate::appliance::{Registration, RegistrationKind, Service};
use crate::error::{BrokerError, Result};
use crate::storage::SettingKey;

impl Reconciler<'_> {
    pub async fn registration(&self, kind: RegistrationKind) -> Result<Option<Registration>> {
        self.resolve(
            &REGISTRATIONS,
            SettingKey::registration_id(kind),
            &kind.app_name(&self.instance_id),
        )
        .await
    }

    /// Make sure the `kind` registration exists and belongs to the machine
    /// identity. A registration pointing at another user is repointed.
    pub async fn ensure_registration(&self, kind: RegistrationKind) -> Result<Registration> {
        let identity_id = self.db.get_id(SettingKey::IdentityId).await?.ok_or_else(|| {
            BrokerError::Configuration(format!(
                "Failed to create the {kind} registration due to missing machine identity"
            ))
        })?;

        match self.registration(kind).await? {
            None => self.create_registration(kind, identity_id).await,
            Some(registration) if registration.certificate_user_id == identity_id => Ok(registration),
            Some(mut registration) => {
                tracing::warn!(
                    %kind,
                    id = registration.id,
                    from = registration.certificate_user_id,
                    to = identity_id,
                    "repointing registration to the machine identity"
                );
                registration.certificate_user_id = identity_id;
                let body = serde_json::to_value(&registration).map_err(|e| {
                    BrokerError::Remote(format!("Failed to update the {kind} registration: {e}"))
                })?;
                self.conn
                    .invoke(
                        Service::Core,
                        Method::PUT,
                        &format!("A2ARegistrations/{}", registration.id),
                        Some(&body),
                        &[],
                    )
                    .await
                    .and_then(|resp| resp.json())
                    .map_err(|e| {
                        BrokerError::remote(format!("Failed to update the {kind} registration"), &e)
                    })
            }
        }
    }

    async fn create_registration(
        &self,
        kind: RegistrationKind,
        identity_id: i64,
    ) -> Result<Registration> {
        let registration = Registration {
            app_name: kind.app_name(&self.instance_id),
            certificate_user_id: identity_id,
            visible_to_certificate_users: true,
            ..Registration::default()
        };
        let context = format!("Failed to create the {kind} registration");
        let body = serde_json::to_value(&registration)
            .map_err(|e| BrokerError::Remote(format!("{context}: {e}")))?;
        let resp = self
            .conn
            .invoke(Service::Core, Method::POST, "A2ARegistrations", Some(&body), &[])
            .await
            .map_err(|e| BrokerError::remote(&context, &e))?;
        if resp.status != 201 {
            return Err(BrokerError::Remote(format!(
                "{context}: unexpected status {}",
                resp.status
            )));
        }
        let created: Registration = resp.json().map_err(|e| BrokerError::remote(&context, &e))?;
        self.db
            .set_setting(SettingKey::registration_id(kind), &created.id.to_string())
            .await?;
        tracing::info!(%kind, id = created.id, app_name = %created.app_name, "registration created");
        Ok(created)
    }
}
