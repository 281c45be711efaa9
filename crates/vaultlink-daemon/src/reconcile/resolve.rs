//! Shared lookup for resources the broker caches ids for.

use reqwest::Method;
use serde::de::DeserializeOwned;

use super::Reconciler;
use crate::appliance::{MachineIdentity, Registration, Service};
use crate::error::{BrokerError, Result};
use crate::storage::SettingKey;

/// An appliance collection of named resources.
pub(super) struct Collection {
    pub path: &'static str,
    pub name_field: &'static str,
    pub label: &'static str,
}

pub(super) const USERS: Collection = Collection {
    path: "Users",
    name_field: "UserName",
    label: "machine identity",
};

pub(super) const REGISTRATIONS: Collection = Collection {
    path: "A2ARegistrations",
    name_field: "AppName",
    label: "registration",
};

pub(super) trait Resource: DeserializeOwned {
    fn id(&self) -> i64;
}

impl Resource for MachineIdentity {
    fn id(&self) -> i64 {
        self.id
    }
}

impl Resource for Registration {
    fn id(&self) -> i64 {
        self.id
    }
}

impl Reconciler<'_> {
    /// Find a resource by its cached id, falling back to its deterministic
    /// name. A cached id the appliance no longer knows is cleared; a
    /// resource found by name has its id cached.
    pub(super) async fn resolve<T: Resource>(
        &self,
        collection: &Collection,
        id_key: SettingKey,
        name: &str,
    ) -> Result<Option<T>> {
        if let Some(id) = self.db.get_id(id_key).await? {
            let path = format!("{}/{id}", collection.path);
            match self.conn.invoke(Service::Core, Method::GET, &path, None, &[]).await {
                Ok(resp) => {
                    return resp.json().map(Some).map_err(|e| {
                        BrokerError::remote(format!("Failed to read the {} {id}", collection.label), &e)
                    });
                }
                Err(e) if e.is_not_found() => {
                    tracing::warn!(label = collection.label, id, "cached id is stale, clearing it");
                    self.db.delete_setting(id_key).await?;
                }
                Err(e) => {
                    return Err(BrokerError::remote(
                        format!("Failed to get the {} for id '{id}'", collection.label),
                        &e,
                    ));
                }
            }
        }

        let filter = format!("{} eq '{name}'", collection.name_field);
        let found: Vec<T> = self
            .conn
            .invoke(
                Service::Core,
                Method::GET,
                collection.path,
                None,
                &[("filter", filter.as_str())],
            )
            .await
            .and_then(|resp| resp.json())
            .map_err(|e| {
                BrokerError::remote(format!("Failed to find the {} '{name}'", collection.label), &e)
            })?;

        let Some(resource) = found.into_iter().next() else {
            tracing::debug!(label = collection.label, name, "not found on the appliance");
            return Ok(None);
        };
        self.db.set_setting(id_key, &resource.id().to_string()).await?;
        tracing::debug!(label = collection.label, name, id = resource.id(), "found by name");
        Ok(Some(resource))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::test_support::Fixture;
    use super::*;

    #[tokio::test]
    async fn found_by_name_caches_the_id() {
        let f = Fixture::new().await;
        let id = f.fake.insert_user(&MachineIdentity {
            user_name: "someone".into(),
            ..MachineIdentity::default()
        });
        let r = f.reconciler().await;

        let user: MachineIdentity = r
            .resolve(&USERS, SettingKey::IdentityId, "someone")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.id, id);
        assert_eq!(f.db.get_id(SettingKey::IdentityId).await.unwrap(), Some(id));

        // Second lookup goes straight to the id.
        r.resolve::<MachineIdentity>(&USERS, SettingKey::IdentityId, "someone")
            .await
            .unwrap();
        assert_eq!(f.fake.count_calls(&Method::GET, &format!("Users/{id}")), 1);
    }

    #[tokio::test]
    async fn stale_id_is_cleared() {
        let f = Fixture::new().await;
        f.db.set_setting(SettingKey::IdentityId, "999").await.unwrap();
        let r = f.reconciler().await;

        let found: Option<MachineIdentity> =
            r.resolve(&USERS, SettingKey::IdentityId, "missing").await.unwrap();
        assert!(found.is_none());
        assert_eq!(f.db.get_id(SettingKey::IdentityId).await.unwrap(), None);
    }

    #[tokio::test]
    async fn other_failures_keep_the_cached_id() {
        let f = Fixture::new().await;
        f.db.set_setting(SettingKey::IdentityId, "5").await.unwrap();
        f.fake.fail_on(Method::GET, "Users/5", 500);
        let r = f.reconciler().await;

        let err = r
            .resolve::<MachineIdentity>(&USERS, SettingKey::IdentityId, "x")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 502);
        assert_eq!(f.db.get_id(SettingKey::IdentityId).await.unwrap(), Some(5));
    }
}
