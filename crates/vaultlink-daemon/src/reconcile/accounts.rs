use reqwest::Method;
use serde_json::json;

use super::Reconciler;
use crate::appliance::{AccountRef, RegistrationKind, RetrievableAccount, Service};
use crate::error::{BrokerError, Result};
use crate::storage::SettingKey;

impl Reconciler<'_> {
    async fn registration_id(&self, kind: RegistrationKind) -> Result<i64> {
        self.db
            .get_id(SettingKey::registration_id(kind))
            .await?
            .ok_or_else(|| {
                tracing::error!(%kind, "A2A registration not configured");
                BrokerError::Configuration("A2A registration not configured".into())
            })
    }

    pub async fn retrievable_accounts(&self, kind: RegistrationKind) -> Result<Vec<RetrievableAccount>> {
        let id = self.registration_id(kind).await?;
        self.conn
            .invoke(
                Service::Core,
                Method::GET,
                &format!("A2ARegistrations/{id}/RetrievableAccounts"),
                None,
                &[],
            )
            .await
            .and_then(|resp| resp.json())
            .map_err(|e| BrokerError::remote("Get retrievable accounts failed", &e))
    }

    /// `None` when the account is not retrievable through the registration.
    pub async fn retrievable_account(
        &self,
        kind: RegistrationKind,
        account_id: i64,
    ) -> Result<Option<RetrievableAccount>> {
        let id = self.registration_id(kind).await?;
        let path = format!("A2ARegistrations/{id}/RetrievableAccounts/{account_id}");
        match self.conn.invoke(Service::Core, Method::GET, &path, None, &[]).await {
            Ok(resp) => resp.json().map(Some).map_err(|e| {
                BrokerError::remote(format!("Get retrievable account failed for account id {account_id}"), &e)
            }),
            Err(e) if e.is_not_found() => {
                tracing::debug!(%kind, account_id, "retrievable account not found");
                Ok(None)
            }
            Err(e) => Err(BrokerError::remote(
                format!("Get retrievable account failed for account id {account_id}"),
                &e,
            )),
        }
    }

    /// Add each account to the registration. Individual failures are logged
    /// and skipped. Returns the registration's full account list.
    pub async fn add_retrievable_accounts(
        &self,
        kind: RegistrationKind,
        accounts: &[AccountRef],
    ) -> Result<Vec<RetrievableAccount>> {
        let id = self.registration_id(kind).await?;
        let path = format!("A2ARegistrations/{id}/RetrievableAccounts");
        for account in accounts {
            let body = json!({
                "AccountId": account.id,
                "IpRestrictions": self.ip_restrictions,
            });
            match self
                .conn
                .invoke(Service::Core, Method::POST, &path, Some(&body), &[])
                .await
            {
                Ok(_) => {
                    self.db
                        .upsert_account_mapping(kind, account.id, account.name.as_deref())
                        .await?;
                }
                Err(e) => tracing::error!(
                    %kind,
                    account_id = account.id,
                    account_name = account.name.as_deref().unwrap_or_default(),
                    error = %e,
                    "failed to add retrievable account"
                ),
            }
        }
        self.retrievable_accounts(kind).await
    }

    /// Remove each account from the registration. Individual failures are
    /// logged and skipped.
    pub async fn remove_retrievable_accounts(
        &self,
        kind: RegistrationKind,
        accounts: &[RetrievableAccount],
    ) -> Result<()> {
        let id = self.registration_id(kind).await?;
        if accounts.iter().all(|a| a.account_id == 0) {
            let msg = "Invalid list of accounts. Expecting a list of retrievable accounts.";
            tracing::error!("{msg}");
            return Err(BrokerError::Configuration(msg.into()));
        }

        for account in accounts.iter().filter(|a| a.account_id != 0) {
            let path = format!("A2ARegistrations/{id}/RetrievableAccounts/{}", account.account_id);
            match self.conn.invoke(Service::Core, Method::DELETE, &path, None, &[]).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    tracing::debug!(%kind, account_id = account.account_id, "account already removed");
                }
                Err(e) => {
                    tracing::error!(
                        %kind,
                        account_id = account.account_id,
                        error = %e,
                        "failed to remove retrievable account"
                    );
                    continue;
                }
            }
            self.db.delete_account_mapping(kind, account.account_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::test_support::{Fixture, THUMBPRINT};
    use super::*;

    async fn configured() -> Fixture {
        let f = Fixture::new().await;
        let r = f.reconciler().await;
        r.ensure_machine_identity(Some(THUMBPRINT)).await.unwrap();
        r.ensure_registration(RegistrationKind::Account).await.unwrap();
        f
    }

    fn account(id: i64) -> AccountRef {
        AccountRef {
            id,
            name: Some(format!("acct-{id}")),
        }
    }

    #[tokio::test]
    async fn unconfigured_registration_is_rejected() {
        let f = Fixture::new().await;
        let err = f
            .reconciler()
            .await
            .retrievable_accounts(RegistrationKind::Vault)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "A2A registration not configured");
    }

    #[tokio::test]
    async fn add_is_best_effort_and_returns_the_full_list() {
        let f = configured().await;
        let r = f.reconciler().await;
        let reg = f.db.get_id(SettingKey::AccountRegistrationId).await.unwrap().unwrap();
        f.fake.fail_on(Method::POST, &format!("A2ARegistrations/{reg}/RetrievableAccounts"), 500);
        assert!(r
            .add_retrievable_accounts(RegistrationKind::Account, &[account(1)])
            .await
            .unwrap()
            .is_empty());
        f.fake.clear_failures();

        let list = r
            .add_retrievable_accounts(RegistrationKind::Account, &[account(1), account(2)])
            .await
            .unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].ip_restrictions, vec!["10.0.0.5".to_string()]);
        assert_eq!(
            f.db.list_account_mappings(RegistrationKind::Account).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn get_one_maps_not_found_to_none() {
        let f = configured().await;
        let r = f.reconciler().await;
        r.add_retrievable_accounts(RegistrationKind::Account, &[account(7)])
            .await
            .unwrap();
        assert_eq!(
            r.retrievable_account(RegistrationKind::Account, 7)
                .await
                .unwrap()
                .unwrap()
                .account_id,
            7
        );
        assert!(r
            .retrievable_account(RegistrationKind::Account, 8)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn remove_rejects_lists_without_account_ids() {
        let f = configured().await;
        let r = f.reconciler().await;
        let err = r
            .remove_retrievable_accounts(RegistrationKind::Account, &[RetrievableAccount::default()])
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Invalid list of accounts"));
    }

    #[tokio::test]
    async fn remove_deletes_remote_and_local_entries() {
        let f = configured().await;
        let r = f.reconciler().await;
        let list = r
            .add_retrievable_accounts(RegistrationKind::Account, &[account(1), account(2)])
            .await
            .unwrap();

        r.remove_retrievable_accounts(RegistrationKind::Account, &list[..1])
            .await
            .unwrap();
        let remaining = r.retrievable_accounts(RegistrationKind::Account).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].account_id, 2);
        let mappings = f.db.list_account_mappings(RegistrationKind::Account).await.unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].account_id, 2);
    }
}
