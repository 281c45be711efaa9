//! Registration deletion.
//!
//! Each step runs even when an earlier one failed; failures are collected in
//! the report. Running it again after a partial failure picks up where the
//! previous run stopped.

use std::fmt::Display;

use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::Reconciler;
use crate::appliance::{RegistrationKind, Service};
use crate::error::Result;
use crate::storage::SettingKey;

/// Outcome of [`Reconciler::delete_registration`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownReport {
    pub kind: RegistrationKind,
    /// The registration no longer exists on the appliance.
    pub registration_deleted: bool,
    /// The machine identity was deleted because no registration is left.
    pub identity_deleted: bool,
    pub failures: Vec<String>,
}

impl TeardownReport {
    const fn new(kind: RegistrationKind) -> Self {
        Self {
            kind,
            registration_deleted: false,
            identity_deleted: false,
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, step: &str, err: impl Display) {
        let failure = format!("{step}: {err}");
        tracing::error!(kind = %self.kind, "{failure}");
        self.failures.push(failure);
    }
}

impl Reconciler<'_> {
    /// Delete the `kind` registration and its local account mappings. The
    /// machine identity is deleted too once neither registration exists.
    pub async fn delete_registration(&self, kind: RegistrationKind) -> Result<TeardownReport> {
        let mut report = TeardownReport::new(kind);

        match self.registration(kind).await {
            Ok(Some(registration)) => {
                let path = format!("A2ARegistrations/{}", registration.id);
                match self.conn.invoke(Service::Core, Method::DELETE, &path, None, &[]).await {
                    Ok(_) => report.registration_deleted = true,
                    Err(e) if e.is_not_found() => report.registration_deleted = true,
                    Err(e) => report.fail(
                        &format!("Failed to delete the registration {}", registration.app_name),
                        e,
                    ),
                }
                if report.registration_deleted {
                    tracing::info!(%kind, id = registration.id, "registration deleted");
                }
            }
            Ok(None) => {
                tracing::debug!(%kind, "registration already absent");
                report.registration_deleted = true;
            }
            Err(e) => report.fail("Failed to look up the registration", e),
        }

        if !report.registration_deleted {
            return Ok(report);
        }
        if let Err(e) = self.db.delete_setting(SettingKey::registration_id(kind)).await {
            report.fail("Failed to clear the cached registration id", e);
        }
        if let Err(e) = self.db.delete_account_mappings(kind).await {
            report.fail("Failed to clear the account mappings", e);
        }

        match self.registration(kind.other()).await {
            Ok(None) => self.delete_machine_identity(&mut report).await,
            Ok(Some(_)) => {
                tracing::debug!(%kind, "other registration remains, keeping the machine identity");
            }
            Err(e) => report.fail(
                "Skipped deleting the machine identity, the other registration could not be checked",
                e,
            ),
        }
        Ok(report)
    }

    async fn delete_machine_identity(&self, report: &mut TeardownReport) {
        match self.machine_identity().await {
            Ok(Some(identity)) => {
                let path = format!("Users/{}", identity.id);
                match self.conn.invoke(Service::Core, Method::DELETE, &path, None, &[]).await {
                    Ok(_) => report.identity_deleted = true,
                    Err(e) if e.is_not_found() => report.identity_deleted = true,
                    Err(e) => {
                        report.fail(
                            &format!("Failed to delete the machine identity {}", identity.user_name),
                            e,
                        );
                        return;
                    }
                }
                tracing::info!(id = identity.id, "machine identity deleted");
            }
            Ok(None) => report.identity_deleted = true,
            Err(e) => {
                report.fail("Failed to look up the machine identity", e);
                return;
            }
        }

        if let Err(e) = self.db.delete_setting(SettingKey::IdentityId).await {
            report.fail("Failed to clear the cached machine identity id", e);
        }
        if let Err(e) = self.db.delete_all_account_mappings().await {
            report.fail("Failed to clear the account mappings", e);
        }
    }
}
