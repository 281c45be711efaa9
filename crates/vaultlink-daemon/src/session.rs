//! The single active appliance session.

use vaultlink_crypto::BearerToken;

use crate::appliance::{
    ApplianceConnection, ApplianceDescriptor, ApplianceTransport, ConnectRequest, LoggedInUser,
};
use crate::error::{BrokerError, Result};
use crate::trust::TrustStore;

/// An authenticated administrator session. The token is wiped when the
/// session is dropped.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub token: BearerToken,
    pub appliance: ApplianceDescriptor,
    pub user: LoggedInUser,
}

impl ActiveSession {
    /// Open a connection authenticated with this session's token.
    pub async fn connect(
        &self,
        transport: &dyn ApplianceTransport,
        trust: &TrustStore,
    ) -> Result<Box<dyn ApplianceConnection>> {
        let tls = trust.tls_policy(self.appliance.ignore_tls_validation).await?;
        transport
            .connect(ConnectRequest {
                address: self.appliance.address.clone(),
                credential: Some(self.token.clone()),
                api_version: self.appliance.api_version,
                tls,
            })
            .await
            .map_err(|e| {
                BrokerError::remote(
                    format!("Failed to connect to the appliance at '{}'", self.appliance.address),
                    &e,
                )
            })
    }
}

/// Holds at most one [`ActiveSession`].
#[derive(Debug, Default)]
pub struct SessionManager {
    active: Option<ActiveSession>,
}

impl SessionManager {
    pub const fn new() -> Self {
        Self { active: None }
    }

    /// Make `session` the active one, ending any previous session.
    pub fn begin(&mut self, session: ActiveSession) -> &ActiveSession {
        if let Some(previous) = self.active.take() {
            tracing::debug!(user = %previous.user.user_name, "ending previous session");
        }
        tracing::info!(user = %session.user.user_name, appliance = %session.appliance.address, "session started");
        self.active.insert(session)
    }

    /// Returns whether a session was active.
    pub fn end(&mut self) -> bool {
        self.active.take().is_some()
    }

    pub fn current(&self) -> Result<&ActiveSession> {
        self.active
            .as_ref()
            .ok_or_else(|| BrokerError::Unauthorized("Not logged in".into()))
    }

    pub const fn is_logged_in(&self) -> bool {
        self.active.is_some()
    }
}
