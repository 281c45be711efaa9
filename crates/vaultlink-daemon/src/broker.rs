//! Broker facade.
//!
//! Owns the configuration store, the appliance transport and the single
//! active session. Every entry point takes the session lock first, so
//! operations never interleave.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use vaultlink_core::Config;
use vaultlink_crypto::{BearerToken, CertificateInfo, CertificateRole, CsrOptions};

use crate::appliance::{
    AccountRef, ApplianceConnection, ApplianceDescriptor, ApplianceTransport, HttpTransport,
    Registration, RegistrationKind, RetrievableAccount,
};
use crate::bootstrap::{ApplianceBinding, ApplianceRequest, Bootstrap};
use crate::certificates::CertificateManager;
use crate::error::{BrokerError, Result};
use crate::reconcile::{Reconciler, ServiceConfiguration, TeardownReport};
use crate::restart::RestartPolicy;
use crate::session::SessionManager;
use crate::storage::ConfigDatabase;
use crate::trust::TrustStore;

pub struct Broker {
    db: ConfigDatabase,
    trust: TrustStore,
    certificates: CertificateManager,
    transport: Arc<dyn ApplianceTransport>,
    config: Config,
    restart: RestartPolicy,
    pending_restart: std::sync::Mutex<Option<JoinHandle<()>>>,
    sessions: Mutex<SessionManager>,
}

impl Broker {
    /// Build a broker over an open store. Installs the default server
    /// certificate if none is present.
    pub async fn new(
        db: ConfigDatabase,
        transport: Arc<dyn ApplianceTransport>,
        config: Config,
        restart: RestartPolicy,
    ) -> Result<Self> {
        let broker = Self {
            trust: TrustStore::new(db.clone()),
            certificates: CertificateManager::new(db.clone()),
            db,
            transport,
            config,
            restart,
            pending_restart: std::sync::Mutex::new(None),
            sessions: Mutex::new(SessionManager::new()),
        };
        broker.certificates.ensure_server_certificate().await?;
        Ok(broker)
    }

    /// Open the configured store and talk to the appliance over HTTPS.
    pub async fn open(config: Config, restart: RestartPolicy) -> Result<Self> {
        let path = config
            .resolved_database_path()
            .map_err(|e| BrokerError::Configuration(e.to_string()))?;
        let db = ConfigDatabase::open(&path).await?;
        let transport = Arc::new(HttpTransport::new(Duration::from_secs(
            config.appliance.request_timeout_secs,
        )));
        Self::new(db, transport, config, restart).await
    }

    fn bootstrap(&self) -> Bootstrap<'_> {
        Bootstrap::new(
            &self.db,
            &self.trust,
            self.transport.as_ref(),
            self.config.appliance.default_api_version,
        )
    }

    async fn connect(&self, sessions: &SessionManager) -> Result<Box<dyn ApplianceConnection>> {
        sessions
            .current()?
            .connect(self.transport.as_ref(), &self.trust)
            .await
    }

    async fn reconciler<'a>(&'a self, conn: &'a dyn ApplianceConnection) -> Result<Reconciler<'a>> {
        Reconciler::new(&self.db, conn, &self.config.appliance.ip_restrictions).await
    }

    pub async fn instance_id(&self) -> Result<String> {
        Ok(self.db.instance_id().await?)
    }

    // =========================================================================
    // Appliance binding and sessions
    // =========================================================================

    pub async fn binding(&self) -> Result<Option<ApplianceBinding>> {
        self.bootstrap().binding().await
    }

    /// Availability of the bound appliance, queried anonymously.
    pub async fn appliance(&self) -> Result<Option<ApplianceDescriptor>> {
        let _guard = self.sessions.lock().await;
        let bootstrap = self.bootstrap();
        let Some(binding) = bootstrap.binding().await? else {
            return Ok(None);
        };
        let mut descriptor = bootstrap
            .probe(&binding.address, binding.api_version, true)
            .await?;
        descriptor.ignore_tls_validation = binding.ignore_ssl;
        Ok(Some(descriptor))
    }

    /// Bind to an appliance and start a session for `token`.
    pub async fn set_appliance(
        &self,
        token: BearerToken,
        request: &ApplianceRequest,
    ) -> Result<ApplianceDescriptor> {
        let mut sessions = self.sessions.lock().await;
        let session = self.bootstrap().set_appliance(&token, request).await?;
        Ok(sessions.begin(session).appliance.clone())
    }

    /// Start a session for `token` against the bound appliance.
    pub async fn login(&self, token: BearerToken) -> Result<ApplianceDescriptor> {
        let mut sessions = self.sessions.lock().await;
        let session = self.bootstrap().validate_login(&token).await?;
        Ok(sessions.begin(session).appliance.clone())
    }

    pub async fn logout(&self) -> bool {
        self.sessions.lock().await.end()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.sessions.lock().await.is_logged_in()
    }

    // =========================================================================
    // Certificates
    // =========================================================================

    pub async fn generate_csr(&self, options: &CsrOptions) -> Result<String> {
        let _guard = self.sessions.lock().await;
        self.certificates.generate_csr(options).await
    }

    pub async fn install_certificate(
        &self,
        data: &[u8],
        passphrase: Option<&str>,
        role: CertificateRole,
    ) -> Result<CertificateInfo> {
        let _guard = self.sessions.lock().await;
        self.certificates.install(data, passphrase, role).await
    }

    pub async fn certificate_info(&self, role: CertificateRole) -> Result<CertificateInfo> {
        self.certificates.info(role).await
    }

    pub async fn remove_certificate(&self, role: CertificateRole) -> Result<()> {
        let _guard = self.sessions.lock().await;
        self.certificates.remove(role).await
    }

    // =========================================================================
    // Trusted certificates
    // =========================================================================

    pub async fn trusted_certificates(&self) -> Result<Vec<CertificateInfo>> {
        self.trust.list().await
    }

    pub async fn trusted_certificate(&self, thumbprint: &str) -> Result<CertificateInfo> {
        self.trust.get(thumbprint).await
    }

    pub async fn add_trusted_certificate(&self, data: &str) -> Result<CertificateInfo> {
        let _guard = self.sessions.lock().await;
        self.trust.add(data).await
    }

    pub async fn delete_trusted_certificate(&self, thumbprint: &str) -> Result<()> {
        let _guard = self.sessions.lock().await;
        self.trust.delete(thumbprint).await
    }

    pub async fn delete_all_trusted_certificates(&self) -> Result<u64> {
        let _guard = self.sessions.lock().await;
        self.trust.delete_all().await
    }

    /// Import the appliance's trusted certificates. Needs a session.
    pub async fn import_trusted_certificates(&self) -> Result<Vec<CertificateInfo>> {
        let sessions = self.sessions.lock().await;
        let conn = self.connect(&sessions).await?;
        self.trust.import_from_appliance(conn.as_ref()).await
    }

    // =========================================================================
    // Appliance-side resources (all need a session)
    // =========================================================================

    pub async fn configure_service(&self) -> Result<ServiceConfiguration> {
        let sessions = self.sessions.lock().await;
        let appliance = sessions.current()?.appliance.clone();
        let conn = self.connect(&sessions).await?;
        let thumbprint = self.certificates.thumbprint(CertificateRole::Client).await?;
        self.reconciler(conn.as_ref())
            .await?
            .configure_service(thumbprint.as_deref(), &appliance)
            .await
    }

    pub async fn configuration(&self) -> Result<ServiceConfiguration> {
        let sessions = self.sessions.lock().await;
        let appliance = sessions.current()?.appliance.clone();
        let conn = self.connect(&sessions).await?;
        let thumbprint = self.certificates.thumbprint(CertificateRole::Client).await?;
        self.reconciler(conn.as_ref())
            .await?
            .configuration(&appliance, thumbprint.as_deref())
            .await
    }

    pub async fn registration(&self, kind: RegistrationKind) -> Result<Option<Registration>> {
        let sessions = self.sessions.lock().await;
        let conn = self.connect(&sessions).await?;
        self.reconciler(conn.as_ref()).await?.registration(kind).await
    }

    pub async fn delete_registration(&self, kind: RegistrationKind) -> Result<TeardownReport> {
        let sessions = self.sessions.lock().await;
        let conn = self.connect(&sessions).await?;
        self.reconciler(conn.as_ref())
            .await?
            .delete_registration(kind)
            .await
    }

    pub async fn retrievable_accounts(
        &self,
        kind: RegistrationKind,
    ) -> Result<Vec<RetrievableAccount>> {
        let sessions = self.sessions.lock().await;
        let conn = self.connect(&sessions).await?;
        self.reconciler(conn.as_ref())
            .await?
            .retrievable_accounts(kind)
            .await
    }

    pub async fn retrievable_account(
        &self,
        kind: RegistrationKind,
        account_id: i64,
    ) -> Result<Option<RetrievableAccount>> {
        let sessions = self.sessions.lock().await;
        let conn = self.connect(&sessions).await?;
        self.reconciler(conn.as_ref())
            .await?
            .retrievable_account(kind, account_id)
            .await
    }

    pub async fn add_retrievable_accounts(
        &self,
        kind: RegistrationKind,
        accounts: &[AccountRef],
    ) -> Result<Vec<RetrievableAccount>> {
        let sessions = self.sessions.lock().await;
        let conn = self.connect(&sessions).await?;
        self.reconciler(conn.as_ref())
            .await?
            .add_retrievable_accounts(kind, accounts)
            .await
    }

    pub async fn remove_retrievable_accounts(
        &self,
        kind: RegistrationKind,
        accounts: &[RetrievableAccount],
    ) -> Result<()> {
        let sessions = self.sessions.lock().await;
        let conn = self.connect(&sessions).await?;
        self.reconciler(conn.as_ref())
            .await?
            .remove_retrievable_accounts(kind, accounts)
            .await
    }

    // =========================================================================
    // Reset
    // =========================================================================

    /// Drop every stored value, end the session and schedule a restart.
    pub async fn delete_configuration(&self) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        self.reset(&mut sessions).await
    }

    /// Remove the appliance-side resources and the client certificate, then
    /// reset. Teardown failures are reported but do not stop the reset.
    pub async fn delete_service_configuration(&self) -> Result<Vec<TeardownReport>> {
        let mut sessions = self.sessions.lock().await;
        let conn = self.connect(&sessions).await?;
        let reconciler = self.reconciler(conn.as_ref()).await?;
        let mut reports = Vec::with_capacity(RegistrationKind::ALL.len());
        for kind in RegistrationKind::ALL {
            reports.push(reconciler.delete_registration(kind).await?);
        }

        self.certificates.remove(CertificateRole::Client).await?;
        self.reset(&mut sessions).await?;
        Ok(reports)
    }

    async fn reset(&self, sessions: &mut SessionManager) -> Result<()> {
        self.db.drop_all().await?;
        sessions.end();
        self.certificates.ensure_server_certificate().await?;
        if let Some(handle) = self.restart.schedule() {
            *self
                .pending_restart
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }
        Ok(())
    }

    /// Wait for a restart scheduled by a reset. With restarts enabled this
    /// does not return: the process exits once the delay has passed.
    pub async fn wait_for_restart(&self) {
        let handle = self
            .pending_restart
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "scheduled restart did not run");
            }
        }
    }
}
