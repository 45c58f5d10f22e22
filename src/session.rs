//! The session object that owns one credential, one refresh coordinator and
//! one task launcher.

use std::sync::Arc;

use automation_api::{AutomationApiClient, Transport};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::calibration::CalibrationMachine;
use crate::config::ClientConfig;
use crate::credential::{Credential, CredentialSnapshot, CredentialStore, SessionGrant};
use crate::error::ClientError;
use crate::guard::NavigationGuard;
use crate::launcher::TaskLauncher;
use crate::notify::{notify_error, NotificationKind, NotificationSink};
use crate::poll::{PollHandle, PollScheduler};
use crate::refresh::RefreshCoordinator;
use crate::routines::RoutineClient;
use crate::task::{Task, TaskRequest};

pub struct Session {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    launcher: Arc<TaskLauncher>,
    sink: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("authenticated", &self.store.is_authenticated())
            .field("launcher", &self.launcher)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let store = Arc::new(CredentialStore::new());
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&transport),
            Arc::clone(&store),
            config.identity.clone(),
            Arc::clone(&sink),
        ));
        let launcher = Arc::new(TaskLauncher::new(
            Arc::clone(&coordinator),
            PollScheduler::new(config.poll_config()),
            Arc::clone(&sink),
        ));
        Self {
            config,
            transport,
            store,
            coordinator,
            launcher,
            sink,
        }
    }

    /// Builds a session over the HTTP client described by `config`.
    pub fn connect(
        config: ClientConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, ClientError> {
        let client = AutomationApiClient::new(config.api_config())?;
        Ok(Self::new(config, Arc::new(client), sink))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn launcher(&self) -> &Arc<TaskLauncher> {
        &self.launcher
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    /// Signs in with the configured identity provider.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<CredentialSnapshot, ClientError> {
        let result = self.login_inner(username, password).await;
        match &result {
            Ok(_) => self.sink.notify(NotificationKind::Success, "Signed in"),
            Err(error) => notify_error(self.sink.as_ref(), error),
        }
        result
    }

    async fn login_inner(
        &self,
        username: &str,
        password: &str,
    ) -> Result<CredentialSnapshot, ClientError> {
        if username.trim().is_empty() {
            return Err(ClientError::validation("username must not be empty"));
        }
        if password.is_empty() {
            return Err(ClientError::validation("password must not be empty"));
        }

        let call = self.config.identity.login_call(username.trim(), password);
        let response = self.transport.dispatch(&call.request, None).await?;
        if !response.is_success() {
            return Err(ClientError::backend(response.status, response.error_message()));
        }
        let grant: SessionGrant = response.decode(&call.request.path)?;
        Ok(self.install_grant(grant))
    }

    /// Adopts a session object issued by the hosted identity provider.
    pub fn login_with_session(&self, grant: SessionGrant) -> CredentialSnapshot {
        let snapshot = self.install_grant(grant);
        self.sink.notify(NotificationKind::Success, "Signed in");
        snapshot
    }

    fn install_grant(&self, grant: SessionGrant) -> CredentialSnapshot {
        let snapshot = self
            .store
            .install(Credential::from_grant(grant, OffsetDateTime::now_utc()));
        info!(generation = snapshot.generation, "signed in");
        snapshot
    }

    /// Signs out locally and tells the identity provider. A failed remote
    /// logout still clears the local credential.
    pub async fn logout(&self) {
        if let Some(access_token) = self.store.access_token() {
            let call = self.config.identity.logout_call(&access_token);
            match self.transport.dispatch(&call.request, call.bearer.as_deref()).await {
                Ok(response) if !response.is_success() => {
                    warn!(status = %response.status, "remote logout rejected");
                }
                Ok(_) => {}
                Err(error) => warn!(error = %error, "remote logout failed"),
            }
        }
        self.store.clear();
        info!("signed out");
        self.sink.notify(NotificationKind::Info, "Signed out");
    }

    /// Starts recording `routine_name` and polls it to completion.
    pub async fn record(
        &self,
        routine_name: &str,
        tokens_per_run: Option<u32>,
    ) -> Result<(Task, PollHandle), ClientError> {
        self.launcher
            .start_and_watch(TaskRequest::record(routine_name, tokens_per_run))
            .await
    }

    /// Starts playing back `routine_name` and polls it to completion.
    pub async fn play(&self, routine_name: &str) -> Result<(Task, PollHandle), ClientError> {
        self.launcher
            .start_and_watch(TaskRequest::playback(routine_name))
            .await
    }

    pub async fn cancel(&self, task_id: &str) -> Result<(), ClientError> {
        self.launcher.cancel_task(task_id).await
    }

    pub fn calibration(&self) -> CalibrationMachine {
        CalibrationMachine::new(Arc::clone(&self.launcher), Arc::clone(&self.sink))
    }

    pub fn navigation_guard(&self) -> NavigationGuard {
        NavigationGuard::new(Arc::clone(&self.launcher))
    }

    pub fn routines(&self) -> RoutineClient {
        RoutineClient::new(Arc::clone(&self.coordinator), Arc::clone(&self.sink))
    }

    /// Stops all polling and discards tracked tasks. The credential is kept.
    pub fn teardown(&self) -> Vec<Task> {
        self.launcher.shutdown()
    }
}
