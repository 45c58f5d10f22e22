//! Bearer attachment and single-flight credential refresh.
//!
//! Every outbound call goes through [`RefreshCoordinator::send`]. When the
//! backend answers 401, callers attach to one shared refresh future keyed by
//! the credential generation they were sent with, so any number of concurrent
//! rejections produce exactly one call to the refresh endpoint.

use std::fmt;
use std::sync::{Arc, Mutex};

use automation_api::{ApiRequest, ApiResponse, Transport};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::credential::{Credential, CredentialSnapshot, CredentialStore, SessionGrant};
use crate::error::ClientError;
use crate::lock_unpoisoned;
use crate::notify::{NotificationKind, NotificationSink};

/// Where credentials are issued and refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentityProvider {
    /// The automation backend's own `/login`, `/refresh` and `/logout`.
    #[default]
    Native,
    /// A hosted identity service reached at `url` with a public `anon_key`.
    Hosted { url: String, anon_key: String },
}

/// A request to the identity provider together with the bearer it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityCall {
    pub request: ApiRequest,
    pub bearer: Option<String>,
}

impl IdentityProvider {
    pub fn login_call(&self, username: &str, password: &str) -> IdentityCall {
        match self {
            Self::Native => IdentityCall {
                request: ApiRequest::post("/login").with_body(json!({
                    "username": username,
                    "password": password,
                })),
                bearer: None,
            },
            Self::Hosted { url, anon_key } => IdentityCall {
                request: ApiRequest::post(hosted_endpoint(url, "token?grant_type=password"))
                    .with_header("apikey", anon_key.as_str())
                    .with_body(json!({
                        "email": username,
                        "password": password,
                    })),
                bearer: None,
            },
        }
    }

    pub fn refresh_call(&self, refresh_token: &str) -> IdentityCall {
        let body = json!({ "refresh_token": refresh_token });
        match self {
            Self::Native => IdentityCall {
                request: ApiRequest::post("/refresh").with_body(body),
                bearer: Some(refresh_token.to_string()),
            },
            Self::Hosted { url, anon_key } => IdentityCall {
                request: ApiRequest::post(hosted_endpoint(
                    url,
                    "token?grant_type=refresh_token",
                ))
                .with_header("apikey", anon_key.as_str())
                .with_body(body),
                bearer: None,
            },
        }
    }

    pub fn logout_call(&self, access_token: &str) -> IdentityCall {
        let request = match self {
            Self::Native => ApiRequest::post("/logout"),
            Self::Hosted { url, anon_key } => ApiRequest::post(hosted_endpoint(url, "logout"))
                .with_header("apikey", anon_key.as_str()),
        };
        IdentityCall {
            request,
            bearer: Some(access_token.to_string()),
        }
    }
}

fn hosted_endpoint(url: &str, suffix: &str) -> String {
    format!("{}/auth/v1/{suffix}", url.trim_end_matches('/'))
}

/// Why a refresh did not produce a new credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    MissingRefreshToken,
    Rejected { status: u16, message: String },
    Transport(String),
    /// The credential was cleared while the refresh was in flight.
    Cleared,
}

impl fmt::Display for RefreshFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRefreshToken => f.write_str("no refresh token is available"),
            Self::Rejected { status, message } => {
                write!(f, "refresh rejected (HTTP {status}): {message}")
            }
            Self::Transport(message) => write!(f, "refresh request failed: {message}"),
            Self::Cleared => f.write_str("credential was cleared during refresh"),
        }
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<CredentialSnapshot, RefreshFailure>>>;

struct RefreshSlot {
    from_generation: u64,
    future: RefreshFuture,
}

/// Attaches credentials to outbound calls and recovers from expiry.
///
/// Lock order is slot, then store. Neither lock is held across an await.
pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    identity: IdentityProvider,
    sink: Arc<dyn NotificationSink>,
    slot: Arc<Mutex<Option<RefreshSlot>>>,
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("identity", &self.identity)
            .field("generation", &self.store.generation())
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        identity: IdentityProvider,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            transport,
            store,
            identity,
            sink,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn identity(&self) -> &IdentityProvider {
        &self.identity
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// True while a refresh future occupies the slot.
    pub fn refresh_in_flight(&self) -> bool {
        lock_unpoisoned(&self.slot).is_some()
    }

    /// Dispatches `request` with the current bearer, refreshing and replaying
    /// once on 401. Non-401 responses are returned as-is.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let mut snapshot = self.store.snapshot();
        let Some(credential) = snapshot.credential.as_ref() else {
            return Err(ClientError::AuthExpired);
        };

        if credential.is_expired(OffsetDateTime::now_utc()) {
            debug!(
                generation = snapshot.generation,
                "credential expired before dispatch; refreshing first"
            );
            snapshot = self.await_refresh(snapshot.generation).await?;
        }

        let response = self.dispatch(request, &snapshot).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        debug!(
            path = %request.path,
            generation = snapshot.generation,
            "request unauthorized; joining refresh"
        );
        let refreshed = self.await_refresh(snapshot.generation).await?;
        let replay = self.dispatch(request, &refreshed).await?;
        if replay.is_unauthorized() {
            warn!(path = %request.path, "replayed request unauthorized; expiring session");
            self.expire(refreshed.generation);
            return Err(ClientError::AuthExpired);
        }
        Ok(replay)
    }

    /// Like [`send`](Self::send), but maps non-success responses to
    /// [`ClientError::Backend`].
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let response = self.send(request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(ClientError::backend(response.status, response.error_message()))
        }
    }

    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
    ) -> Result<T, ClientError> {
        let response = self.execute(request).await?;
        Ok(response.decode(&request.path)?)
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        snapshot: &CredentialSnapshot,
    ) -> Result<ApiResponse, ClientError> {
        let response = self
            .transport
            .dispatch(request, snapshot.access_token())
            .await?;
        Ok(response)
    }

    /// Waits for a credential newer than `seen_generation`, starting the
    /// refresh if nobody has yet.
    async fn await_refresh(&self, seen_generation: u64) -> Result<CredentialSnapshot, ClientError> {
        let future = {
            let mut slot = lock_unpoisoned(&self.slot);
            let current = self.store.snapshot();
            if current.generation != seen_generation {
                debug!(
                    seen_generation,
                    current_generation = current.generation,
                    "credential already replaced; replaying with current token"
                );
                return match current.credential {
                    Some(_) => Ok(current),
                    None => Err(ClientError::AuthExpired),
                };
            }

            match slot.as_ref() {
                Some(existing) if existing.from_generation == seen_generation => {
                    existing.future.clone()
                }
                _ => {
                    let future = self.refresh_future(current).boxed().shared();
                    *slot = Some(RefreshSlot {
                        from_generation: seen_generation,
                        future: future.clone(),
                    });
                    future
                }
            }
        };

        future.await.map_err(|_| ClientError::AuthExpired)
    }

    fn refresh_future(
        &self,
        current: CredentialSnapshot,
    ) -> impl std::future::Future<Output = Result<CredentialSnapshot, RefreshFailure>> + Send + 'static
    {
        let transport = Arc::clone(&self.transport);
        let store = Arc::clone(&self.store);
        let sink = Arc::clone(&self.sink);
        let slot = Arc::clone(&self.slot);
        let identity = self.identity.clone();
        let from_generation = current.generation;
        let refresh_token = current
            .credential
            .and_then(|credential| credential.refresh_token);

        async move {
            info!(from_generation, "refreshing credential");
            let outcome = match refresh_token {
                None => Err(RefreshFailure::MissingRefreshToken),
                Some(token) => request_grant(transport.as_ref(), &identity.refresh_call(&token)).await,
            };
            settle_refresh(&slot, &store, sink.as_ref(), from_generation, outcome)
        }
    }

    /// Clears the credential if it is still at `generation`, reports
    /// [`ClientError::AuthExpired`] and signals the logout collaborator.
    pub(crate) fn expire(&self, generation: u64) {
        let cleared = {
            let _slot = lock_unpoisoned(&self.slot);
            if self.store.generation() == generation {
                self.store.clear();
                true
            } else {
                false
            }
        };
        if cleared {
            self.sink
                .notify(NotificationKind::Error, &ClientError::AuthExpired.to_string());
            self.sink.session_expired();
        }
    }
}

async fn request_grant(
    transport: &dyn Transport,
    call: &IdentityCall,
) -> Result<SessionGrant, RefreshFailure> {
    let response = transport
        .dispatch(&call.request, call.bearer.as_deref())
        .await
        .map_err(|error| RefreshFailure::Transport(error.to_string()))?;
    if !response.is_success() {
        return Err(RefreshFailure::Rejected {
            status: response.status.as_u16(),
            message: response.error_message(),
        });
    }
    response
        .decode::<SessionGrant>(&call.request.path)
        .map_err(|error| RefreshFailure::Transport(error.to_string()))
}

fn settle_refresh(
    slot: &Mutex<Option<RefreshSlot>>,
    store: &CredentialStore,
    sink: &dyn NotificationSink,
    from_generation: u64,
    outcome: Result<SessionGrant, RefreshFailure>,
) -> Result<CredentialSnapshot, RefreshFailure> {
    let mut slot = lock_unpoisoned(slot);
    let unchanged = store.generation() == from_generation;

    let settled = match outcome {
        Ok(grant) if unchanged => {
            let credential = Credential::from_grant(grant, OffsetDateTime::now_utc());
            let snapshot = store.replace_after_refresh(credential);
            info!(generation = snapshot.generation, "credential refreshed");
            Ok(snapshot)
        }
        Ok(_) => {
            let current = store.snapshot();
            if current.credential.is_some() {
                Ok(current)
            } else {
                Err(RefreshFailure::Cleared)
            }
        }
        Err(failure) => {
            warn!(from_generation, error = %failure, "credential refresh failed");
            if unchanged {
                store.clear();
            }
            Err(failure)
        }
    };

    if slot
        .as_ref()
        .is_some_and(|existing| existing.from_generation == from_generation)
    {
        *slot = None;
    }
    drop(slot);

    if let Err(failure) = &settled {
        if unchanged {
            sink.notify(NotificationKind::Error, &ClientError::AuthExpired.to_string());
            sink.session_expired();
        } else {
            debug!(error = %failure, "refresh outcome superseded by a newer credential");
        }
    }
    settled
}
