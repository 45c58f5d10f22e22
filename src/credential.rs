//! Credential lifecycle state. Pure state, no I/O.

use std::fmt;
use std::sync::Mutex;

use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::Value;
use time::{Duration, OffsetDateTime};

use crate::lock_unpoisoned;

/// Credentials are treated as expired this long before their stated expiry.
pub const EXPIRY_SKEW: Duration = Duration::seconds(30);

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    /// Absent when the identity backend issues access tokens only.
    pub refresh_token: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        let access_token = access_token.into();
        let expires_at = jwt_expiry(&access_token);
        Self {
            access_token,
            refresh_token,
            expires_at,
        }
    }

    pub fn with_expires_at(mut self, expires_at: OffsetDateTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Builds a credential from a login or refresh grant issued at `now`.
    pub fn from_grant(grant: SessionGrant, now: OffsetDateTime) -> Self {
        let expires_at = grant
            .expires_at
            .and_then(|epoch| OffsetDateTime::from_unix_timestamp(epoch).ok())
            .or_else(|| {
                grant
                    .expires_in
                    .filter(|seconds| *seconds > 0)
                    .map(|seconds| now + Duration::seconds(seconds))
            })
            .or_else(|| jwt_expiry(&grant.access_token));

        Self {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.filter(|token| !token.trim().is_empty()),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at
            .is_some_and(|expires_at| now + EXPIRY_SKEW >= expires_at)
    }
}

/// Token grant returned by login/refresh endpoints.
///
/// The native backend returns `{access_token, refresh_token?}`; the hosted
/// identity provider returns a session object that additionally carries
/// expiry fields and a `user`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub user: Option<Value>,
}

impl SessionGrant {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_in: None,
            expires_at: None,
            user: None,
        }
    }
}

/// A consistent view of the store at one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSnapshot {
    pub generation: u64,
    pub credential: Option<Credential>,
}

impl CredentialSnapshot {
    pub fn access_token(&self) -> Option<&str> {
        self.credential
            .as_ref()
            .map(|credential| credential.access_token.as_str())
    }
}

#[derive(Debug, Default)]
struct StoreState {
    generation: u64,
    credential: Option<Credential>,
}

/// Holder of the session's single credential.
///
/// Every write bumps the generation, which lets readers tell whether the
/// credential they dispatched with is still the current one.
#[derive(Debug, Default)]
pub struct CredentialStore {
    state: Mutex<StoreState>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CredentialSnapshot {
        let state = lock_unpoisoned(&self.state);
        CredentialSnapshot {
            generation: state.generation,
            credential: state.credential.clone(),
        }
    }

    pub fn generation(&self) -> u64 {
        lock_unpoisoned(&self.state).generation
    }

    pub fn access_token(&self) -> Option<String> {
        lock_unpoisoned(&self.state)
            .credential
            .as_ref()
            .map(|credential| credential.access_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        lock_unpoisoned(&self.state).credential.is_some()
    }

    /// Installs a credential obtained by an explicit login.
    pub fn install(&self, credential: Credential) -> CredentialSnapshot {
        self.write(Some(credential))
    }

    /// Installs a refreshed credential, keeping the previous refresh token
    /// when the backend did not rotate it.
    pub fn replace_after_refresh(&self, mut credential: Credential) -> CredentialSnapshot {
        let mut state = lock_unpoisoned(&self.state);
        if credential.refresh_token.is_none() {
            credential.refresh_token = state
                .credential
                .as_ref()
                .and_then(|previous| previous.refresh_token.clone());
        }
        state.generation += 1;
        state.credential = Some(credential);
        CredentialSnapshot {
            generation: state.generation,
            credential: state.credential.clone(),
        }
    }

    pub fn clear(&self) -> CredentialSnapshot {
        self.write(None)
    }

    fn write(&self, credential: Option<Credential>) -> CredentialSnapshot {
        let mut state = lock_unpoisoned(&self.state);
        state.generation += 1;
        state.credential = credential;
        CredentialSnapshot {
            generation: state.generation,
            credential: state.credential.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExpiryClaims {
    exp: Option<i64>,
}

/// Reads the `exp` claim of a JWT access token, if the token is one.
fn jwt_expiry(token: &str) -> Option<OffsetDateTime> {
    let mut parts = token.trim().split('.');
    let _header = parts.next()?;
    let payload_segment = parts.next()?;
    let _signature = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let decoded = general_purpose::URL_SAFE_NO_PAD
        .decode(payload_segment)
        .or_else(|_| general_purpose::URL_SAFE.decode(payload_segment))
        .ok()?;
    let claims = serde_json::from_slice::<ExpiryClaims>(&decoded).ok()?;
    OffsetDateTime::from_unix_timestamp(claims.exp?).ok()
}
