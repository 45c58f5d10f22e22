//! Routine CRUD through the refresh-coordinated transport.

use std::sync::Arc;

use automation_api::ApiRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ClientError;
use crate::notify::{notify_error, NotificationSink};
use crate::refresh::RefreshCoordinator;

pub type RoutineId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routine {
    pub id: RoutineId,
    pub name: String,
    /// Recorded actions; opaque to the client.
    #[serde(default)]
    pub steps: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_run: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewRoutine {
    pub name: String,
    pub steps: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_per_run: Option<u32>,
}

impl NewRoutine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Value::Array(Vec::new()),
            tokens_per_run: None,
        }
    }

    pub fn with_steps(mut self, steps: Value) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_tokens_per_run(mut self, tokens_per_run: u32) -> Self {
        self.tokens_per_run = Some(tokens_per_run);
        self
    }
}

fn validate_name(name: &str) -> Result<(), ClientError> {
    if name.trim().is_empty() {
        return Err(ClientError::validation("routine name must not be empty"));
    }
    Ok(())
}

/// Routine CRUD. Every failure is also reported through the session sink.
#[derive(Clone)]
pub struct RoutineClient {
    coordinator: Arc<RefreshCoordinator>,
    sink: Arc<dyn NotificationSink>,
}

impl RoutineClient {
    pub fn new(coordinator: Arc<RefreshCoordinator>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { coordinator, sink }
    }

    pub async fn list(&self) -> Result<Vec<Routine>, ClientError> {
        let listed = self
            .coordinator
            .execute_json::<Option<Vec<Routine>>>(&ApiRequest::get("/routines"))
            .await
            .map(Option::unwrap_or_default);
        self.surface(listed)
    }

    pub async fn create(&self, routine: &NewRoutine) -> Result<Routine, ClientError> {
        let created = self.create_inner(routine).await;
        if let Ok(created) = &created {
            debug!(id = created.id, name = %created.name, "routine created");
        }
        self.surface(created)
    }

    async fn create_inner(&self, routine: &NewRoutine) -> Result<Routine, ClientError> {
        validate_name(&routine.name)?;
        let request = ApiRequest::post("/routines").with_json(routine)?;
        self.coordinator.execute_json(&request).await
    }

    pub async fn update(&self, routine: &Routine) -> Result<Routine, ClientError> {
        let updated = self.update_inner(routine).await;
        self.surface(updated)
    }

    async fn update_inner(&self, routine: &Routine) -> Result<Routine, ClientError> {
        validate_name(&routine.name)?;
        let request = ApiRequest::put(format!("/routines/{}", routine.id)).with_json(routine)?;
        self.coordinator.execute_json(&request).await
    }

    pub async fn delete(&self, id: RoutineId) -> Result<(), ClientError> {
        let deleted = self
            .coordinator
            .execute(&ApiRequest::delete(format!("/routines/{id}")))
            .await
            .map(|_| debug!(id, "routine deleted"));
        self.surface(deleted)
    }

    fn surface<T>(&self, result: Result<T, ClientError>) -> Result<T, ClientError> {
        if let Err(error) = &result {
            notify_error(self.sink.as_ref(), error);
        }
        result
    }
}
