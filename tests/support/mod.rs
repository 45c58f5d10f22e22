#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use automation_api::{ApiRequest, ApiResponse, AutomationApiError, Method, StatusCode, Transport};
use routine_pilot::{ClientConfig, RecordingSink, Session};
use serde_json::Value;

/// One request as seen by the scripted backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

pub enum Reply {
    Now(ApiResponse),
    After(Duration, ApiResponse),
    Fail(String),
}

pub fn json(status: u16, body: Value) -> Reply {
    Reply::Now(response(status, body))
}

pub fn delayed(delay: Duration, status: u16, body: Value) -> Reply {
    Reply::After(delay, response(status, body))
}

pub fn response(status: u16, body: Value) -> ApiResponse {
    let status = StatusCode::from_u16(status).expect("valid status code");
    ApiResponse::json(status, &body)
}

type Handler = Box<dyn Fn(&RecordedCall) -> Reply + Send + Sync>;

/// In-memory backend driven by a routing closure.
pub struct MockBackend {
    handler: Handler,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockBackend {
    pub fn new(handler: impl Fn(&RecordedCall) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock_unpoisoned(&self.calls).clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.path == path)
            .collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.calls_to(path).len()
    }
}

#[async_trait]
impl Transport for MockBackend {
    async fn dispatch(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, AutomationApiError> {
        let call = RecordedCall {
            method: request.method,
            path: request.path.clone(),
            bearer: bearer.map(str::to_string),
            body: request.body.clone(),
        };
        lock_unpoisoned(&self.calls).push(call.clone());
        let reply = (self.handler)(&call);

        tokio::task::yield_now().await;
        match reply {
            Reply::Now(response) => Ok(response),
            Reply::After(delay, response) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            Reply::Fail(message) => Err(AutomationApiError::Unknown(message)),
        }
    }
}

pub fn session_over(backend: &Arc<MockBackend>) -> (Session, Arc<RecordingSink>) {
    session_with_config(backend, ClientConfig::default())
}

pub fn session_with_config(
    backend: &Arc<MockBackend>,
    config: ClientConfig,
) -> (Session, Arc<RecordingSink>) {
    let sink = RecordingSink::new();
    let session = Session::new(config, backend.clone(), sink.clone());
    (session, sink)
}

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
