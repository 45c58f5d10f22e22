use std::fmt;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Error as JsonError;

#[derive(Debug)]
pub enum AutomationApiError {
    InvalidBaseUrl(String),
    InvalidHeader(String),
    Request(reqwest::Error),
    Serde(JsonError),
    Decode { path: String, message: String },
    Unknown(String),
}

/// Error body shapes emitted by the backend and the hosted identity provider.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayload {
    pub error: Option<ErrorField>,
    pub msg: Option<String>,
    pub message: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ErrorField {
    Text(String),
    Detailed { message: Option<String> },
}

impl ErrorPayload {
    fn message(&self) -> Option<String> {
        let nested = match &self.error {
            Some(ErrorField::Text(text)) => Some(text.as_str()),
            Some(ErrorField::Detailed { message }) => message.as_deref(),
            None => None,
        };

        self.error_description
            .as_deref()
            .and_then(non_empty_string)
            .or_else(|| nested.and_then(non_empty_string))
            .or_else(|| self.msg.as_deref().and_then(non_empty_string))
            .or_else(|| self.message.as_deref().and_then(non_empty_string))
            .map(str::to_owned)
    }
}

impl fmt::Display for AutomationApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBaseUrl(value) => write!(f, "invalid base URL: {value}"),
            Self::InvalidHeader(message) => write!(f, "invalid header: {message}"),
            Self::Request(error) => write!(f, "request error: {error}"),
            Self::Serde(error) => write!(f, "serialization error: {error}"),
            Self::Decode { path, message } => {
                write!(f, "unexpected response from {path}: {message}")
            }
            Self::Unknown(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for AutomationApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request(error) => Some(error),
            Self::Serde(error) => Some(error),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AutomationApiError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error)
    }
}

impl From<JsonError> for AutomationApiError {
    fn from(error: JsonError) -> Self {
        Self::Serde(error)
    }
}

/// Extract a human-readable message from an error response body.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorPayload>(body) {
        if let Some(message) = payload.message() {
            return message;
        }
    }

    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.trim().to_string()
    }
}

fn non_empty_string(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
