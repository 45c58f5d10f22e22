use std::collections::BTreeMap;

use crate::config::AutomationApiConfig;
use crate::error::AutomationApiError;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_USER_AGENT: &str = "user-agent";

/// Build a deterministic header map for one backend request.
///
/// `bearer` is attached as `Authorization: Bearer <token>` when present.
/// Per-request headers win over configured extra headers.
pub fn build_headers(
    config: &AutomationApiConfig,
    bearer: Option<&str>,
    request_headers: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, AutomationApiError> {
    let mut headers = BTreeMap::new();

    headers.insert(HEADER_ACCEPT.to_owned(), "application/json".to_owned());
    headers.insert(
        HEADER_CONTENT_TYPE.to_owned(),
        "application/json".to_owned(),
    );

    let ua = match config.user_agent.as_deref() {
        Some(explicit) if !explicit.trim().is_empty() => explicit.trim().to_owned(),
        _ => default_user_agent(),
    };
    headers.insert(HEADER_USER_AGENT.to_owned(), ua);

    for (key, value) in config.extra_headers.iter().chain(request_headers) {
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(AutomationApiError::InvalidHeader(
                "header name must not be empty".to_owned(),
            ));
        }
        headers.insert(key, value.trim().to_owned());
    }

    if let Some(token) = bearer.map(str::trim).filter(|token| !token.is_empty()) {
        headers.insert(HEADER_AUTHORIZATION.to_owned(), format!("Bearer {token}"));
    }

    Ok(headers)
}

/// Default `User-Agent`, e.g. `routine-pilot/0.1.0 (linux; x86_64)`.
pub fn default_user_agent() -> String {
    format!(
        "routine-pilot/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}
