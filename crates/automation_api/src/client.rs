use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use tracing::debug;

use crate::config::AutomationApiConfig;
use crate::error::AutomationApiError;
use crate::headers::build_headers;
use crate::payload::{ApiRequest, ApiResponse, Method};
use crate::transport::Transport;
use crate::url::{join_endpoint, normalize_base_url};

/// reqwest-backed [`Transport`] for the automation backend.
#[derive(Debug)]
pub struct AutomationApiClient {
    http: Client,
    config: AutomationApiConfig,
}

impl AutomationApiClient {
    pub fn new(config: AutomationApiConfig) -> Result<Self, AutomationApiError> {
        let base = normalize_base_url(&config.base_url);
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(AutomationApiError::InvalidBaseUrl(config.base_url.clone()));
        }

        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(AutomationApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &AutomationApiConfig {
        &self.config
    }

    pub fn endpoint(&self, path: &str) -> String {
        join_endpoint(&self.config.base_url, path)
    }

    pub fn build_headers(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<HeaderMap, AutomationApiError> {
        let headers = build_headers(&self.config, bearer, &request.headers)?;
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                    AutomationApiError::InvalidHeader(format!("invalid header key: {key}"))
                })?,
                HeaderValue::from_str(&value).map_err(|_| {
                    AutomationApiError::InvalidHeader(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    pub fn build_request(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<reqwest::RequestBuilder, AutomationApiError> {
        let url = self.endpoint(&request.path);
        let headers = self.build_headers(request, bearer)?;
        let builder = match request.method {
            Method::Get => self.http.get(url),
            Method::Post => self.http.post(url),
            Method::Put => self.http.put(url),
            Method::Delete => self.http.delete(url),
        }
        .headers(headers);

        Ok(match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        })
    }
}

#[async_trait]
impl Transport for AutomationApiClient {
    async fn dispatch(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, AutomationApiError> {
        debug!(method = %request.method, path = %request.path, "dispatching backend request");
        let response = self.build_request(request, bearer)?.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(method = %request.method, path = %request.path, status = status.as_u16(), "backend responded");
        Ok(ApiResponse::new(status, body))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::AutomationApiClient;
    use crate::config::AutomationApiConfig;
    use crate::error::AutomationApiError;
    use crate::payload::ApiRequest;

    #[test]
    fn rejects_base_url_without_scheme() {
        let error = AutomationApiClient::new(AutomationApiConfig::new("localhost:5000/api"))
            .expect_err("scheme-less base URL should be rejected");
        assert!(matches!(error, AutomationApiError::InvalidBaseUrl(_)));
    }

    #[test]
    fn build_request_attaches_bearer_and_json_body() {
        let client = AutomationApiClient::new(AutomationApiConfig::new("http://127.0.0.1:5000/api/"))
            .expect("client");
        let request = ApiRequest::post("/record").with_body(json!({"routine_name": "goats"}));

        let built = client
            .build_request(&request, Some("tok"))
            .expect("build request")
            .build()
            .expect("request");

        assert_eq!(built.url().as_str(), "http://127.0.0.1:5000/api/record");
        assert_eq!(built.method(), "POST");
        assert_eq!(
            built
                .headers()
                .get("authorization")
                .and_then(|value| value.to_str().ok()),
            Some("Bearer tok")
        );
        let body = built
            .body()
            .and_then(|body| body.as_bytes())
            .expect("buffered json body");
        let parsed: serde_json::Value = serde_json::from_slice(body).expect("json body");
        assert_eq!(parsed, json!({"routine_name": "goats"}));
    }

    #[test]
    fn build_request_omits_authorization_without_bearer() {
        let client =
            AutomationApiClient::new(AutomationApiConfig::default()).expect("client");
        let built = client
            .build_request(&ApiRequest::post("/login"), None)
            .expect("build request")
            .build()
            .expect("request");

        assert!(built.headers().get("authorization").is_none());
    }
}
