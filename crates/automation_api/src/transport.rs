use async_trait::async_trait;

use crate::error::AutomationApiError;
use crate::payload::{ApiRequest, ApiResponse};

/// The single seam through which every backend call travels.
///
/// A transport sends exactly one HTTP exchange per call: it never retries and
/// never interprets status codes. `Ok` is returned for every HTTP response,
/// including 4xx/5xx; `Err` is reserved for failures to obtain a response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dispatch(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, AutomationApiError>;
}
