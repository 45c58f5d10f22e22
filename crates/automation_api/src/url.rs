/// Default base URL of the automation backend.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

/// Normalize a configured base URL.
///
/// Blank input falls back to [`DEFAULT_BASE_URL`]; trailing slashes are removed.
pub fn normalize_base_url(input: &str) -> String {
    let base = if input.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        input.trim()
    };

    base.trim_end_matches('/').to_string()
}

/// Resolve an endpoint path against a base URL.
///
/// Rules:
/// 1) absolute `http://` / `https://` paths are returned unchanged
/// 2) relative paths are joined with exactly one `/` separator
pub fn join_endpoint(base_url: &str, path: &str) -> String {
    let path = path.trim();
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }

    let base = normalize_base_url(base_url);
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return base;
    }
    format!("{base}/{path}")
}
