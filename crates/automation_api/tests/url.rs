use automation_api::{join_endpoint, normalize_base_url};

#[test]
fn url_normalization_falls_back_to_default_base() {
    assert_eq!(normalize_base_url("   "), "http://localhost:5000/api");
}

#[test]
fn url_normalization_strips_trailing_slashes() {
    assert_eq!(
        normalize_base_url("https://pilot.example.com/api//"),
        "https://pilot.example.com/api"
    );
}

#[test]
fn join_endpoint_uses_single_separator() {
    assert_eq!(
        join_endpoint("https://pilot.example.com/api/", "/recording-status/abc"),
        "https://pilot.example.com/api/recording-status/abc"
    );
    assert_eq!(
        join_endpoint("https://pilot.example.com/api", "routines"),
        "https://pilot.example.com/api/routines"
    );
}

#[test]
fn join_endpoint_keeps_absolute_urls() {
    assert_eq!(
        join_endpoint(
            "https://pilot.example.com/api",
            "https://id.example.com/auth/v1/token?grant_type=refresh_token"
        ),
        "https://id.example.com/auth/v1/token?grant_type=refresh_token"
    );
}
