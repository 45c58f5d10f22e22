use automation_api::{ApiRequest, ApiResponse, AutomationApiError, Method};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize, PartialEq)]
struct TaskAccepted {
    task_id: String,
}

#[test]
fn request_builders_set_method_and_body() {
    let request = ApiRequest::post("/cancel_recording")
        .with_body(json!({"task_id": "t-1", "routine_name": "goats"}))
        .with_header("apikey", "anon");

    assert_eq!(request.method, Method::Post);
    assert_eq!(request.path, "/cancel_recording");
    assert_eq!(
        request.body,
        Some(json!({"task_id": "t-1", "routine_name": "goats"}))
    );
    assert_eq!(request.headers.get("apikey").map(String::as_str), Some("anon"));
    assert_eq!(ApiRequest::delete("/routines/1").method.as_str(), "DELETE");
}

#[test]
fn response_decodes_json_body() {
    let response = ApiResponse::json(StatusCode::OK, &json!({"task_id": "abc"}));
    let decoded: TaskAccepted = response.decode("/record").expect("decode");
    assert_eq!(
        decoded,
        TaskAccepted {
            task_id: "abc".to_string()
        }
    );
}

#[test]
fn response_decode_failure_names_context() {
    let response = ApiResponse::new(StatusCode::OK, "not json");
    let error = response
        .decode::<TaskAccepted>("/record")
        .expect_err("decode should fail");
    assert!(matches!(error, AutomationApiError::Decode { ref path, .. } if path == "/record"));
}

#[test]
fn empty_body_reads_as_null() {
    let response = ApiResponse::new(StatusCode::NO_CONTENT, "");
    assert_eq!(response.value().expect("value"), serde_json::Value::Null);
}

#[test]
fn unauthorized_is_detected_by_status() {
    let response = ApiResponse::new(StatusCode::UNAUTHORIZED, r#"{"msg":"Token has expired"}"#);
    assert!(response.is_unauthorized());
    assert!(!response.is_success());
    assert_eq!(response.error_message(), "Token has expired");
}
