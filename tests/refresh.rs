mod support;

use std::time::Duration;

use automation_api::ApiRequest;
use futures_util::future::join_all;
use routine_pilot::{ClientError, NotificationKind, SessionGrant};
use serde_json::json;
use support::{delayed, json, session_over, MockBackend, RecordedCall, Reply};

const REFRESH_DELAY: Duration = Duration::from_millis(50);

fn grant(access: &str, refresh: Option<&str>) -> serde_json::Value {
    match refresh {
        Some(refresh) => json!({"access_token": access, "refresh_token": refresh}),
        None => json!({"access_token": access}),
    }
}

/// `a-1` is issued at login but already rejected by the backend; `/refresh`
/// issues `a-2`, which is accepted everywhere.
fn backend_with_stale_login() -> std::sync::Arc<MockBackend> {
    MockBackend::new(|call: &RecordedCall| match call.path.as_str() {
        "/login" => json(200, grant("a-1", Some("r-1"))),
        "/refresh" => delayed(REFRESH_DELAY, 200, grant("a-2", None)),
        "/routines" if call.bearer.as_deref() == Some("a-2") => json(200, json!([])),
        "/routines" => json(401, json!({"msg": "Token has expired"})),
        _ => json(404, json!({"error": "not found"})),
    })
}

#[tokio::test(start_paused = true)]
async fn concurrent_unauthorized_calls_share_one_refresh() {
    let backend = backend_with_stale_login();
    let (session, _sink) = session_over(&backend);
    session.login("pilot", "hunter2").await.expect("login");

    let routines = session.routines();
    let results = join_all((0..5).map(|_| routines.list())).await;

    assert!(results.iter().all(Result::is_ok), "{results:?}");
    assert_eq!(backend.count("/refresh"), 1);

    let refresh = &backend.calls_to("/refresh")[0];
    assert_eq!(refresh.bearer.as_deref(), Some("r-1"));
    assert_eq!(refresh.body, Some(json!({"refresh_token": "r-1"})));

    let replays: Vec<_> = backend
        .calls_to("/routines")
        .into_iter()
        .filter(|call| call.bearer.as_deref() == Some("a-2"))
        .collect();
    assert_eq!(replays.len(), 5);

    let snapshot = session.store().snapshot();
    let credential = snapshot.credential.expect("credential kept");
    assert_eq!(credential.access_token, "a-2");
    assert_eq!(credential.refresh_token.as_deref(), Some("r-1"));
}

#[tokio::test(start_paused = true)]
async fn two_parallel_rejections_after_login_both_succeed() {
    let backend = backend_with_stale_login();
    let (session, _sink) = session_over(&backend);
    session.login("pilot", "hunter2").await.expect("login");

    let routines = session.routines();
    let (first, second) = tokio::join!(routines.list(), routines.list());

    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(backend.count("/refresh"), 1);
    assert_eq!(backend.count("/routines"), 4);
}

#[tokio::test(start_paused = true)]
async fn refresh_failure_rejects_every_waiter_and_clears_credential() {
    let backend = MockBackend::new(|call: &RecordedCall| match call.path.as_str() {
        "/login" => json(200, grant("a-1", Some("r-1"))),
        "/refresh" => delayed(REFRESH_DELAY, 401, json!({"error": "invalid refresh token"})),
        _ => json(401, json!({"msg": "Token has expired"})),
    });
    let (session, sink) = session_over(&backend);
    session.login("pilot", "hunter2").await.expect("login");

    let routines = session.routines();
    let results = join_all((0..3).map(|_| routines.list())).await;

    for result in results {
        assert!(matches!(result, Err(ClientError::AuthExpired)));
    }
    assert_eq!(backend.count("/refresh"), 1);
    assert_eq!(backend.count("/routines"), 3);
    assert!(!session.is_authenticated());
    assert_eq!(sink.expirations(), 1);
    assert!(!sink.messages(NotificationKind::Error).is_empty());
}

#[tokio::test(start_paused = true)]
async fn second_rejection_after_replay_is_terminal() {
    let backend = MockBackend::new(|call: &RecordedCall| match call.path.as_str() {
        "/login" => json(200, grant("a-1", Some("r-1"))),
        "/refresh" => json(200, grant("a-2", Some("r-2"))),
        _ => json(401, json!({"msg": "Token has expired"})),
    });
    let (session, sink) = session_over(&backend);
    session.login("pilot", "hunter2").await.expect("login");

    let result = session.routines().list().await;

    assert!(matches!(result, Err(ClientError::AuthExpired)));
    assert_eq!(backend.count("/routines"), 2);
    assert_eq!(backend.count("/refresh"), 1);
    assert!(!session.is_authenticated());
    assert_eq!(sink.expirations(), 1);
    assert!(sink
        .messages(NotificationKind::Error)
        .contains(&ClientError::AuthExpired.to_string()));
}

#[tokio::test(start_paused = true)]
async fn rejection_after_refresh_landed_replays_without_refreshing_again() {
    let backend = MockBackend::new(|call: &RecordedCall| {
        match (call.path.as_str(), call.bearer.as_deref()) {
            ("/login", _) => json(200, grant("a-1", Some("r-1"))),
            ("/refresh", _) => delayed(REFRESH_DELAY, 200, grant("a-2", None)),
            ("/slow", Some("a-1")) => delayed(Duration::from_millis(100), 401, json!({})),
            (_, Some("a-2")) => json(200, json!({"ok": true})),
            _ => json(401, json!({"msg": "Token has expired"})),
        }
    });
    let (session, _sink) = session_over(&backend);
    session.login("pilot", "hunter2").await.expect("login");

    let coordinator = session.coordinator();
    let slow = ApiRequest::get("/slow");
    let fast = ApiRequest::get("/fast");
    let (slow_result, fast_result) =
        tokio::join!(coordinator.execute(&slow), coordinator.execute(&fast));

    assert!(slow_result.is_ok());
    assert!(fast_result.is_ok());
    assert_eq!(backend.count("/refresh"), 1);
    let slow_calls = backend.calls_to("/slow");
    assert_eq!(slow_calls.len(), 2);
    assert_eq!(slow_calls[1].bearer.as_deref(), Some("a-2"));
}

#[tokio::test(start_paused = true)]
async fn expired_credential_is_refreshed_before_dispatch() {
    let backend = backend_with_stale_login();
    let (session, _sink) = session_over(&backend);
    let expired_at = time::OffsetDateTime::now_utc().unix_timestamp() - 10;
    session.login_with_session(SessionGrant {
        expires_at: Some(expired_at),
        ..SessionGrant::new("a-1", Some("r-1".to_string()))
    });

    session.routines().list().await.expect("list succeeds");

    let calls = backend.calls();
    assert_eq!(calls[0].path, "/refresh");
    assert_eq!(backend.count("/routines"), 1);
    assert_eq!(
        backend.calls_to("/routines")[0].bearer.as_deref(),
        Some("a-2")
    );
}

#[tokio::test(start_paused = true)]
async fn missing_refresh_token_expires_without_calling_refresh() {
    let backend = MockBackend::new(|call: &RecordedCall| match call.path.as_str() {
        "/login" => json(200, grant("a-1", None)),
        "/refresh" => json(200, grant("a-2", None)),
        _ => json(401, json!({"msg": "Token has expired"})),
    });
    let (session, sink) = session_over(&backend);
    session.login("pilot", "hunter2").await.expect("login");

    let result = session.routines().list().await;

    assert!(matches!(result, Err(ClientError::AuthExpired)));
    assert_eq!(backend.count("/refresh"), 0);
    assert!(!session.is_authenticated());
    assert_eq!(sink.expirations(), 1);
}

#[tokio::test]
async fn unauthenticated_calls_fail_without_network() {
    let backend = MockBackend::new(|_: &RecordedCall| Reply::Fail("unreachable".to_string()));
    let (session, _sink) = session_over(&backend);

    let result = session.routines().list().await;

    assert!(matches!(result, Err(ClientError::AuthExpired)));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn login_validates_before_network_and_surfaces_backend_message() {
    let backend = MockBackend::new(|_: &RecordedCall| {
        json(401, json!({"error": "Invalid username or password"}))
    });
    let (session, sink) = session_over(&backend);

    let blank = session.login("  ", "pw").await;
    assert!(matches!(blank, Err(ClientError::Validation(_))));
    assert!(backend.calls().is_empty());

    let rejected = session.login("pilot", "wrong").await;
    match rejected {
        Err(ClientError::Backend { status, message }) => {
            assert_eq!(status, 401);
            assert_eq!(message, "Invalid username or password");
        }
        other => panic!("expected backend error, got {other:?}"),
    }
    assert_eq!(sink.messages(NotificationKind::Error).len(), 2);
}
