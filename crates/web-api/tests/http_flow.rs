mod support;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use support::build_router;

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

async fn command(app: &Router, user: &str, text: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/users/{user}/commands"))
        .header("content-type", "application/json")
        .body(Body::from(json!({ "text": text }).to_string()))
        .unwrap();
    send(app, request).await
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

#[tokio::test]
async fn health_check_responds() {
    let app = build_router();
    let (status, _) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn pairing_relay_report_and_admin_block() {
    let app = build_router();

    let (status, waiting) = command(&app, "alice", "start").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(waiting["command"], "start");
    assert_eq!(waiting["result"]["outcome"], "waiting");

    let (_, matched) = command(&app, "bob", "/start").await;
    assert_eq!(matched["result"]["outcome"], "matched");
    assert!(matched["result"]["partner_name"].is_string());

    let (status, relayed) = command(&app, "alice", "hello there").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(relayed["command"], "relay");
    assert_eq!(relayed["result"]["sequence"], 1);

    let (status, reported) = command(&app, "bob", "report spam links").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reported["result"]["outcome"], "filed");

    let (status, page) = get(&app, "/api/v1/admin/reports?status=pending").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total_count"], 1);
    let report_id = page["items"][0]["id"].as_str().expect("report id").to_owned();

    let (status, detail) = get(&app, &format!("/api/v1/admin/reports/{report_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["reporter"]["id"], "bob");
    assert_eq!(detail["reported"]["id"], "alice");
    assert_eq!(detail["report"]["reason"], "spam links");

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/admin/reports/{report_id}/action"))
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "reviewer": "mod-1", "action": "block", "duration_hours": 48 }).to_string(),
        ))
        .unwrap();
    let (status, resolved) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["status"], "resolved");

    let (status, error) = command(&app, "alice", "start").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error["code"], "SUSPENDED");

    let (_, resolved_page) = get(&app, "/api/v1/admin/reports?status=resolved").await;
    assert_eq!(resolved_page["total_count"], 1);
}

#[tokio::test]
async fn command_errors_map_to_status_codes() {
    let app = build_router();

    let (status, error) = command(&app, "carol", "rate 9").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "INVALID_RATING");

    let (status, error) = command(&app, "carol", "stop").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["code"], "NO_ACTIVE_SESSION");

    command(&app, "carol", "start").await;
    let (status, error) = command(&app, "carol", "start").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["code"], "ALREADY_QUEUED");
}

#[tokio::test]
async fn admin_rejects_bad_queries_and_unknown_reports() {
    let app = build_router();

    let (status, _) = get(&app, "/api/v1/admin/reports?status=archived").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, error) = get(
        &app,
        "/api/v1/admin/reports/7a4f3c1e-0b7d-4a55-9a43-2d8f5b1c9e10",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], "NOT_FOUND");
}
