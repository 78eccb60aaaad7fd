use std::time::Duration;

use application::{Backoff, ModerationEvent, NotificationSink, RetryPolicy};
use domain::{ReportId, SuspensionTerm, UserId};
use infrastructure::WebhookNotificationSink;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff: Backoff::exponential(Duration::from_millis(1)),
        attempt_timeout: Duration::from_secs(2),
    }
}

fn critical_event() -> ModerationEvent {
    ModerationEvent::CriticalReport {
        report_id: ReportId::new(),
        reporter_id: UserId::parse("alice").unwrap(),
        reported_id: UserId::parse("bob").unwrap(),
        reason: "he made a threat".into(),
        matched_keyword: "threat".into(),
    }
}

#[tokio::test]
async fn posts_event_with_severity_to_every_url() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    for server in [&first, &second] {
        Mock::given(method("POST"))
            .and(path("/hooks/moderation"))
            .and(body_partial_json(json!({
                "severity": "high",
                "event": { "event": "critical_report", "matched_keyword": "threat" }
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(server)
            .await;
    }

    let sink = WebhookNotificationSink::new(
        vec![
            format!("{}/hooks/moderation", first.uri()),
            format!("{}/hooks/moderation", second.uri()),
        ],
        fast_policy(),
    );
    sink.notify(critical_event()).await.unwrap();
}

#[tokio::test]
async fn retries_transient_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sink = WebhookNotificationSink::new(vec![server.uri()], fast_policy());
    let event = ModerationEvent::UserSuspended {
        user_id: UserId::parse("bob").unwrap(),
        reason: "multiple reports".into(),
        term: SuspensionTerm::Permanent,
    };
    sink.notify(event).await.unwrap();
}

#[tokio::test]
async fn one_healthy_url_is_enough() {
    let broken = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&broken)
        .await;
    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&healthy)
        .await;

    let sink = WebhookNotificationSink::new(vec![broken.uri(), healthy.uri()], fast_policy());
    sink.notify(critical_event()).await.unwrap();
}

#[tokio::test]
async fn fails_when_no_url_accepts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let sink = WebhookNotificationSink::new(vec![server.uri()], fast_policy());
    assert!(sink.notify(critical_event()).await.is_err());
}
