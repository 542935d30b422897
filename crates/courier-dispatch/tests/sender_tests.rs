//! Webhook sender behavior: success parsing, per-call retry, synthesized
//! remote ids and cancellation.

mod common;

use common::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use courier_dispatch::WebhookError;

#[tokio::test]
async fn success_returns_remote_id_from_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/webhook"))
        .and(header("x-ins-auth-key", TEST_AUTH_KEY))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"to": "+12025550100", "content": "hi"})))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "message": "Message sent successfully",
            "messageId": "msg-12345",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let sender = sender_for(&server.uri(), 0);
    let remote_id = sender
        .send(Uuid::new_v4(), "+12025550100", "hi", &no_cancel())
        .await
        .unwrap();

    assert_eq!(remote_id, "msg-12345");
}

#[tokio::test]
async fn non_json_body_gets_synthesized_remote_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;

    let sender = sender_for(&server.uri(), 0);
    let remote_id = sender
        .send(Uuid::new_v4(), "+12025550100", "hi", &no_cancel())
        .await
        .unwrap();

    assert!(
        remote_id.starts_with("webhook-"),
        "expected synthesized id, got {remote_id}"
    );
}

#[tokio::test]
async fn retries_transient_failure_then_succeeds() {
    let server = MockServer::start().await;

    // First attempt fails with a 500, the retry succeeds.
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": "ok",
            "messageId": "msg-2",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let sender = sender_for(&server.uri(), 2);
    let remote_id = sender
        .send(Uuid::new_v4(), "+12025550100", "hi", &no_cancel())
        .await
        .unwrap();

    assert_eq!(remote_id, "msg-2");
}

#[tokio::test]
async fn exhausts_attempts_and_reports_last_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let sender = sender_for(&server.uri(), 1);
    let error = sender
        .send(Uuid::new_v4(), "+12025550100", "hi", &no_cancel())
        .await
        .unwrap_err();

    match error {
        WebhookError::Exhausted { attempts, source } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*source, WebhookError::BadStatus(500)));
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn client_error_status_is_not_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let sender = sender_for(&server.uri(), 0);
    let error = sender
        .send(Uuid::new_v4(), "+12025550100", "hi", &no_cancel())
        .await
        .unwrap_err();

    match error {
        WebhookError::Exhausted { source, .. } => {
            assert!(matches!(*source, WebhookError::BadStatus(400)));
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn canceled_token_aborts_the_call() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let sender = sender_for(&server.uri(), 3);
    let error = sender
        .send(Uuid::new_v4(), "+12025550100", "hi", &cancel)
        .await
        .unwrap_err();

    assert!(matches!(error, WebhookError::Canceled));
}
