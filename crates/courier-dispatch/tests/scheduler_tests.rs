//! Scheduler control contract: idempotent start/stop, immediate batch on
//! start, orphan recovery.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use courier_db::models::MessageStatus;
use courier_dispatch::{
    DatabaseTransport, QueueScheduler, Scheduler, SchedulerError, Transport,
};

fn ok_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "message": "ok",
        "messageId": "msg-1",
    }))
}

fn scheduler_for(store: Arc<InMemoryStore>, uri: &str, interval: Duration) -> Scheduler {
    let service = service_for(store.clone(), uri, 0, 160);
    Scheduler::new(service, store, interval, 10)
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..50 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached within timeout");
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let server = MockServer::start().await;
    let store = InMemoryStore::new();
    let scheduler = scheduler_for(store, &server.uri(), Duration::from_secs(60));

    assert!(scheduler.start().await.is_ok());
    assert!(matches!(
        scheduler.start().await,
        Err(SchedulerError::AlreadyRunning)
    ));

    let status = scheduler.status().await;
    assert!(status.running);
    assert!(status.started_at.is_some());

    assert!(scheduler.stop().await.is_ok());
    assert!(matches!(
        scheduler.stop().await,
        Err(SchedulerError::NotRunning)
    ));

    let status = scheduler.status().await;
    assert!(!status.running);
    assert!(status.started_at.is_none());
}

#[tokio::test]
async fn runs_one_batch_immediately_on_start() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ok_response())
        .expect(1)
        .mount(&server)
        .await;

    let store = InMemoryStore::new();
    let message = build_message("+12025550100", "hi");
    store.insert(message.clone());

    // A long interval: only the immediate start batch can deliver this.
    let scheduler = scheduler_for(store.clone(), &server.uri(), Duration::from_secs(300));
    scheduler.start().await.unwrap();

    wait_for(|| store.get(message.id).unwrap().status == MessageStatus::Sent).await;

    scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn start_recovers_messages_stranded_in_sending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ok_response())
        .expect(1)
        .mount(&server)
        .await;

    let store = InMemoryStore::new();
    // Simulates a crash mid-dispatch in a previous run.
    let mut message = build_message("+12025550100", "orphan");
    message.status = MessageStatus::Sending;
    store.insert(message.clone());

    let scheduler = scheduler_for(store.clone(), &server.uri(), Duration::from_secs(300));
    scheduler.start().await.unwrap();

    wait_for(|| store.get(message.id).unwrap().status == MessageStatus::Sent).await;

    scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn restart_after_stop_works() {
    let server = MockServer::start().await;
    let store = InMemoryStore::new();
    let scheduler = scheduler_for(store, &server.uri(), Duration::from_secs(60));

    scheduler.start().await.unwrap();
    scheduler.stop().await.unwrap();
    scheduler.start().await.unwrap();
    assert!(scheduler.is_running().await);
    scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn queue_scheduler_delivers_via_database_transport() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ok_response())
        .expect(1)
        .mount(&server)
        .await;

    let store = InMemoryStore::new();
    let message = build_message("+12025550100", "hi");
    store.insert(message.clone());

    let transport: Arc<dyn Transport> = Arc::new(DatabaseTransport::new(
        store.clone(),
        10,
        Duration::from_millis(100),
    ));
    let dispatcher = dispatcher_for(store.clone(), &server.uri(), 0, 160);
    let scheduler = QueueScheduler::new(transport, dispatcher, store.clone());

    scheduler.start().await.unwrap();
    assert!(matches!(
        scheduler.start().await,
        Err(SchedulerError::AlreadyRunning)
    ));

    wait_for(|| store.get(message.id).unwrap().status == MessageStatus::Sent).await;

    scheduler.stop().await.unwrap();
    assert!(matches!(
        scheduler.stop().await,
        Err(SchedulerError::NotRunning)
    ));
}
