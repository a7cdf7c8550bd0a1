//! Integration tests for the sweep scheduler and queue consumer.

mod common;

use common::{TestServer, can_bind_localhost, use_mock_origin};
use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::IMAGE_CONTENT_TYPE;
use tessera_server::metrics::QUEUE_CONTRACT_VIOLATIONS;
use tessera_server::sweeper::{self, QueueConsumer, handle_batch};
use tessera_storage::ObjectStore;
use tessera_sync::{SweepError, SweepMessage, queue};
use tokio_util::sync::CancellationToken;

const JPEG: &[u8] = b"\xff\xd8\xff\xe0refreshed";

fn mock_token(origin: &MockServer) -> httpmock::Mock<'_> {
    origin.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(200)
            .json_body(json!({ "access_token": "ya29.sweep", "expires_in": 3599 }));
    })
}

async fn seed(store: &dyn ObjectStore, keys: &[&str]) {
    for key in keys {
        store
            .put(key, b"cached".to_vec().into(), IMAGE_CONTENT_TYPE)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn consumer_follows_continuations_to_the_end_of_the_pass() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let origin = MockServer::start();
    let token = mock_token(&origin);
    let metadata = origin.mock(|when, then| {
        when.method(GET)
            .path_contains("/drive/v3/files/")
            .query_param("fields", "name,modifiedTime")
            .header("authorization", "Bearer ya29.sweep");
        then.status(200).json_body(json!({
            "name": "card.jpg",
            "modifiedTime": "2001-01-01T00:00:00Z"
        }));
    });

    let server = TestServer::with_config(|config| {
        use_mock_origin(config, &origin);
        config.sweep.page_size = 2;
    })
    .await;
    seed(
        server.storage().as_ref(),
        &[
            "a-small-google_drive",
            "b-small-google_drive",
            "c-small-google_drive",
            "d-small-google_drive",
            "e-small-google_drive",
        ],
    )
    .await;

    let (tx, rx) = queue::channel(4, 1);
    let sweep = Arc::new(sweeper::build_sweep(&server.state, Arc::new(tx)));
    let shutdown = CancellationToken::new();
    let consumer = tokio::spawn(QueueConsumer::new(sweep.clone(), rx).run(shutdown.clone()));

    let first = sweeper::run_page(&sweep, None).await.unwrap();
    assert_eq!(first.listed, 2);
    assert!(first.continued);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while metadata.hits_async().await < 5 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "pass did not finish in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    shutdown.cancel();
    consumer.await.unwrap();

    assert_eq!(metadata.hits_async().await, 5);
    // A fresh token for each of the three pages
    assert_eq!(token.hits_async().await, 3);
}

#[tokio::test]
async fn page_refreshes_stale_and_deletes_missing_identifiers() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let origin = MockServer::start();
    mock_token(&origin);
    origin.mock(|when, then| {
        when.method(GET).path("/drive/v3/files/gone");
        then.status(404)
            .json_body(json!({ "error": { "code": 404, "message": "File not found" } }));
    });
    origin.mock(|when, then| {
        when.method(GET).path("/drive/v3/files/stale");
        then.status(200).json_body(json!({
            "name": "stale.jpg",
            "modifiedTime": "2099-01-01T00:00:00Z"
        }));
    });
    let content = origin.mock(|when, then| {
        when.method(GET).path("/thumbnail").query_param("id", "stale");
        then.status(200).body(JPEG);
    });

    let server = TestServer::with_config(|config| use_mock_origin(config, &origin)).await;
    let store = server.storage();
    seed(
        store.as_ref(),
        &[
            "gone-large-google_drive",
            "gone-small-google_drive",
            "stale-small-google_drive",
        ],
    )
    .await;

    let (tx, _rx) = queue::channel(4, 1);
    let sweep = sweeper::build_sweep(&server.state, Arc::new(tx));
    let report = sweeper::run_page(&sweep, None).await.unwrap();

    assert_eq!(report.listed, 3);
    assert_eq!(report.checked, 2);
    assert_eq!(report.deleted, 1);
    assert_eq!(report.refreshed, 1);
    assert!(!report.continued);

    assert!(store.try_head("gone-small-google_drive").await.unwrap().is_none());
    assert!(store.try_head("gone-large-google_drive").await.unwrap().is_none());
    for key in ["stale-small-google_drive", "stale-large-google_drive"] {
        let object = store.get(key).await.unwrap();
        assert_eq!(object.data.as_ref(), JPEG, "{key}");
    }
    assert_eq!(content.hits_async().await, 2);
}

#[tokio::test]
async fn missing_token_skips_the_invocation() {
    let server = TestServer::new().await;
    seed(server.storage().as_ref(), &["a-small-google_drive"]).await;

    let (tx, _rx) = queue::channel(4, 1);
    let sweep = sweeper::build_sweep(&server.state, Arc::new(tx));
    let result = sweeper::run_page(&sweep, None).await;

    assert!(matches!(result, Err(SweepError::TokenUnavailable)));
    assert!(
        server
            .storage()
            .try_head("a-small-google_drive")
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn malformed_deliveries_are_dropped() {
    let server = TestServer::new().await;
    let (tx, _rx) = queue::channel(4, 1);
    let sweep = sweeper::build_sweep(&server.state, Arc::new(tx));
    let before = QUEUE_CONTRACT_VIOLATIONS.get();

    let message = SweepMessage {
        cursor: "Y3Vyc29y".to_string(),
    }
    .encode()
    .unwrap();

    assert!(handle_batch(&sweep, &[]).await.is_none());
    assert!(
        handle_batch(&sweep, &[message.clone(), message.clone()])
            .await
            .is_none()
    );
    assert!(handle_batch(&sweep, &[b"not json".to_vec()]).await.is_none());
    assert_eq!(QUEUE_CONTRACT_VIOLATIONS.get(), before + 3);

    // A well-formed delivery reaches the sweep, which has no token here
    let result = handle_batch(&sweep, &[message]).await;
    assert!(matches!(result, Some(Err(SweepError::TokenUnavailable))));
}
