use httpmock::prelude::*;
use serde_json::json;
use url::Url;

use verity_common::error::ProvisionError;
use verity_common::protocol::{BrowserType, SessionRequest};
use verity_engine::driver::Grid;
use verity_wd::SelenoidGrid;

fn grid_for(server: &MockServer) -> SelenoidGrid {
    SelenoidGrid::new(Url::parse(&server.base_url()).unwrap())
}

fn request() -> SessionRequest {
    SessionRequest::remote(
        BrowserType::Chromium,
        Url::parse("http://grid.invalid:4444").unwrap(),
    )
}

#[tokio::test]
async fn free_slot_yields_container_on_the_hub() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/status");
            then.status(200)
                .json_body(json!({"total": 5, "used": 1, "queued": 0, "pending": 0}));
        })
        .await;

    let grid = grid_for(&server);
    let container = grid.request_container(&request()).await.unwrap();
    assert!(container.endpoint.as_str().ends_with("/wd/hub"));
}

#[tokio::test]
async fn deep_queue_is_reported_as_rejection() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/status");
            then.status(200)
                .json_body(json!({"total": 2, "used": 2, "queued": 4, "pending": 0}));
        })
        .await;

    let grid = grid_for(&server);
    let error = grid.request_container(&request()).await.unwrap_err();
    assert!(matches!(error, ProvisionError::Rejected(_)));
}

#[tokio::test]
async fn capacity_comes_from_the_status_document() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/status");
            then.status(200)
                .json_body(json!({"total": 8, "used": 3, "queued": 0, "pending": 0}));
        })
        .await;

    let grid = grid_for(&server);
    assert_eq!(grid.capacity().await, Some(8));
}

#[tokio::test]
async fn unreachable_grid_reports_unknown_capacity() {
    let server = MockServer::start_async().await;
    // No /status mock registered: the probe gets a 404.
    let grid = grid_for(&server);
    assert_eq!(grid.capacity().await, None);
}
