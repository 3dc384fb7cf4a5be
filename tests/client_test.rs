use httpmock::prelude::*;
use serde_json::json;
use session_coordinator::{CoordinatorClient, CoordinatorError};

#[tokio::test]
async fn test_create_session_posts_flag_keys() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/Sessions")
                .json_body(json!({"SESSION_NAME": "Arena", "SESSION_SEARCH_ID": "abc-def"}));
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({"status": "success", "PORT": 7781}));
        })
        .await;

    let client = CoordinatorClient::new(&server.base_url()).unwrap();
    let port = client.create_session("Arena", "abc-def").await.unwrap();

    assert_eq!(port, 7781);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_rejection_carries_status_and_message() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/Sessions");
            then.status(503)
                .header("Content-Type", "application/json")
                .json_body(json!({"status": "error", "message": "No port available in range 7777-8000"}));
        })
        .await;

    let client = CoordinatorClient::new(&server.base_url()).unwrap();
    match client.create_session("Arena", "abc-def").await {
        Err(CoordinatorError::CoordinatorRejected { status, message }) => {
            assert_eq!(status, 503);
            assert!(message.contains("No port available"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_response_without_port_is_an_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/Sessions");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({"status": "success", "PORT": 70000}));
        })
        .await;

    let client = CoordinatorClient::new(&server.base_url()).unwrap();
    assert!(client.create_session("Arena", "abc-def").await.is_err());
}
