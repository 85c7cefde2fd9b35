//! End-to-end relay tests: a real listener, the axum router and
//! `TerminalClient` on the other end of the socket.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::{PROMPT, UnreachableConnector, echo_state, test_state, token_for};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use termrelay_client::{ClientConfig, ClientEvent, EventStream, TerminalClient};
use termrelay_server::routes::router;
use termrelay_server::state::AppState;
use termrelay_types::UserId;
use tokio::time::timeout;
use tower::ServiceExt;

async fn serve(state: Arc<AppState>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client(addr: SocketAddr, connection_id: i64, token: String, client_id: &str) -> (TerminalClient, EventStream) {
    TerminalClient::new(
        ClientConfig::new(format!("ws://{}", addr), connection_id)
            .with_token(token)
            .with_client_id(client_id),
    )
}

async fn next_event(rx: &mut EventStream) -> ClientEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended")
}

/// Collect output events until the accumulated text ends with `suffix`.
async fn read_output_until(rx: &mut EventStream, suffix: &str) -> String {
    let mut text = String::new();
    while !text.ends_with(suffix) {
        match next_event(rx).await {
            ClientEvent::Output(data) => text.push_str(&data),
            other => panic!("expected output, got {:?}", other),
        }
    }
    text
}

async fn wait_until_empty(state: &AppState) {
    timeout(Duration::from_secs(5), async {
        while !state.registry.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry did not empty");
}

async fn expect_streaming(rx: &mut EventStream) {
    assert_eq!(next_event(rx).await, ClientEvent::Connected);
    assert_eq!(
        next_event(rx).await,
        ClientEvent::Status("Connecting to deploy@10.0.0.5:22...".into())
    );
    assert_eq!(next_event(rx).await, ClientEvent::Status("connected".into()));
    assert_eq!(read_output_until(rx, PROMPT).await, PROMPT);
}

#[tokio::test]
async fn test_terminal_round_trip() {
    let state = echo_state();
    let addr = serve(state.clone()).await;
    let (client, mut rx) = client(addr, 5, token_for(1), "tab-1");

    assert!(client.connect());
    expect_streaming(&mut rx).await;

    let sessions = state.registry.list_for_user(UserId(1));
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].client_id.as_str(), "tab-1");

    assert!(client.send_resize(120, 40));
    assert!(client.send_input("ls\n"));
    assert_eq!(read_output_until(&mut rx, "ls\n").await, "ls\n");

    client.disconnect();
    assert_eq!(next_event(&mut rx).await, ClientEvent::Disconnected);
    wait_until_empty(&state).await;
}

#[tokio::test]
async fn test_rest_input_reaches_live_session() {
    let state = echo_state();
    let addr = serve(state.clone()).await;
    let (client, mut rx) = client(addr, 5, token_for(1), "tab-1");
    client.connect();
    expect_streaming(&mut rx).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/sessions/5/tab-1/input")
        .header(header::AUTHORIZATION, format!("Bearer {}", token_for(1)))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"data":"pwd\n"}"#))
        .unwrap();
    let response = router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(read_output_until(&mut rx, "pwd\n").await, "pwd\n");

    // Another user cannot see or drive the session.
    let request = Request::builder()
        .method("DELETE")
        .uri("/api/sessions/5/tab-1")
        .header(header::AUTHORIZATION, format!("Bearer {}", token_for(2)))
        .body(Body::empty())
        .unwrap();
    let response = router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/sessions/5/tab-1")
        .header(header::AUTHORIZATION, format!("Bearer {}", token_for(1)))
        .body(Body::empty())
        .unwrap();
    let response = router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert_eq!(next_event(&mut rx).await, ClientEvent::Status("disconnected".into()));
    assert_eq!(next_event(&mut rx).await, ClientEvent::Disconnected);
    wait_until_empty(&state).await;
}

#[tokio::test]
async fn test_reconnect_with_same_client_supersedes() {
    let state = echo_state();
    let addr = serve(state.clone()).await;

    let (first, mut first_rx) = client(addr, 5, token_for(1), "tab-1");
    first.connect();
    expect_streaming(&mut first_rx).await;

    let (second, mut second_rx) = client(addr, 5, token_for(1), "tab-1");
    second.connect();
    expect_streaming(&mut second_rx).await;

    assert_eq!(
        next_event(&mut first_rx).await,
        ClientEvent::Status("disconnected".into())
    );
    assert_eq!(next_event(&mut first_rx).await, ClientEvent::Disconnected);
    assert_eq!(state.registry.len(), 1);

    assert!(second.send_input("echo hi\n"));
    assert_eq!(read_output_until(&mut second_rx, "echo hi\n").await, "echo hi\n");
    second.disconnect();
    wait_until_empty(&state).await;
}

#[tokio::test]
async fn test_rejected_socket_gets_error_frame() {
    let state = echo_state();
    let addr = serve(state.clone()).await;

    let (bad_token, mut rx) = client(addr, 5, "not-a-token".to_string(), "tab-1");
    bad_token.connect();
    assert_eq!(next_event(&mut rx).await, ClientEvent::Connected);
    assert_eq!(next_event(&mut rx).await, ClientEvent::Error("Unauthorized".into()));
    assert_eq!(next_event(&mut rx).await, ClientEvent::Disconnected);

    let (foreign, mut rx) = client(addr, 6, token_for(1), "tab-1");
    foreign.connect();
    assert_eq!(next_event(&mut rx).await, ClientEvent::Connected);
    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::Error("Connection belongs to another user".into())
    );
    assert_eq!(next_event(&mut rx).await, ClientEvent::Disconnected);

    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn test_unreachable_host_reports_error() {
    let state = test_state(Arc::new(UnreachableConnector));
    let addr = serve(state.clone()).await;
    let (client, mut rx) = client(addr, 5, token_for(1), "tab-1");

    client.connect();
    assert_eq!(next_event(&mut rx).await, ClientEvent::Connected);
    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::Status("Connecting to deploy@10.0.0.5:22...".into())
    );
    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::Error("Remote host unreachable: no route to host".into())
    );
    assert_eq!(next_event(&mut rx).await, ClientEvent::Disconnected);
    wait_until_empty(&state).await;
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let state = echo_state();
    let addr = serve(state.clone()).await;
    let (client, mut rx) = client(addr, 5, token_for(1), "tab-1");
    client.connect();
    expect_streaming(&mut rx).await;

    state.registry.shutdown().await;
    assert!(state.registry.is_empty());
    assert_eq!(next_event(&mut rx).await, ClientEvent::Status("disconnected".into()));
    assert_eq!(next_event(&mut rx).await, ClientEvent::Disconnected);
}
