//! ProtocolClient against a real TCP listener standing in for the 3D app.
//!
//! Each mock reads newline-terminated commands and answers with whatever
//! the test scripted, split into chunks to exercise frame detection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use meshproto::{
    check_connection, BalancedJson, ClientConfig, Command, ConnectionState, ProbeOutcome,
    ProtocolClient, ProtocolError, ResponseStatus,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// What the mock does with each incoming command.
#[derive(Clone)]
enum Reply {
    /// Write these chunks, pausing briefly between them
    Chunks(Vec<&'static str>),
    /// Write these bytes and then never finish
    Stall(&'static str),
    /// Close the socket after writing these bytes
    HangUp(&'static str),
}

/// Spawn a listener that answers commands in order. Received commands are
/// forwarded on the returned channel.
async fn spawn_listener(replies: Vec<Reply>) -> (u16, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();

        for reply in replies {
            let Ok(Some(line)) = lines.next_line().await else {
                return;
            };
            let _ = tx.send(serde_json::from_str::<Value>(&line).unwrap());

            match reply {
                Reply::Chunks(chunks) => {
                    for chunk in chunks {
                        write.write_all(chunk.as_bytes()).await.unwrap();
                        write.flush().await.unwrap();
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                }
                Reply::Stall(bytes) => {
                    write.write_all(bytes.as_bytes()).await.unwrap();
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    return;
                }
                Reply::HangUp(bytes) => {
                    write.write_all(bytes.as_bytes()).await.unwrap();
                    return;
                }
            }
        }
        // Keep the socket open until the client goes away
        while let Ok(Some(_)) = lines.next_line().await {}
    });

    (port, rx)
}

fn config(port: u16) -> ClientConfig {
    ClientConfig::new("127.0.0.1", port).with_timeout(2_000)
}

/// A port with nothing behind it
async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[tokio::test]
async fn test_execute_sends_command_and_parses_response() {
    let (port, mut seen) =
        spawn_listener(vec![Reply::Chunks(vec![r#"{"status": "ok", "result": {"name": "Cube"}}"#])])
            .await;
    let mut client = ProtocolClient::new(config(port));
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let cmd = Command::with_id("cmd-1", "get_object_info", json!({"name": "Cube"}));
    let response = client.execute(cmd).await.unwrap();

    assert_eq!(response.status, ResponseStatus::Ok);
    assert_eq!(response.result, Some(json!({"name": "Cube"})));
    assert_eq!(client.state(), ConnectionState::Connected);

    let received = seen.recv().await.unwrap();
    assert_eq!(
        received,
        json!({"id": "cmd-1", "type": "get_object_info", "params": {"name": "Cube"}})
    );

    client.close().await;
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_response_split_across_reads() {
    let (port, _seen) = spawn_listener(vec![Reply::Chunks(vec![
        r#"{"status": "ok", "#,
        r#""result": {"objects": [1, 2]"#,
        "}}",
    ])])
    .await;
    let mut client = ProtocolClient::new(config(port));

    let response = client.execute(Command::new("get_scene_info", json!({}))).await.unwrap();
    assert_eq!(response.result, Some(json!({"objects": [1, 2]})));
}

#[tokio::test]
async fn test_connection_reused_across_commands() {
    let (port, mut seen) = spawn_listener(vec![
        Reply::Chunks(vec![r#"{"status": "ok", "result": 1}"#]),
        Reply::Chunks(vec![r#"{"status": "success", "result": 2}"#]),
    ])
    .await;
    let mut client = ProtocolClient::new(config(port));

    let first = client.execute(Command::new("a", json!({}))).await.unwrap();
    let second = client.execute(Command::new("b", json!({}))).await.unwrap();

    assert_eq!(first.result, Some(json!(1)));
    assert_eq!(second.status, ResponseStatus::Success);
    assert_eq!(seen.recv().await.unwrap()["type"], "a");
    assert_eq!(seen.recv().await.unwrap()["type"], "b");
}

#[tokio::test]
async fn test_malformed_json_is_error_response_not_err() {
    let (port, _seen) = spawn_listener(vec![Reply::Chunks(vec!["{oops, not json}"])]).await;
    let mut client = ProtocolClient::new(config(port));

    let response = client.execute(Command::new("get_scene_info", json!({}))).await.unwrap();
    assert_eq!(response.status, ResponseStatus::Error);
    assert!(response.message.unwrap().contains("invalid response payload"));
    assert_eq!(response.raw, "{oops, not json}");
}

#[tokio::test]
async fn test_incomplete_response_times_out() {
    let (port, _seen) = spawn_listener(vec![Reply::Stall(r#"{"status": "ok", "result": "#)]).await;
    let mut client = ProtocolClient::new(ClientConfig::new("127.0.0.1", port).with_timeout(300));

    let start = Instant::now();
    let err = client
        .execute(Command::new("get_scene_info", json!({})))
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, ProtocolError::Timeout { timeout_ms: 300, .. }), "got {:?}", err);
    assert!(
        elapsed < Duration::from_millis(1_500),
        "execute took {:?}, should honour the 300ms timeout",
        elapsed
    );
    assert_eq!(client.state(), ConnectionState::Errored);
}

#[tokio::test]
async fn test_errored_client_fails_fast() {
    let (port, _seen) = spawn_listener(vec![Reply::Stall("{")]).await;
    let mut client = ProtocolClient::new(ClientConfig::new("127.0.0.1", port).with_timeout(200));

    assert!(client.execute(Command::new("a", json!({}))).await.is_err());
    let err = client.execute(Command::new("b", json!({}))).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Errored));

    // close() keeps the terminal errored state
    client.close().await;
    assert_eq!(client.state(), ConnectionState::Errored);
}

#[tokio::test]
async fn test_peer_hangup_mid_response() {
    let (port, _seen) = spawn_listener(vec![Reply::HangUp(r#"{"status": "ok""#)]).await;
    let mut client = ProtocolClient::new(config(port));

    let err = client
        .execute(Command::new("get_scene_info", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionLost { received: 15, .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_connection_refused() {
    let port = dead_port().await;
    let mut client = ProtocolClient::new(config(port));

    let err = client
        .execute(Command::new("get_scene_info", json!({})))
        .await
        .unwrap_err();
    assert!(err.is_timeout_class(), "got {:?}", err);
    assert_eq!(client.state(), ConnectionState::Errored);
}

#[tokio::test]
async fn test_execute_after_close_fails() {
    let (port, _seen) =
        spawn_listener(vec![Reply::Chunks(vec![r#"{"status": "ok"}"#])]).await;
    let mut client = ProtocolClient::new(config(port));

    client.execute(Command::new("a", json!({}))).await.unwrap();
    client.close().await;
    client.close().await;

    let err = client.execute(Command::new("b", json!({}))).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Closed));
}

#[tokio::test]
async fn test_balanced_detector_waits_past_quoted_brace() {
    // The first chunk ends in a quoted brace: TrailingBrace would stop here
    let (port, _seen) = spawn_listener(vec![Reply::Chunks(vec![
        r#"{"status": "ok", "result": "a}"#,
        r#""}"#,
    ])])
    .await;
    let mut client = ProtocolClient::with_detector(config(port), Arc::new(BalancedJson));

    let response = client.execute(Command::new("a", json!({}))).await.unwrap();
    assert_eq!(response.status, ResponseStatus::Ok);
    assert_eq!(response.result, Some(json!("a}")));
}

#[tokio::test]
async fn test_check_connection_live() {
    let (port, mut seen) = spawn_listener(vec![Reply::Chunks(vec![
        r#"{"status": "ok", "result": {"objects": []}}"#,
    ])])
    .await;

    let check = check_connection(&config(port)).await;
    assert!(check.connected);
    assert_eq!(check.outcome, ProbeOutcome::Live);
    assert!(check.error.is_none());
    assert_eq!(seen.recv().await.unwrap()["type"], "get_scene_info");
}

#[tokio::test]
async fn test_check_connection_invalid_payload() {
    let (port, _seen) = spawn_listener(vec![Reply::Chunks(vec!["{hello}"])]).await;

    let check = check_connection(&config(port)).await;
    assert!(!check.connected);
    assert_eq!(check.outcome, ProbeOutcome::InvalidPayload);
    assert!(check.error.is_some());
}

#[tokio::test]
async fn test_check_connection_unreachable_never_panics() {
    let port = dead_port().await;

    let check = check_connection(&config(port)).await;
    assert!(!check.connected);
    assert_eq!(check.outcome, ProbeOutcome::NoResponse);
    assert!(check.error.is_some());
}

#[tokio::test]
async fn test_check_connection_silent_peer_bounded_by_probe_timeout() {
    let (port, _seen) = spawn_listener(vec![Reply::Stall("")]).await;
    let config = ClientConfig::new("127.0.0.1", port)
        .with_timeout(60_000)
        .with_probe_timeout(300);

    let start = Instant::now();
    let check = check_connection(&config).await;

    assert_eq!(check.outcome, ProbeOutcome::NoResponse);
    assert!(check.error.unwrap().contains("timeout"));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_dropped_client_releases_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let peer = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        lines.next_line().await.unwrap();
        write.write_all(b"{\"status\": \"success\"}").await.unwrap();
        // EOF once the client is gone
        lines.next_line().await.unwrap()
    });

    let mut client = ProtocolClient::new(config(port));
    client
        .execute(Command::new("get_scene_info", json!({})))
        .await
        .unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
    drop(client);

    let after_drop = tokio::time::timeout(Duration::from_secs(2), peer)
        .await
        .expect("peer should observe the socket closing")
        .unwrap();
    assert_eq!(after_drop, None);
}
