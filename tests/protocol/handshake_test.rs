use dbrelay::config::{Credential, CredentialTable, EngineConfig};
use dbrelay::crypto::{hmac_hex, rotate_key};
use dbrelay::driver::SqliteDriver;
use dbrelay::protocol::{seal, seal_unsigned, Command, Request, Status};
use dbrelay::worker::{ClientError, ExitReason, WorkerClient};
use dbrelay::Engine;
use std::sync::Arc;

const SECRET: &str = "s3cret";

fn engine_with(config: EngineConfig) -> Engine {
    let credentials = CredentialTable::new(vec![
        Credential::new("mem", "pw", "sqlite::memory:"),
        Credential::new("other", "hunter2", "sqlite::memory:"),
    ]);
    Engine::new(config, credentials, Arc::new(SqliteDriver::new()))
}

fn engine() -> Engine {
    engine_with(EngineConfig::with_secret(SECRET))
}

/// Payload signed with the client's current key, answering its challenge.
fn signed_request(client: &WorkerClient, command: Command) -> String {
    let key = client.current_key().to_string();
    let token = hmac_hex(key.as_bytes(), client.challenge().unwrap_or_default().as_bytes());
    let request = Request::new().token(token).command(command);
    seal(&key, &request.to_xml())
}

#[tokio::test]
async fn test_greeting_announces_session_and_counter() {
    let engine = engine();
    let handle = engine.open_session();
    let id = handle.id.clone();

    let client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    assert_eq!(client.session_id(), Some(id.as_str()));
    assert_eq!(client.counter(), 1);
    assert!(client.challenge().is_none());
}

#[tokio::test]
async fn test_greeting_with_wrong_secret_fails() {
    let engine = engine();
    let handle = engine.open_session();

    let result = WorkerClient::attach(handle.endpoint, "not-the-secret").await;
    assert!(matches!(result, Err(ClientError::BadSignature)));
}

#[tokio::test]
async fn test_hello_issues_challenge() {
    let engine = engine();
    let handle = engine.open_session();
    let id = handle.id.clone();
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();

    let reply = client.hello().await.unwrap();
    assert_eq!(reply.status, Some(Status::Ok));
    assert_eq!(reply.text_of("session"), Some(id.as_str()));
    assert!(client.challenge().is_some());
    assert_eq!(client.current_key(), SECRET);
}

#[tokio::test]
async fn test_connect_rotates_key() {
    let engine = engine();
    let handle = engine.open_session();
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();

    let reply = client.connect("mem", "pw").await.unwrap();
    assert_eq!(reply.text_of("servertype"), Some("SQLite"));
    assert!(reply.text_of("serverversion").is_some());
    assert_eq!(client.current_key(), rotate_key("mem/AND/pw"));

    // The rotated key keeps working.
    let result = client.exec_sql("SELECT 1 AS n", true).await.unwrap();
    assert!(result.rows.is_some());
}

#[tokio::test]
async fn test_connect_picks_matching_credential() {
    let engine = engine();
    let handle = engine.open_session();
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();

    client.connect("other", "hunter2").await.unwrap();
    assert_eq!(client.current_key(), rotate_key("other/AND/hunter2"));
}

#[tokio::test]
async fn test_connect_with_unknown_credential() {
    let engine = engine();
    let handle = engine.open_session();
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();

    let err = client.connect("mem", "wrong").await.unwrap_err();
    assert!(matches!(err, ClientError::Remote(ref msg) if msg == "Connection not found"));
    assert_eq!(client.current_key(), SECRET);

    // A fresh challenge was issued, so the client can retry.
    client.connect("mem", "pw").await.unwrap();
}

#[tokio::test]
async fn test_command_before_hello_is_protocol_error() {
    let engine = engine();
    let handle = engine.open_session();
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();

    let request = Request::new().command(Command::Connect);
    let reply = client
        .send_raw(seal(SECRET, &request.to_xml()))
        .await
        .unwrap();
    assert_eq!(reply.status, Some(Status::Error));
    assert_eq!(reply.error.as_deref(), Some("Protocol error"));
    assert!(reply.challenge.is_some());
}

#[tokio::test]
async fn test_command_without_token_is_not_authenticated() {
    let engine = engine();
    let handle = engine.open_session();
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();

    let request = Request::new().command(Command::Connect);
    let reply = client
        .send_raw(seal(SECRET, &request.to_xml()))
        .await
        .unwrap();
    assert_eq!(reply.error.as_deref(), Some("Not authenticated"));
}

#[tokio::test]
async fn test_unsigned_message_after_hello_is_rejected() {
    let engine = engine();
    let handle = engine.open_session();
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();

    let request = Request::new().command(Command::Hello);
    let reply = client
        .send_raw(seal_unsigned(&request.to_xml()))
        .await
        .unwrap();
    assert_eq!(reply.status, Some(Status::Error));
    assert_eq!(reply.error.as_deref(), Some("Authentication error"));
}

#[tokio::test]
async fn test_unsigned_message_after_connect_is_rejected() {
    let engine = engine();
    let handle = engine.open_session();
    let id = handle.id.clone();
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();
    client.connect("mem", "pw").await.unwrap();
    let before = client.challenge().unwrap().to_string();

    let request = Request::new().command(Command::Hello);
    let reply = client
        .send_raw(seal_unsigned(&request.to_xml()))
        .await
        .unwrap();
    assert_eq!(reply.status, Some(Status::Error));
    assert_eq!(reply.error.as_deref(), Some("Authentication error"));
    let fresh = reply.challenge.unwrap();
    assert!(!fresh.is_empty());
    assert_ne!(fresh, before);

    let shared = engine.registry().get(&id).unwrap();
    assert!(!shared.lock().await.closed);
    assert_eq!(client.current_key(), rotate_key("mem/AND/pw"));
    assert!(client.exec_sql("SELECT 1 AS n", true).await.is_ok());
}

#[tokio::test]
async fn test_every_reply_carries_a_fresh_challenge() {
    let engine = engine();
    let handle = engine.open_session();
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();

    let mut seen: Vec<String> = Vec::new();
    let mut record = |client: &WorkerClient| {
        let challenge = client.challenge().unwrap().to_string();
        assert!(!challenge.is_empty());
        for earlier in &seen {
            assert_ne!(earlier, &challenge);
        }
        seen.push(challenge);
    };

    client.hello().await.unwrap();
    record(&client);
    client.connect("mem", "pw").await.unwrap();
    record(&client);
    for _ in 0..3 {
        client.exec_sql("SELECT 1 AS n", true).await.unwrap();
        record(&client);
    }
    // Error replies rotate the challenge too.
    client.commit().await.unwrap_err();
    record(&client);
    client.meta("info", &[]).await.unwrap();
    record(&client);

    assert_eq!(seen.len(), 7);
}

#[tokio::test]
async fn test_replayed_request_is_rejected() {
    let engine = engine();
    let handle = engine.open_session();
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();
    client.connect("mem", "pw").await.unwrap();

    let raw = signed_request(&client, Command::Commit);
    let first = client.send_raw(raw.clone()).await.unwrap();
    // No transaction is open, so COMMIT itself fails, but the token was fine.
    assert_ne!(first.error.as_deref(), Some("Authentication error"));

    let second = client.send_raw(raw).await.unwrap();
    assert_eq!(second.status, Some(Status::Error));
    assert_eq!(second.error.as_deref(), Some("Authentication error"));
}

#[tokio::test]
async fn test_bad_signature_is_rejected() {
    let engine = engine();
    let handle = engine.open_session();
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();

    let request = Request::new().command(Command::Commit);
    let reply = client
        .send_raw(seal("some other key", &request.to_xml()))
        .await
        .unwrap();
    assert_eq!(reply.error.as_deref(), Some("Authentication error"));
}

#[tokio::test]
async fn test_bad_xml_input() {
    let engine = engine();
    let handle = engine.open_session();
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();

    let reply = client
        .send_raw(seal(SECRET, "<request><cmd>HELLO</request>"))
        .await
        .unwrap();
    assert_eq!(reply.error.as_deref(), Some("Bad XML input"));
}

#[tokio::test]
async fn test_unknown_command() {
    let engine = engine();
    let handle = engine.open_session();
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();
    client.connect("mem", "pw").await.unwrap();

    let err = client
        .call(Command::Unknown("DANCE".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Remote(ref msg) if msg == "Unknown command DANCE"));
}

#[tokio::test]
async fn test_token_only_request_has_no_status() {
    let engine = engine();
    let handle = engine.open_session();
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();
    client.connect("mem", "pw").await.unwrap();

    let key = client.current_key().to_string();
    let token = hmac_hex(key.as_bytes(), client.challenge().unwrap_or_default().as_bytes());
    let request = Request::new().token(token);
    let reply = client.send_raw(seal(&key, &request.to_xml())).await.unwrap();
    assert_eq!(reply.status, None);
    assert!(reply.challenge.is_some());
}

#[tokio::test]
async fn test_bye_closes_session() {
    let engine = engine();
    let handle = engine.open_session();
    let id = handle.id.clone();
    let task = handle.task;
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();
    client.connect("mem", "pw").await.unwrap();

    client.bye().await.unwrap();
    assert_eq!(task.await.unwrap(), ExitReason::Closed);

    let shared = engine.registry().get(&id).unwrap();
    assert!(shared.lock().await.closed);
}

#[tokio::test]
async fn test_debug_mode_echoes_session() {
    let mut config = EngineConfig::with_secret(SECRET);
    config.debug = true;
    let engine = engine_with(config);
    let handle = engine.open_session();
    let id = handle.id.clone();
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();

    let reply = client.connect("mem", "pw").await.unwrap();
    assert_eq!(reply.session.as_deref(), Some(id.as_str()));
}
