use dbrelay::config::{Credential, CredentialTable, EngineConfig};
use dbrelay::driver::SqliteDriver;
use dbrelay::protocol::{seal_unsigned, Command, Envelope, Reply, Request, Status};
use dbrelay::worker::transport::{read_frame, write_frame};
use dbrelay::worker::ExitReason;
use dbrelay::Engine;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;

const SECRET: &str = "s3cret";

fn engine(heartbeat: Duration) -> Engine {
    let mut config = EngineConfig::with_secret(SECRET);
    config.heartbeat_interval = heartbeat;
    let credentials = CredentialTable::new(vec![Credential::new("mem", "pw", "sqlite::memory:")]);
    Engine::new(config, credentials, Arc::new(SqliteDriver::new()))
}

/// Next non-empty frame, decoded and checked against `key`.
async fn next_reply(reader: &mut DuplexStream, key: &str) -> Reply {
    loop {
        let frame = read_frame(reader).await.unwrap().unwrap();
        if frame.is_empty() {
            continue;
        }
        let raw = String::from_utf8(frame).unwrap();
        let envelope = Envelope::parse(&raw).unwrap();
        assert!(envelope.signature.verifies(key, &envelope.payload));
        return Reply::parse(&envelope.payload).unwrap();
    }
}

#[tokio::test]
async fn test_stream_session_greets_and_answers_hello() {
    let engine = engine(Duration::from_secs(5));
    let (client_out, server_in) = tokio::io::duplex(4096);
    let (server_out, mut client_in) = tokio::io::duplex(4096);

    let server = tokio::spawn(async move { engine.serve_stream(server_in, server_out, None).await });
    let mut client_out = client_out;

    let greeting = next_reply(&mut client_in, SECRET).await;
    assert_eq!(greeting.status, Some(Status::Ok));
    assert_eq!(greeting.counter, Some(1));
    let session = greeting.text_of("session").unwrap().to_string();

    let hello = Request::new().command(Command::Hello);
    write_frame(&mut client_out, seal_unsigned(&hello.to_xml()).as_bytes())
        .await
        .unwrap();
    let reply = next_reply(&mut client_in, SECRET).await;
    assert_eq!(reply.status, Some(Status::Ok));
    assert_eq!(reply.text_of("session"), Some(session.as_str()));
    assert!(reply.challenge.is_some());

    drop(client_out);
    assert_eq!(server.await.unwrap().unwrap(), ExitReason::ClientGone);
}

#[tokio::test]
async fn test_stream_keep_alive_is_empty_frame() {
    let engine = engine(Duration::from_millis(20));
    let (client_out, server_in) = tokio::io::duplex(4096);
    let (server_out, mut client_in) = tokio::io::duplex(4096);

    let server = tokio::spawn(async move { engine.serve_stream(server_in, server_out, None).await });

    let greeting = read_frame(&mut client_in).await.unwrap().unwrap();
    assert!(!greeting.is_empty());
    let keep_alive = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut client_in))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(keep_alive, Some(Vec::new()));

    drop(client_out);
    drop(client_in);
    assert_eq!(server.await.unwrap().unwrap(), ExitReason::ClientGone);
}

#[tokio::test]
async fn test_stream_resumes_named_session() {
    let engine = engine(Duration::from_secs(5));
    let (client_out, server_in) = tokio::io::duplex(4096);
    let (server_out, mut client_in) = tokio::io::duplex(4096);

    let server = tokio::spawn(async move {
        engine
            .serve_stream(server_in, server_out, Some("resumed-session"))
            .await
    });

    let greeting = next_reply(&mut client_in, SECRET).await;
    assert_eq!(greeting.text_of("session"), Some("resumed-session"));

    drop(client_out);
    assert_eq!(server.await.unwrap().unwrap(), ExitReason::ClientGone);
}

#[tokio::test]
async fn test_stream_rejects_unsafe_session_id() {
    let engine = engine(Duration::from_secs(5));
    let (_client_out, server_in) = tokio::io::duplex(64);
    let (server_out, _client_in) = tokio::io::duplex(64);

    let result = engine
        .serve_stream(server_in, server_out, Some("../../etc/passwd"))
        .await;
    assert!(result.is_err());
}
