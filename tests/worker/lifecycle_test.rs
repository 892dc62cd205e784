use dbrelay::auth::KeyPhase;
use dbrelay::config::{Credential, CredentialTable, EngineConfig};
use dbrelay::crypto::rotate_key;
use dbrelay::driver::{SqliteDriver, Value};
use dbrelay::worker::{ClientError, DirectOutput, ExitReason, WorkerClient};
use dbrelay::Engine;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const SECRET: &str = "s3cret";

const SLOW_QUERY: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 3000000) \
     SELECT count(*) AS n FROM c";

fn config() -> EngineConfig {
    let mut config = EngineConfig::with_secret(SECRET);
    config.respawn_pause = Duration::from_millis(10);
    config
}

fn engine_with(config: EngineConfig, connection_string: &str) -> Engine {
    let credentials = CredentialTable::new(vec![Credential::new("db", "pw", connection_string)]);
    Engine::new(config, credentials, Arc::new(SqliteDriver::new()))
}

fn file_db(dir: &Path) -> String {
    format!("sqlite://{}", dir.join("data.db").display())
}

#[tokio::test]
async fn test_idle_worker_sends_keep_alives() {
    let mut config = config();
    config.heartbeat_interval = Duration::from_millis(20);
    let engine = engine_with(config, "sqlite::memory:");
    let mut handle = engine.open_session();

    let greeting = handle.endpoint.recv_direct_raw().await.unwrap();
    assert!(matches!(greeting, DirectOutput::Message(_)));

    let next = tokio::time::timeout(Duration::from_secs(5), handle.endpoint.recv_direct_raw())
        .await
        .unwrap();
    assert_eq!(next, Some(DirectOutput::KeepAlive));
}

#[tokio::test]
async fn test_worker_exits_when_client_goes_away() {
    let engine = engine_with(config(), "sqlite::memory:");
    let handle = engine.open_session();
    let id = handle.id.clone();
    let task = handle.task;

    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();
    drop(client);

    assert_eq!(task.await.unwrap(), ExitReason::ClientGone);
    // The session stays open for a replacement worker.
    let shared = engine.registry().get(&id).unwrap();
    assert!(!shared.lock().await.closed);
}

#[tokio::test]
async fn test_respawn_on_closed_session_exits() {
    let engine = engine_with(config(), "sqlite::memory:");
    let handle = engine.open_session();
    let id = handle.id.clone();
    let task = handle.task;

    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();
    client.connect("db", "pw").await.unwrap();
    client.bye().await.unwrap();
    assert_eq!(task.await.unwrap(), ExitReason::Closed);

    let mut again = engine.respawn(&id).unwrap();
    assert_eq!(again.task.await.unwrap(), ExitReason::AlreadyClosed);
    // No greeting was written.
    assert_eq!(again.endpoint.recv_direct().await, None);
}

#[tokio::test]
async fn test_time_limit_ends_worker_and_session_resumes() {
    let mut config = config();
    config.execution_limit = Duration::from_millis(100);
    let engine = engine_with(config, "sqlite::memory:");

    let handle = engine.open_session();
    let id = handle.id.clone();
    let task = handle.task;
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();
    client.connect("db", "pw").await.unwrap();
    assert_eq!(client.counter(), 1);

    let err = client.exec_sql(SLOW_QUERY, true).await.unwrap_err();
    assert!(matches!(err, ClientError::Remote(ref msg) if msg == "Execution time limit exceeded"));
    assert_eq!(task.await.unwrap(), ExitReason::TimeLimit);

    // A replacement worker picks the session up where it was left: same
    // key, same outstanding challenge, a connection reopened on demand.
    let handle = engine.respawn(&id).unwrap();
    client.reattach(handle.endpoint).await.unwrap();
    assert_eq!(client.counter(), 2);

    let result = client.exec_sql("SELECT 5 AS n", true).await.unwrap();
    assert_eq!(result.rows.unwrap().get(0, "n"), Some(&Value::Int(5)));
    assert_eq!(client.counter(), 2);
}

#[tokio::test]
async fn test_session_state_is_persisted() {
    let tmp = tempfile::tempdir().unwrap();
    let state_dir = tmp.path().join("sessions");
    let mut config = config();
    config.state_dir = Some(state_dir.clone());
    let connection_string = file_db(tmp.path());

    let engine = engine_with(config.clone(), &connection_string);
    let handle = engine.open_session();
    let id = handle.id.clone();
    let task = handle.task;
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();
    client.connect("db", "pw").await.unwrap();
    drop(client);
    assert_eq!(task.await.unwrap(), ExitReason::ClientGone);
    assert!(state_dir.join(format!("{}.json", id)).exists());

    // A fresh engine, as in a new process, finds the session on disk.
    let engine = engine_with(config, &connection_string);
    let shared = engine.registry().load_or_create(&id).unwrap();
    {
        let state = shared.lock().await;
        assert_eq!(state.counter, 1);
        assert!(!state.closed);
        assert_eq!(state.connection_string.as_deref(), Some(connection_string.as_str()));
        let key = state.key.as_ref().unwrap();
        assert_eq!(key.phase, KeyPhase::Rotated);
        assert_eq!(key.secret, rotate_key("db/AND/pw"));
    }

    let handle = engine.respawn(&id).unwrap();
    let client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    assert_eq!(client.session_id(), Some(id.as_str()));
    assert_eq!(client.counter(), 2);
}

#[tokio::test]
async fn test_worker_exits_when_direct_output_is_not_drained() {
    let mut config = config();
    config.heartbeat_interval = Duration::from_millis(5);
    let engine = engine_with(config, "sqlite::memory:");
    let handle = engine.open_session();
    let _endpoint = handle.endpoint;

    let reason = tokio::time::timeout(Duration::from_secs(5), handle.task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reason, ExitReason::ClientGone);
}

#[tokio::test]
async fn test_closed_session_leaves_memory_when_persisted() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config();
    config.state_dir = Some(tmp.path().join("sessions"));
    let engine = engine_with(config, "sqlite::memory:");

    let handle = engine.open_session();
    let id = handle.id.clone();
    let task = handle.task;
    assert_eq!(engine.registry().len(), 1);

    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();
    client.connect("db", "pw").await.unwrap();
    client.bye().await.unwrap();
    assert_eq!(task.await.unwrap(), ExitReason::Closed);
    assert!(engine.registry().is_empty());

    // The closed state on disk still keeps replacement workers out.
    let mut again = engine.respawn(&id).unwrap();
    assert_eq!(again.task.await.unwrap(), ExitReason::AlreadyClosed);
    assert_eq!(again.endpoint.recv_direct().await, None);
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_new_session_drops_closed_ones() {
    let engine = engine_with(config(), "sqlite::memory:");

    let handle = engine.open_session();
    let task = handle.task;
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();
    client.connect("db", "pw").await.unwrap();
    client.bye().await.unwrap();
    assert_eq!(task.await.unwrap(), ExitReason::Closed);
    assert_eq!(engine.registry().len(), 1);

    let next = engine.open_session();
    assert_eq!(engine.registry().len(), 1);
    assert!(engine.registry().get(&next.id).is_some());
}
