use dbrelay::cache::sql_digest;
use dbrelay::config::{Credential, CredentialTable, EngineConfig};
use dbrelay::driver::{ArgType, SqliteDriver, Value};
use dbrelay::crypto::rotate_key;
use dbrelay::protocol::{Argument, Command, StatementSpec};
use dbrelay::worker::{ClientError, WorkerClient};
use dbrelay::Engine;
use std::sync::Arc;

const SECRET: &str = "s3cret";

async fn connected() -> (Engine, WorkerClient) {
    let credentials = CredentialTable::new(vec![Credential::new("mem", "pw", "sqlite::memory:")]);
    let engine = Engine::new(
        EngineConfig::with_secret(SECRET),
        credentials,
        Arc::new(SqliteDriver::new()),
    );
    let handle = engine.open_session();
    let mut client = WorkerClient::attach(handle.endpoint, SECRET).await.unwrap();
    client.hello().await.unwrap();
    client.connect("mem", "pw").await.unwrap();
    (engine, client)
}

async fn count_rows(client: &mut WorkerClient, table: &str) -> Value {
    let result = client
        .exec_sql(&format!("SELECT count(*) AS n FROM {}", table), true)
        .await
        .unwrap();
    result.rows.unwrap().get(0, "n").cloned().unwrap()
}

fn arg(arg_type: ArgType, value: Option<&str>) -> Argument {
    Argument {
        arg_type,
        value: value.map(str::to_string),
    }
}

#[tokio::test]
async fn test_select_returns_table() {
    let (_engine, mut client) = connected().await;

    let result = client
        .exec_sql("SELECT 1 AS n, 'x' AS s, NULL AS z", true)
        .await
        .unwrap();
    assert_eq!(result.prepare_hash, Some(sql_digest("SELECT 1 AS n, 'x' AS s, NULL AS z")));
    assert_eq!(result.impacted_rows, None);

    let rows = result.rows.unwrap();
    assert_eq!(rows.rows.len(), 1);
    assert_eq!(rows.get(0, "n"), Some(&Value::Int(1)));
    assert_eq!(rows.get(0, "s"), Some(&Value::Text("x".to_string())));
    assert_eq!(rows.get(0, "z"), Some(&Value::Null));
}

#[tokio::test]
async fn test_statement_reports_impacted_rows() {
    let (_engine, mut client) = connected().await;

    client
        .exec_sql("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", false)
        .await
        .unwrap();
    let result = client
        .exec_sql("INSERT INTO t (name) VALUES ('a'), ('b'), ('c')", false)
        .await
        .unwrap();
    assert_eq!(result.impacted_rows, Some(3));
    assert!(result.rows.is_none());

    let result = client
        .exec_sql("DELETE FROM t WHERE name <> 'a'", false)
        .await
        .unwrap();
    assert_eq!(result.impacted_rows, Some(2));
}

#[tokio::test]
async fn test_prepared_statement_reused() {
    let (_engine, mut client) = connected().await;

    let statement = StatementSpec::new("SELECT 42 AS answer", true);
    let hash = client.prepare(statement.clone()).await.unwrap();
    assert_eq!(hash, sql_digest("SELECT 42 AS answer"));

    // Preparing the same text again yields the same key.
    assert_eq!(client.prepare(statement.clone()).await.unwrap(), hash);

    // A cached statement executes without being prepared again.
    let result = client.exec_prepared(&hash, statement).await.unwrap();
    assert_eq!(result.prepare_hash, None);
    assert_eq!(result.rows.unwrap().get(0, "answer"), Some(&Value::Int(42)));
}

#[tokio::test]
async fn test_unknown_prepare_hash_prepares_inline() {
    let (_engine, mut client) = connected().await;

    let statement = StatementSpec::new("SELECT 7 AS seven", true);
    let result = client.exec_prepared("deadbeef", statement).await.unwrap();
    assert_eq!(result.prepare_hash, Some(sql_digest("SELECT 7 AS seven")));
    assert_eq!(result.rows.unwrap().get(0, "seven"), Some(&Value::Int(7)));
}

#[tokio::test]
async fn test_unprepare_then_exec_prepares_again() {
    let (_engine, mut client) = connected().await;

    let statement = StatementSpec::new("SELECT 1 AS one", true);
    let hash = client.prepare(statement.clone()).await.unwrap();
    client.unprepare(&hash).await.unwrap();
    // Unknown keys are ignored.
    client.unprepare("not-a-key").await.unwrap();

    let result = client.exec_prepared(&hash, statement).await.unwrap();
    assert_eq!(result.prepare_hash, Some(hash));
}

#[tokio::test]
async fn test_exec_binds_typed_arguments() {
    let (_engine, mut client) = connected().await;

    client
        .exec_sql(
            "CREATE TABLE people (id INTEGER, name TEXT, score REAL, active BOOLEAN)",
            false,
        )
        .await
        .unwrap();
    let result = client
        .exec_with_args(
            "INSERT INTO people VALUES (?, ?, ?, ?)",
            false,
            vec![
                arg(ArgType::Integer, Some("7")),
                arg(ArgType::Text, Some("Ada")),
                arg(ArgType::Float, Some("9.5")),
                arg(ArgType::Boolean, Some("true")),
            ],
        )
        .await
        .unwrap();
    assert_eq!(result.impacted_rows, Some(1));

    client
        .exec_with_args(
            "INSERT INTO people VALUES (?, ?, ?, ?)",
            false,
            vec![
                arg(ArgType::Integer, Some("8")),
                arg(ArgType::Text, None),
                arg(ArgType::Float, None),
                arg(ArgType::Boolean, Some("false")),
            ],
        )
        .await
        .unwrap();

    let result = client
        .exec_with_args(
            "SELECT id, name, score, active FROM people WHERE id >= ? ORDER BY id",
            true,
            vec![arg(ArgType::Integer, Some("7"))],
        )
        .await
        .unwrap();
    let rows = result.rows.unwrap();
    assert_eq!(rows.rows.len(), 2);
    assert_eq!(rows.get(0, "name"), Some(&Value::Text("Ada".to_string())));
    assert_eq!(rows.get(0, "score"), Some(&Value::Double(9.5)));
    assert_eq!(rows.get(0, "active"), Some(&Value::Bool(true)));
    assert_eq!(rows.get(1, "name"), Some(&Value::Null));
    assert_eq!(rows.get(1, "active"), Some(&Value::Bool(false)));
}

#[tokio::test]
async fn test_bad_argument_is_reported() {
    let (_engine, mut client) = connected().await;

    let err = client
        .exec_with_args("SELECT ? AS v", true, vec![arg(ArgType::Integer, Some("seven"))])
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Remote(ref msg) if msg.contains("seven")));
}

#[tokio::test]
async fn test_ampersand_survives_round_trip() {
    let (_engine, mut client) = connected().await;

    let result = client
        .exec_sql("SELECT 'fish & chips' AS dish, '&amp;' AS literal", true)
        .await
        .unwrap();
    let rows = result.rows.unwrap();
    assert_eq!(rows.get(0, "dish"), Some(&Value::Text("fish & chips".to_string())));
    assert_eq!(rows.get(0, "literal"), Some(&Value::Text("&amp;".to_string())));
}

#[tokio::test]
async fn test_driver_error_is_remote_error() {
    let (_engine, mut client) = connected().await;

    let err = client
        .exec_sql("SELECT * FROM missing_table", true)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Remote(ref msg) if msg.contains("missing_table")));

    // The session survives.
    assert!(client.exec_sql("SELECT 1 AS n", true).await.is_ok());
}

#[tokio::test]
async fn test_rollback_discards_changes() {
    let (_engine, mut client) = connected().await;
    client
        .exec_sql("CREATE TABLE t (id INTEGER)", false)
        .await
        .unwrap();

    client.begin(None).await.unwrap();
    client
        .exec_sql("INSERT INTO t VALUES (1)", false)
        .await
        .unwrap();
    client.rollback(None).await.unwrap();
    assert_eq!(count_rows(&mut client, "t").await, Value::Int(0));

    client.begin(None).await.unwrap();
    client
        .exec_sql("INSERT INTO t VALUES (1)", false)
        .await
        .unwrap();
    client.commit().await.unwrap();
    assert_eq!(count_rows(&mut client, "t").await, Value::Int(1));
}

#[tokio::test]
async fn test_savepoint_rollback() {
    let (_engine, mut client) = connected().await;
    client
        .exec_sql("CREATE TABLE t (id INTEGER)", false)
        .await
        .unwrap();

    client.begin(None).await.unwrap();
    client
        .exec_sql("INSERT INTO t VALUES (1)", false)
        .await
        .unwrap();
    client.begin(Some("sp1")).await.unwrap();
    client
        .exec_sql("INSERT INTO t VALUES (2)", false)
        .await
        .unwrap();
    client.rollback(Some("sp1")).await.unwrap();
    client.commit().await.unwrap();

    assert_eq!(count_rows(&mut client, "t").await, Value::Int(1));
}

#[tokio::test]
async fn test_commit_without_transaction_fails() {
    let (_engine, mut client) = connected().await;

    let err = client.commit().await.unwrap_err();
    assert!(matches!(err, ClientError::Remote(_)));
}

#[tokio::test]
async fn test_reconnect_clears_prepared_statements() {
    let (_engine, mut client) = connected().await;
    client
        .exec_sql("CREATE TABLE t (id INTEGER)", false)
        .await
        .unwrap();
    let statement = StatementSpec::new("SELECT 3 AS three", true);
    let hash = client.prepare(statement.clone()).await.unwrap();

    let key_before = client.current_key().to_string();
    client.call(Command::Connect).await.unwrap();
    assert_eq!(client.current_key(), rotate_key(&key_before));

    // Fresh in-memory database, empty statement cache.
    let err = client.exec_sql("SELECT * FROM t", true).await.unwrap_err();
    assert!(matches!(err, ClientError::Remote(_)));
    let result = client.exec_prepared(&hash, statement).await.unwrap();
    assert_eq!(result.prepare_hash, Some(hash));
}
