use dbrelay::config::{Credential, CredentialTable, EngineConfig};
use dbrelay::driver::{SqliteDriver, Value};
use dbrelay::marshal::TabularResult;
use dbrelay::worker::{ClientError, WorkerClient};
use dbrelay::Engine;
use std::sync::Arc;

const SECRET: &str = "s3cret";

const SCHEMA: &[&str] = &[
    "CREATE TABLE dept (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE)",
    "CREATE TABLE emp (id INTEGER PRIMARY KEY AUTOINCREMENT, \
     dept_id INTEGER REFERENCES dept(id) ON DELETE CASCADE, \
     salary REAL DEFAULT 0, \
     CHECK (salary >= 0))",
    "CREATE VIEW staff AS SELECT id FROM emp",
    "CREATE TRIGGER emp_audit AFTER INSERT ON emp BEGIN SELECT 1; END",
];

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
    for sql in SCHEMA {
        client.exec_sql(sql, false).await.unwrap();
    }
    (engine, client)
}

fn column_names(result: &TabularResult) -> Vec<&str> {
    result.fields.iter().map(|f| f.name.as_str()).collect()
}

fn texts<'a>(result: &'a TabularResult, column: &str) -> Vec<&'a str> {
    (0..result.rows.len())
        .filter_map(|row| match result.get(row, column) {
            Some(Value::Text(s)) => Some(s.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_meta_info() {
    let (_engine, mut client) = connected().await;

    let result = client.meta("info", &[]).await.unwrap();
    assert_eq!(column_names(&result), vec!["name"]);
    assert_eq!(result.rows.len(), 1);
}

#[tokio::test]
async fn test_meta_tables() {
    let (_engine, mut client) = connected().await;

    let result = client.meta("tables", &[]).await.unwrap();
    assert_eq!(result.fields.len(), 9);
    let names = texts(&result, "table_name");
    assert!(names.contains(&"dept"));
    assert!(names.contains(&"emp"));
    assert!(!names.contains(&"staff"));

    let result = client
        .meta("tables", &[("table_name", "emp")])
        .await
        .unwrap();
    assert_eq!(texts(&result, "table_name"), vec!["emp"]);
    assert_eq!(texts(&result, "table_type"), vec!["BASE TABLE"]);
}

#[tokio::test]
async fn test_meta_views() {
    let (_engine, mut client) = connected().await;

    let result = client.meta("views", &[]).await.unwrap();
    assert_eq!(result.fields.len(), 6);
    assert_eq!(texts(&result, "table_name"), vec!["staff"]);
}

#[tokio::test]
async fn test_meta_columns() {
    let (_engine, mut client) = connected().await;

    let result = client
        .meta("columns", &[("table_name", "emp")])
        .await
        .unwrap();
    assert_eq!(result.fields.len(), 24);
    assert_eq!(texts(&result, "column_name"), vec!["id", "dept_id", "salary"]);
    assert_eq!(result.get(1, "ordinal_position"), Some(&Value::Int(2)));
    assert_eq!(result.get(0, "extra"), Some(&Value::Text("AUTO_INCREMENT".into())));
}

#[tokio::test]
async fn test_meta_constraints_ref() {
    let (_engine, mut client) = connected().await;

    let result = client
        .meta("constraints_ref", &[("table_name", "emp")])
        .await
        .unwrap();
    assert_eq!(result.fields.len(), 11);
    assert_eq!(result.rows.len(), 1);
    assert_eq!(texts(&result, "delete_rule"), vec!["CASCADE"]);
}

#[tokio::test]
async fn test_meta_triggers() {
    let (_engine, mut client) = connected().await;

    let result = client.meta("triggers", &[]).await.unwrap();
    assert_eq!(result.fields.len(), 13);
    assert_eq!(texts(&result, "trigger_name"), vec!["emp_audit"]);
}

#[tokio::test]
async fn test_meta_btypes_and_schemas() {
    let (_engine, mut client) = connected().await;

    let btypes = client.meta("btypes", &[]).await.unwrap();
    assert_eq!(btypes.fields.len(), 6);
    assert!(texts(&btypes, "short_type_name").contains(&"INTEGER"));

    let schemas = client.meta("schemas", &[]).await.unwrap();
    assert_eq!(column_names(&schemas).len(), 4);
}

#[tokio::test]
async fn test_unknown_meta_type() {
    let (_engine, mut client) = connected().await;

    let err = client.meta("rainbows", &[]).await.unwrap_err();
    assert!(matches!(err, ClientError::Remote(ref msg) if msg == "Unknown META command rainbows"));
}
