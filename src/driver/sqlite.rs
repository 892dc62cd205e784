//! SQLite reference driver built on `rusqlite`.
//!
//! Accepted connection strings:
//!
//! ```text
//! sqlite://path/to/file.db
//! sqlite:path/to/file.db
//! sqlite::memory:
//! :memory:
//! path/to/file.db
//! ```
//!
//! SQLite has no schemas beyond attached databases and does not name
//! most constraints, so this driver synthesizes names: `pk_<table>` for
//! primary keys, `fk_<table>_<id>` for foreign keys, and the index name for
//! unique constraints. Check constraints are not reflected.

use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::OptionalExtension;

use super::{
    ArgType, ColumnDesc, ColumnInfo, Connection, ConstraintDef, ConstraintKind, Driver,
    DriverError, DriverResult, ExecOutcome, ForeignRef, Introspect, LogicalType, NativeType,
    ResultKind, RowSet, StatementHandle, TriggerDef, Value, ViewInfo,
};

const CATALOG: &str = "main";

/// Where a connection string points.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Memory,
    File(PathBuf),
}

fn parse_connection_string(connection_string: &str) -> DriverResult<Target> {
    let trimmed = connection_string.trim();
    let rest = trimmed
        .strip_prefix("sqlite://")
        .or_else(|| trimmed.strip_prefix("sqlite:"))
        .unwrap_or(trimmed);

    match rest {
        "" => Err(DriverError::new("Empty connection string")),
        ":memory:" => Ok(Target::Memory),
        path => Ok(Target::File(PathBuf::from(path))),
    }
}

/// Opens SQLite connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for SqliteDriver {
    fn connect(&self, connection_string: &str) -> DriverResult<Box<dyn Connection>> {
        let conn = match parse_connection_string(connection_string)? {
            Target::Memory => rusqlite::Connection::open_in_memory()?,
            Target::File(path) => rusqlite::Connection::open(path)?,
        };
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Box::new(SqliteConnection::new(conn)))
    }
}

struct PreparedSql {
    sql: String,
    kind: ResultKind,
}

/// A live SQLite connection with its compiled statements.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
    statements: HashMap<u64, PreparedSql>,
    next_handle: u64,
}

impl SqliteConnection {
    pub fn new(conn: rusqlite::Connection) -> Self {
        Self {
            conn,
            statements: HashMap::new(),
            next_handle: 1,
        }
    }

    fn query_strings(&self, sql: &str, param: Option<&str>) -> DriverResult<Vec<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(param), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn primary_key(&self, table: &str) -> DriverResult<Option<ConstraintDef>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, pk FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk")?;
        let fields = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(ConstraintDef {
            name: format!("pk_{}", table),
            kind: ConstraintKind::PrimaryKey,
            fields,
            deferrable: false,
            initially_deferred: false,
        }))
    }

    fn unique_constraints(&self, table: &str) -> DriverResult<Vec<ConstraintDef>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM pragma_index_list(?1) WHERE \"unique\" = 1 AND origin != 'pk' ORDER BY name",
        )?;
        let names = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let fields = self.query_strings(
                "SELECT name FROM pragma_index_info(?1) ORDER BY seqno",
                Some(&name),
            )?;
            out.push(ConstraintDef {
                name,
                kind: ConstraintKind::Unique,
                fields,
                deferrable: false,
                initially_deferred: false,
            });
        }
        Ok(out)
    }

    fn foreign_keys(&self, table: &str) -> DriverResult<Vec<ConstraintDef>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, \"table\", \"from\", \"to\", on_update, on_delete, \"match\" \
             FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
        )?;
        let rows = stmt.query_map([table], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut out: Vec<(i64, ConstraintDef)> = Vec::new();
        for row in rows {
            let (id, ref_table, from, to, on_update, on_delete, match_option) = row?;

            if let Some((_, def)) = out.iter_mut().find(|(fk_id, _)| *fk_id == id) {
                def.fields.push(from);
                if let (ConstraintKind::ForeignKey(fref), Some(to)) = (&mut def.kind, to) {
                    fref.fields.push(to);
                }
                continue;
            }

            let fref = ForeignRef {
                table: ref_table,
                fields: to.into_iter().collect(),
                match_option: match_option.filter(|m| m != "NONE" && m != "UNSPECIFIED"),
                on_update,
                on_delete,
            };
            out.push((
                id,
                ConstraintDef {
                    name: format!("fk_{}_{}", table, id),
                    kind: ConstraintKind::ForeignKey(fref),
                    fields: vec![from],
                    deferrable: false,
                    initially_deferred: false,
                },
            ));
        }
        Ok(out.into_iter().map(|(_, def)| def).collect())
    }
}

impl Connection for SqliteConnection {
    fn server_type(&self) -> Option<String> {
        Some("SQLite".to_string())
    }

    fn server_version(&self) -> String {
        rusqlite::version().to_string()
    }

    fn disconnect(self: Box<Self>) -> DriverResult<()> {
        let this = *self;
        this.conn.close().map_err(|(_, err)| DriverError::from(err))
    }

    fn begin_transaction(&mut self, savepoint: Option<&str>) -> DriverResult<()> {
        match savepoint {
            Some(name) => self
                .conn
                .execute_batch(&format!("SAVEPOINT {}", quote_ident(name)))?,
            None => self.conn.execute_batch("BEGIN")?,
        }
        Ok(())
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self, savepoint: Option<&str>) -> DriverResult<()> {
        match savepoint {
            Some(name) => self
                .conn
                .execute_batch(&format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name)))?,
            None => self.conn.execute_batch("ROLLBACK")?,
        }
        Ok(())
    }

    fn prepare(
        &mut self,
        sql: &str,
        arg_types: &[ArgType],
        kind: ResultKind,
    ) -> DriverResult<StatementHandle> {
        {
            let stmt = self.conn.prepare_cached(sql)?;
            let expected = stmt.parameter_count();
            if !arg_types.is_empty() && arg_types.len() != expected {
                return Err(DriverError::new(format!(
                    "Statement expects {} arguments, {} declared",
                    expected,
                    arg_types.len()
                )));
            }
        }

        let handle = StatementHandle(self.next_handle);
        self.next_handle += 1;
        self.statements.insert(
            handle.0,
            PreparedSql {
                sql: sql.to_string(),
                kind,
            },
        );
        Ok(handle)
    }

    fn execute(&mut self, handle: StatementHandle, args: &[Value]) -> DriverResult<ExecOutcome> {
        let prepared = self
            .statements
            .get(&handle.0)
            .ok_or_else(|| DriverError::new("Unknown prepared statement"))?;

        let mut stmt = self.conn.prepare_cached(&prepared.sql)?;
        let expected = stmt.parameter_count();
        if expected != args.len() {
            return Err(DriverError::new(format!(
                "Statement expects {} arguments, {} given",
                expected,
                args.len()
            )));
        }
        for (idx, value) in args.iter().enumerate() {
            stmt.raw_bind_parameter(idx + 1, to_sql_value(value))?;
        }

        let columns: Vec<(String, Option<String>)> = stmt
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.decl_type().map(str::to_string)))
            .collect();

        if prepared.kind == ResultKind::Affected && columns.is_empty() {
            let changed = stmt.raw_execute()?;
            return Ok(ExecOutcome::Affected(changed as u64));
        }

        let mut data: Vec<Vec<Value>> = Vec::new();
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                values.push(from_sql_value(row.get_ref(idx)?));
            }
            data.push(values);
        }

        if prepared.kind == ResultKind::Affected {
            // Row-producing statement run as a manipulation: rows are discarded.
            return Ok(ExecOutcome::Affected(0));
        }

        Ok(ExecOutcome::Rows(build_row_set(columns, data)))
    }

    fn release(&mut self, handle: StatementHandle) {
        self.statements.remove(&handle.0);
    }
}

impl Introspect for SqliteConnection {
    fn catalog(&self) -> DriverResult<String> {
        Ok(CATALOG.to_string())
    }

    fn native_types(&self) -> DriverResult<Vec<NativeType>> {
        let types = [
            ("BLOB", LogicalType::Binary),
            ("BOOLEAN", LogicalType::Boolean),
            ("DATE", LogicalType::Date),
            ("INTEGER", LogicalType::Int64),
            ("NUMERIC", LogicalType::Numeric),
            ("REAL", LogicalType::Double),
            ("TEXT", LogicalType::String),
            ("TIME", LogicalType::Time),
            ("TIMESTAMP", LogicalType::Timestamp),
        ];
        Ok(types
            .into_iter()
            .map(|(name, logical_type)| NativeType {
                name: name.to_string(),
                logical_type,
            })
            .collect())
    }

    fn list_schemas(&self) -> DriverResult<Vec<String>> {
        self.query_strings("SELECT name FROM pragma_database_list ORDER BY seq", None)
    }

    fn list_tables(&self) -> DriverResult<Vec<String>> {
        self.query_strings(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            None,
        )
    }

    fn list_views(&self) -> DriverResult<Vec<ViewInfo>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, sql FROM sqlite_master WHERE type = 'view' ORDER BY name")?;
        let views = stmt
            .query_map([], |row| {
                Ok(ViewInfo {
                    name: row.get(0)?,
                    definition: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(views)
    }

    fn table_columns(&self, table: &str) -> DriverResult<Vec<ColumnInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
        )?;
        let rows = stmt
            .query_map([table], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let pk_count = rows.iter().filter(|(.., pk)| *pk > 0).count();

        Ok(rows
            .into_iter()
            .map(|(name, decl, not_null, default, pk)| {
                // A lone INTEGER PRIMARY KEY aliases the rowid.
                let auto_increment =
                    pk > 0 && pk_count == 1 && decl.eq_ignore_ascii_case("INTEGER");
                ColumnInfo {
                    name,
                    logical_type: logical_type_for_decl(&decl),
                    max_length: declared_length(&decl),
                    native_type: if decl.is_empty() { None } else { Some(decl) },
                    default,
                    nullable: !not_null && pk == 0,
                    auto_increment,
                }
            })
            .collect())
    }

    fn table_constraints(&self, table: &str) -> DriverResult<Vec<ConstraintDef>> {
        let mut out = Vec::new();
        out.extend(self.primary_key(table)?);
        out.extend(self.unique_constraints(table)?);
        out.extend(self.foreign_keys(table)?);
        Ok(out)
    }

    fn list_triggers(&self, table: Option<&str>) -> DriverResult<Vec<String>> {
        match table {
            Some(t) => self.query_strings(
                "SELECT name FROM sqlite_master WHERE type = 'trigger' AND tbl_name = ?1 ORDER BY name",
                Some(t),
            ),
            None => self.query_strings(
                "SELECT name FROM sqlite_master WHERE type = 'trigger' ORDER BY name",
                None,
            ),
        }
    }

    fn trigger_definition(&self, name: &str) -> DriverResult<Option<TriggerDef>> {
        let row = self
            .conn
            .query_row(
                "SELECT tbl_name, sql FROM sqlite_master WHERE type = 'trigger' AND name = ?1",
                [name],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;

        Ok(row.map(|(table, sql)| {
            let (timing, event) = sql
                .as_deref()
                .map(parse_trigger_header)
                .unwrap_or(("BEFORE", "INSERT"));
            TriggerDef {
                name: name.to_string(),
                table,
                event: event.to_string(),
                timing: timing.to_string(),
                body: sql,
                comment: None,
            }
        }))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Double(d) => SqlValue::Real(*d),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(d) => Value::Double(d),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

/// Map a declared column type onto a logical type, following SQLite's
/// affinity rules with a few extra names for temporal and boolean types.
fn logical_type_for_decl(decl: &str) -> LogicalType {
    let upper = decl.to_ascii_uppercase();
    if upper.contains("BOOL") {
        LogicalType::Boolean
    } else if upper.contains("INT") {
        LogicalType::Int64
    } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
        LogicalType::String
    } else if upper.contains("BLOB") {
        LogicalType::Binary
    } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        LogicalType::Double
    } else if upper.contains("TIMESTAMP") || upper.contains("DATETIME") {
        LogicalType::Timestamp
    } else if upper.contains("DATE") {
        LogicalType::Date
    } else if upper.contains("TIME") {
        LogicalType::Time
    } else if upper.contains("NUM") || upper.contains("DEC") {
        LogicalType::Numeric
    } else {
        LogicalType::String
    }
}

fn logical_type_for_value(value: &Value) -> LogicalType {
    match value {
        Value::Int(_) => LogicalType::Int64,
        Value::Double(_) => LogicalType::Double,
        Value::Blob(_) => LogicalType::Binary,
        Value::Bool(_) => LogicalType::Boolean,
        Value::Null | Value::Text(_) => LogicalType::String,
    }
}

/// `VARCHAR(20)` -> 20
fn declared_length(decl: &str) -> Option<i64> {
    let open = decl.find('(')?;
    let close = decl[open..].find(')')? + open;
    decl[open + 1..close].split(',').next()?.trim().parse().ok()
}

fn build_row_set(columns: Vec<(String, Option<String>)>, mut rows: Vec<Vec<Value>>) -> RowSet {
    let descs: Vec<ColumnDesc> = columns
        .into_iter()
        .enumerate()
        .map(|(idx, (name, decl))| {
            let logical_type = match decl.as_deref() {
                Some(d) if !d.is_empty() => logical_type_for_decl(d),
                _ => rows
                    .iter()
                    .map(|r| &r[idx])
                    .find(|v| !v.is_null())
                    .map(logical_type_for_value)
                    .unwrap_or(LogicalType::String),
            };
            ColumnDesc {
                name,
                logical_type,
                driver_type: decl.filter(|d| !d.is_empty()),
            }
        })
        .collect();

    for row in rows.iter_mut() {
        for (value, desc) in row.iter_mut().zip(&descs) {
            if desc.logical_type == LogicalType::Boolean {
                if let Value::Int(i) = value {
                    *value = Value::Bool(*i != 0);
                }
            }
        }
    }

    RowSet {
        columns: descs,
        rows,
    }
}

/// Extract `(timing, event)` from a `CREATE TRIGGER` statement.
fn parse_trigger_header(sql: &str) -> (&'static str, &'static str) {
    let mut timing = "BEFORE";
    let mut event = "INSERT";
    for token in sql.split_whitespace() {
        match token.to_ascii_uppercase().as_str() {
            "BEFORE" => timing = "BEFORE",
            "AFTER" => timing = "AFTER",
            "INSTEAD" => timing = "INSTEAD OF",
            "INSERT" => event = "INSERT",
            "UPDATE" => event = "UPDATE",
            "DELETE" => event = "DELETE",
            "ON" => break,
            _ => {}
        }
    }
    (timing, event)
}
