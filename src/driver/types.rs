//! Value and metadata types exchanged with database drivers.

use serde::{Deserialize, Serialize};

use super::error::{DriverError, DriverResult};

/// Opaque handle to a statement compiled by a driver connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatementHandle(pub u64);

/// What a statement produces when executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// A row set (`<sql type="SELECT">`).
    Rows,
    /// An affected-row count.
    Affected,
}

/// Declared type of a bound argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Blob,
    Date,
    Time,
    Timestamp,
}

impl ArgType {
    /// Parse a wire type name. Unknown names bind as text.
    pub fn from_wire(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "integer" | "int" => ArgType::Integer,
            "float" | "double" => ArgType::Float,
            "decimal" | "numeric" => ArgType::Decimal,
            "boolean" | "bool" => ArgType::Boolean,
            "blob" => ArgType::Blob,
            "date" => ArgType::Date,
            "time" => ArgType::Time,
            "timestamp" => ArgType::Timestamp,
            _ => ArgType::Text,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            ArgType::Integer => "integer",
            ArgType::Float => "float",
            ArgType::Decimal => "decimal",
            ArgType::Boolean => "boolean",
            ArgType::Text => "text",
            ArgType::Blob => "blob",
            ArgType::Date => "date",
            ArgType::Time => "time",
            ArgType::Timestamp => "timestamp",
        }
    }

    /// Convert a raw argument text into a typed value.
    ///
    /// A missing value binds as NULL.
    pub fn coerce(&self, raw: Option<&str>) -> DriverResult<Value> {
        let Some(raw) = raw else {
            return Ok(Value::Null);
        };

        match self {
            ArgType::Integer => raw
                .trim()
                .parse()
                .map(Value::Int)
                .map_err(|_| DriverError::new(format!("Invalid integer argument '{}'", raw))),
            ArgType::Float | ArgType::Decimal => raw
                .trim()
                .parse()
                .map(Value::Double)
                .map_err(|_| DriverError::new(format!("Invalid numeric argument '{}'", raw))),
            ArgType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "f" | "0" | "no" => Ok(Value::Bool(false)),
                _ => Err(DriverError::new(format!(
                    "Invalid boolean argument '{}'",
                    raw
                ))),
            },
            ArgType::Blob => Ok(Value::Blob(raw.as_bytes().to_vec())),
            ArgType::Text | ArgType::Date | ArgType::Time | ArgType::Timestamp => {
                Ok(Value::Text(raw.to_string()))
            }
        }
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Text form used on the wire; `None` for NULL.
    pub fn to_wire(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(true) => Some("TRUE".to_string()),
            Value::Bool(false) => Some("FALSE".to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Double(d) => Some(d.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Option<String>> for Value {
    fn from(s: Option<String>) -> Self {
        s.map(Value::Text).unwrap_or(Value::Null)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Logical column type, named the way the wire names it (`gdatype`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    String,
    Int,
    Int64,
    Double,
    Boolean,
    Numeric,
    Date,
    Time,
    Timestamp,
    Binary,
    Blob,
}

impl LogicalType {
    pub fn as_wire(&self) -> &'static str {
        match self {
            LogicalType::String => "string",
            LogicalType::Int => "gint",
            LogicalType::Int64 => "gint64",
            LogicalType::Double => "gdouble",
            LogicalType::Boolean => "boolean",
            LogicalType::Numeric => "GdaNumeric",
            LogicalType::Date => "GDate",
            LogicalType::Time => "GdaTime",
            LogicalType::Timestamp => "GDateTime",
            LogicalType::Binary => "GdaBinary",
            LogicalType::Blob => "GdaBlob",
        }
    }

    /// Parse a wire type name; unknown names read as strings.
    pub fn from_wire(name: &str) -> Self {
        match name {
            "gint" | "int" => LogicalType::Int,
            "gint64" => LogicalType::Int64,
            "gdouble" | "double" => LogicalType::Double,
            "boolean" | "gboolean" => LogicalType::Boolean,
            "GdaNumeric" => LogicalType::Numeric,
            "GDate" => LogicalType::Date,
            "GdaTime" => LogicalType::Time,
            "GDateTime" | "GdaTimestamp" => LogicalType::Timestamp,
            "GdaBinary" => LogicalType::Binary,
            "GdaBlob" => LogicalType::Blob,
            _ => LogicalType::String,
        }
    }
}

/// Column description of a row set.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDesc {
    pub name: String,
    pub logical_type: LogicalType,
    /// Type as declared in the database, when known.
    pub driver_type: Option<String>,
}

/// Rows returned by a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<ColumnDesc>,
    pub rows: Vec<Vec<Value>>,
}

/// Result of executing a prepared statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    Rows(RowSet),
    Affected(u64),
}

// ============================================================================
// Metadata
// ============================================================================

/// A native type known to the database.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeType {
    pub name: String,
    pub logical_type: LogicalType,
}

/// A view and its defining query.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewInfo {
    pub name: String,
    pub definition: Option<String>,
}

/// Column of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub native_type: Option<String>,
    pub logical_type: LogicalType,
    pub default: Option<String>,
    pub nullable: bool,
    pub max_length: Option<i64>,
    pub auto_increment: bool,
}

/// Kind of a table constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey(ForeignRef),
    Check,
    Unknown,
}

impl ConstraintKind {
    pub fn as_wire(&self) -> &'static str {
        match self {
            ConstraintKind::PrimaryKey => "PRIMARY KEY",
            ConstraintKind::Unique => "UNIQUE",
            ConstraintKind::ForeignKey(_) => "FOREIGN KEY",
            ConstraintKind::Check => "CHECK",
            ConstraintKind::Unknown => "UNKNOWN",
        }
    }
}

/// Target of a foreign key.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignRef {
    pub table: String,
    /// Referenced columns in key order; empty when the key targets the
    /// referenced table's primary key implicitly.
    pub fields: Vec<String>,
    pub match_option: Option<String>,
    pub on_update: Option<String>,
    pub on_delete: Option<String>,
}

/// A named constraint on a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintDef {
    pub name: String,
    pub kind: ConstraintKind,
    /// Constrained columns in key order.
    pub fields: Vec<String>,
    pub deferrable: bool,
    pub initially_deferred: bool,
}

/// A trigger definition.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerDef {
    pub name: String,
    pub table: String,
    /// INSERT, UPDATE or DELETE.
    pub event: String,
    /// BEFORE, AFTER or INSTEAD OF.
    pub timing: String,
    pub body: Option<String>,
    pub comment: Option<String>,
}
