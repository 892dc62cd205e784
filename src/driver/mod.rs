//! Database collaborator interface.
//!
//! The engine never talks to a database directly. It consumes the narrow
//! capability set below and normalizes every failure to [`DriverError`].
//!
//! ```text
//!   Driver ──connect(connection string)──► Box<dyn Connection>
//!                                             │
//!             transactions, prepare/execute ◄─┤
//!             metadata (Introspect)         ◄─┘
//! ```
//!
//! Calls are blocking; the worker runs them on the blocking thread pool.
//! [`sqlite::SqliteDriver`] is the reference implementation.

mod error;
pub mod sqlite;
mod types;

pub use error::{DriverError, DriverResult};
pub use sqlite::SqliteDriver;
pub use types::*;

/// Opens physical connections from connection strings.
pub trait Driver: Send + Sync {
    /// Open a connection.
    fn connect(&self, connection_string: &str) -> DriverResult<Box<dyn Connection>>;
}

/// A live database connection, owned by exactly one worker.
pub trait Connection: Introspect + Send {
    /// Product name reported in the CONNECT reply, if known.
    fn server_type(&self) -> Option<String>;

    /// Server version reported in the CONNECT reply.
    fn server_version(&self) -> String;

    /// Close the connection.
    fn disconnect(self: Box<Self>) -> DriverResult<()>;

    /// Start a transaction, or set a savepoint when a name is given.
    fn begin_transaction(&mut self, savepoint: Option<&str>) -> DriverResult<()>;

    fn commit(&mut self) -> DriverResult<()>;

    /// Roll back the transaction, or back to a savepoint when a name is given.
    fn rollback(&mut self, savepoint: Option<&str>) -> DriverResult<()>;

    /// Compile a statement.
    fn prepare(
        &mut self,
        sql: &str,
        arg_types: &[ArgType],
        kind: ResultKind,
    ) -> DriverResult<StatementHandle>;

    /// Execute a compiled statement with bound arguments.
    fn execute(&mut self, handle: StatementHandle, args: &[Value]) -> DriverResult<ExecOutcome>;

    /// Release a compiled statement. Unknown handles are ignored.
    fn release(&mut self, handle: StatementHandle);
}

/// Metadata introspection.
pub trait Introspect {
    /// Name of the catalog the connection is bound to.
    fn catalog(&self) -> DriverResult<String>;

    /// Native types the database understands.
    fn native_types(&self) -> DriverResult<Vec<NativeType>>;

    fn list_schemas(&self) -> DriverResult<Vec<String>>;

    fn list_tables(&self) -> DriverResult<Vec<String>>;

    fn list_views(&self) -> DriverResult<Vec<ViewInfo>>;

    /// Columns of `table` in ordinal order.
    fn table_columns(&self, table: &str) -> DriverResult<Vec<ColumnInfo>>;

    /// Every named constraint of `table`.
    fn table_constraints(&self, table: &str) -> DriverResult<Vec<ConstraintDef>>;

    /// Look up one constraint of `table` by name.
    fn constraint_definition(&self, table: &str, name: &str) -> DriverResult<Option<ConstraintDef>> {
        Ok(self
            .table_constraints(table)?
            .into_iter()
            .find(|c| c.name == name))
    }

    /// Trigger names, optionally restricted to one table.
    fn list_triggers(&self, table: Option<&str>) -> DriverResult<Vec<String>>;

    fn trigger_definition(&self, name: &str) -> DriverResult<Option<TriggerDef>>;
}
