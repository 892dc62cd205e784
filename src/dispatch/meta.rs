//! META sub-dispatcher.
//!
//! Each metadata kind produces one `gda_array` whose column names, types
//! and nullability are a wire contract with the client provider:
//!
//! ```text
//! info             name
//! btypes           short_type_name .. internal                (6)
//! schemas          catalog_name .. schema_internal            (4)
//! tables           table_catalog .. table_owner               (9)
//! views            table_catalog .. is_updatable              (6)
//! columns          table_catalog .. column_comments          (24)
//! constraints_tab  constraint_catalog .. initially_deferred  (10)
//! constraints_ref  table_catalog .. delete_rule              (11)
//! key_columns      table_catalog .. ordinal_position          (6)
//! check_columns    table_catalog .. column_name               (5)
//! triggers         trigger_catalog .. trigger_full_name      (13)
//! ```
//!
//! Schemas are reported as the catalog itself; what the driver calls a
//! schema only surfaces through `schemas`.

use std::collections::BTreeMap;

use crate::driver::{ConstraintDef, ConstraintKind, ForeignRef, Introspect, LogicalType, Value};
use crate::marshal::TabularResult;
use crate::protocol::XmlNode;
use crate::worker::{EngineError, EngineResult};

const TEXT: LogicalType = LogicalType::String;
const GINT: LogicalType = LogicalType::Int;
const BOOL: LogicalType = LogicalType::Boolean;

/// Metadata kinds understood by META.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaKind {
    Info,
    Btypes,
    Schemas,
    Tables,
    Views,
    Columns,
    ConstraintsTab,
    ConstraintsRef,
    KeyColumns,
    CheckColumns,
    Triggers,
}

impl MetaKind {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "info" => MetaKind::Info,
            "btypes" => MetaKind::Btypes,
            "schemas" => MetaKind::Schemas,
            "tables" => MetaKind::Tables,
            "views" => MetaKind::Views,
            "columns" => MetaKind::Columns,
            "constraints_tab" => MetaKind::ConstraintsTab,
            "constraints_ref" => MetaKind::ConstraintsRef,
            "key_columns" => MetaKind::KeyColumns,
            "check_columns" => MetaKind::CheckColumns,
            "triggers" => MetaKind::Triggers,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetaKind::Info => "info",
            MetaKind::Btypes => "btypes",
            MetaKind::Schemas => "schemas",
            MetaKind::Tables => "tables",
            MetaKind::Views => "views",
            MetaKind::Columns => "columns",
            MetaKind::ConstraintsTab => "constraints_tab",
            MetaKind::ConstraintsRef => "constraints_ref",
            MetaKind::KeyColumns => "key_columns",
            MetaKind::CheckColumns => "check_columns",
            MetaKind::Triggers => "triggers",
        }
    }
}

/// Optional filters carried as `<arg name="…">` children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaFilter {
    pub schema_name: Option<String>,
    pub table_name: Option<String>,
    pub constraint_name: Option<String>,
}

impl MetaFilter {
    pub fn from_args(args: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| args.get(key).filter(|v| !v.is_empty()).cloned();
        Self {
            schema_name: get("schema_name"),
            table_name: get("table_name"),
            constraint_name: get("constraint_name"),
        }
    }

    fn table(&self, name: &str) -> bool {
        self.table_name.as_deref().map_or(true, |t| t == name)
    }

    fn constraint(&self, name: &str) -> bool {
        self.constraint_name.as_deref().map_or(true, |c| c == name)
    }
}

/// Run one META request and return its `gda_array` node.
pub fn run<C>(conn: &C, kind: &str, args: &BTreeMap<String, String>) -> EngineResult<XmlNode>
where
    C: Introspect + ?Sized,
{
    let kind = MetaKind::parse(kind).ok_or_else(|| EngineError::UnknownMeta(kind.to_string()))?;
    let filter = MetaFilter::from_args(args);

    let result = match kind {
        MetaKind::Info => info(conn)?,
        MetaKind::Btypes => btypes(conn)?,
        MetaKind::Schemas => schemas(conn, &filter)?,
        MetaKind::Tables => tables(conn, &filter)?,
        MetaKind::Views => views(conn, &filter)?,
        MetaKind::Columns => columns(conn, &filter)?,
        MetaKind::ConstraintsTab => constraints_tab(conn, &filter)?,
        MetaKind::ConstraintsRef => constraints_ref(conn, &filter)?,
        MetaKind::KeyColumns => key_columns(conn, &filter)?,
        MetaKind::CheckColumns => check_columns(conn, &filter)?,
        MetaKind::Triggers => triggers(conn, &filter)?,
    };
    Ok(result.to_node())
}

// ============================================================================
// Kinds
// ============================================================================

fn info<C: Introspect + ?Sized>(conn: &C) -> EngineResult<TabularResult> {
    let mut out = TabularResult::new();
    out.declare_column("name", TEXT, false);
    out.push_row(vec![conn.catalog()?.into()]);
    Ok(out)
}

fn btypes<C: Introspect + ?Sized>(conn: &C) -> EngineResult<TabularResult> {
    let mut out = TabularResult::new();
    out.declare_column("short_type_name", TEXT, false)
        .declare_column("full_type_name", TEXT, false)
        .declare_column("gtype", TEXT, false)
        .declare_column("comments", TEXT, true)
        .declare_column("synonyms", TEXT, true)
        .declare_column("internal", BOOL, false);

    for t in conn.native_types()? {
        out.push_row(vec![
            t.name.as_str().into(),
            t.name.as_str().into(),
            t.logical_type.as_wire().into(),
            Value::Null,
            Value::Null,
            Value::Bool(false),
        ]);
    }
    Ok(out)
}

fn schemas<C: Introspect + ?Sized>(conn: &C, filter: &MetaFilter) -> EngineResult<TabularResult> {
    let catalog = conn.catalog()?;
    let mut out = TabularResult::new();
    out.declare_column("catalog_name", TEXT, false)
        .declare_column("schema_name", TEXT, false)
        .declare_column("schema_owner", TEXT, false)
        .declare_column("schema_internal", BOOL, false);

    for schema in conn.list_schemas()? {
        if filter.schema_name.as_deref().is_some_and(|s| s != schema) {
            continue;
        }
        out.push_row(vec![
            catalog.as_str().into(),
            schema.into(),
            Value::Null,
            Value::Bool(false),
        ]);
    }
    Ok(out)
}

fn tables<C: Introspect + ?Sized>(conn: &C, filter: &MetaFilter) -> EngineResult<TabularResult> {
    let catalog = conn.catalog()?;
    let mut out = TabularResult::new();
    out.declare_column("table_catalog", TEXT, false)
        .declare_column("table_schema", TEXT, false)
        .declare_column("table_name", TEXT, false)
        .declare_column("table_type", TEXT, false)
        .declare_column("is_insertable_into", BOOL, true)
        .declare_column("table_comments", TEXT, true)
        .declare_column("table_short_name", TEXT, false)
        .declare_column("table_full_name", TEXT, false)
        .declare_column("table_owner", TEXT, true);

    for table in conn.list_tables()? {
        if !filter.table(&table) {
            continue;
        }
        out.push_row(vec![
            catalog.as_str().into(),
            catalog.as_str().into(),
            table.as_str().into(),
            "BASE TABLE".into(),
            Value::Null,
            Value::Null,
            table.as_str().into(),
            format!("{}.{}", catalog, table).into(),
            Value::Null,
        ]);
    }
    Ok(out)
}

fn views<C: Introspect + ?Sized>(conn: &C, filter: &MetaFilter) -> EngineResult<TabularResult> {
    let catalog = conn.catalog()?;
    let mut out = TabularResult::new();
    out.declare_column("table_catalog", TEXT, false)
        .declare_column("table_schema", TEXT, false)
        .declare_column("table_name", TEXT, false)
        .declare_column("view_definition", TEXT, true)
        .declare_column("check_option", TEXT, true)
        .declare_column("is_updatable", BOOL, true);

    for view in conn.list_views()? {
        if !filter.table(&view.name) {
            continue;
        }
        out.push_row(vec![
            catalog.as_str().into(),
            catalog.as_str().into(),
            view.name.into(),
            view.definition.into(),
            Value::Null,
            Value::Null,
        ]);
    }
    Ok(out)
}

fn columns<C: Introspect + ?Sized>(conn: &C, filter: &MetaFilter) -> EngineResult<TabularResult> {
    let catalog = conn.catalog()?;
    let mut out = TabularResult::new();
    out.declare_column("table_catalog", TEXT, false)
        .declare_column("table_schema", TEXT, false)
        .declare_column("table_name", TEXT, false)
        .declare_column("column_name", TEXT, false)
        .declare_column("ordinal_position", GINT, false)
        .declare_column("column_default", TEXT, true)
        .declare_column("is_nullable", BOOL, false)
        .declare_column("data_type", TEXT, true)
        .declare_column("array_spec", TEXT, true)
        .declare_column("gtype", TEXT, false)
        .declare_column("character_maximum_length", GINT, true)
        .declare_column("character_octet_length", GINT, true)
        .declare_column("numeric_precision", GINT, true)
        .declare_column("numeric_scale", GINT, true)
        .declare_column("datetime_precision", GINT, true)
        .declare_column("character_set_catalog", TEXT, true)
        .declare_column("character_set_schema", TEXT, true)
        .declare_column("character_set_name", TEXT, true)
        .declare_column("collation_catalog", TEXT, true)
        .declare_column("collation_schema", TEXT, true)
        .declare_column("collation_name", TEXT, true)
        .declare_column("extra", TEXT, true)
        .declare_column("is_updatable", BOOL, true)
        .declare_column("column_comments", TEXT, true);

    let tables = match &filter.table_name {
        Some(name) => vec![name.clone()],
        None => conn.list_tables()?,
    };

    for table in tables {
        // A table that cannot be described contributes no rows.
        let Ok(cols) = conn.table_columns(&table) else {
            continue;
        };
        for (idx, col) in cols.into_iter().enumerate() {
            let mut row = vec![
                catalog.as_str().into(),
                catalog.as_str().into(),
                table.as_str().into(),
                col.name.into(),
                Value::Int(idx as i64 + 1),
                col.default.filter(|d| !d.is_empty()).into(),
                Value::Bool(col.nullable),
                col.native_type.into(),
                Value::Null,
                col.logical_type.as_wire().into(),
                col.max_length.map(Value::Int).unwrap_or(Value::Null),
            ];
            // character_octet_length through collation_name
            row.extend(std::iter::repeat(Value::Null).take(10));
            row.push(if col.auto_increment {
                "AUTO_INCREMENT".into()
            } else {
                Value::Null
            });
            row.push(Value::Null);
            row.push(Value::Null);
            out.push_row(row);
        }
    }
    Ok(out)
}

/// Every constraint of every selected table, in table order.
fn selected_constraints<C: Introspect + ?Sized>(
    conn: &C,
    filter: &MetaFilter,
) -> EngineResult<Vec<(String, ConstraintDef)>> {
    let mut out = Vec::new();
    for table in conn.list_tables()? {
        if !filter.table(&table) {
            continue;
        }
        let Ok(constraints) = conn.table_constraints(&table) else {
            continue;
        };
        out.extend(
            constraints
                .into_iter()
                .filter(|c| filter.constraint(&c.name))
                .map(|c| (table.clone(), c)),
        );
    }
    Ok(out)
}

fn constraints_tab<C: Introspect + ?Sized>(
    conn: &C,
    filter: &MetaFilter,
) -> EngineResult<TabularResult> {
    let catalog = conn.catalog()?;
    let mut out = TabularResult::new();
    out.declare_column("constraint_catalog", TEXT, true)
        .declare_column("constraint_schema", TEXT, true)
        .declare_column("constraint_name", TEXT, false)
        .declare_column("table_catalog", TEXT, false)
        .declare_column("table_schema", TEXT, false)
        .declare_column("table_name", TEXT, false)
        .declare_column("constraint_type", TEXT, false)
        .declare_column("check_clause", TEXT, true)
        .declare_column("is_deferrable", BOOL, true)
        .declare_column("initially_deferred", BOOL, true);

    for (table, def) in selected_constraints(conn, filter)? {
        let (deferrable, initially_deferred) = match def.kind {
            ConstraintKind::ForeignKey(_) => {
                (Value::Bool(def.deferrable), Value::Bool(def.initially_deferred))
            }
            _ => (Value::Null, Value::Null),
        };
        out.push_row(vec![
            Value::Null,
            Value::Null,
            def.name.as_str().into(),
            catalog.as_str().into(),
            catalog.as_str().into(),
            table.into(),
            def.kind.as_wire().into(),
            Value::Null,
            deferrable,
            initially_deferred,
        ]);
    }
    Ok(out)
}

fn constraints_ref<C: Introspect + ?Sized>(
    conn: &C,
    filter: &MetaFilter,
) -> EngineResult<TabularResult> {
    let catalog = conn.catalog()?;
    let mut out = TabularResult::new();
    out.declare_column("table_catalog", TEXT, false)
        .declare_column("table_schema", TEXT, false)
        .declare_column("table_name", TEXT, false)
        .declare_column("constraint_name", TEXT, false)
        .declare_column("ref_table_catalog", TEXT, false)
        .declare_column("ref_table_schema", TEXT, false)
        .declare_column("ref_table_name", TEXT, false)
        .declare_column("ref_constraint_name", TEXT, false)
        .declare_column("match_option", TEXT, true)
        .declare_column("update_rule", TEXT, true)
        .declare_column("delete_rule", TEXT, true);

    for (table, def) in selected_constraints(conn, filter)? {
        let ConstraintKind::ForeignKey(fk) = def.kind else {
            continue;
        };
        let ref_pk = referenced_primary_key(conn, &fk);
        out.push_row(vec![
            catalog.as_str().into(),
            catalog.as_str().into(),
            table.into(),
            def.name.into(),
            catalog.as_str().into(),
            catalog.as_str().into(),
            fk.table.as_str().into(),
            ref_pk.into(),
            fk.match_option
                .filter(|m| !m.eq_ignore_ascii_case("UNSPECIFIED") && !m.eq_ignore_ascii_case("NONE"))
                .into(),
            fk.on_update.into(),
            fk.on_delete.into(),
        ]);
    }
    Ok(out)
}

/// Name of the referenced table's primary key covering exactly the
/// referenced columns in order, or an empty string.
fn referenced_primary_key<C: Introspect + ?Sized>(conn: &C, fk: &ForeignRef) -> String {
    let Ok(constraints) = conn.table_constraints(&fk.table) else {
        return String::new();
    };
    constraints
        .into_iter()
        .find(|c| {
            matches!(c.kind, ConstraintKind::PrimaryKey)
                && (fk.fields.is_empty() || c.fields == fk.fields)
        })
        .map(|c| c.name)
        .unwrap_or_default()
}

fn key_columns<C: Introspect + ?Sized>(
    conn: &C,
    filter: &MetaFilter,
) -> EngineResult<TabularResult> {
    let catalog = conn.catalog()?;
    let mut out = TabularResult::new();
    out.declare_column("table_catalog", TEXT, false)
        .declare_column("table_schema", TEXT, false)
        .declare_column("table_name", TEXT, false)
        .declare_column("constraint_name", TEXT, false)
        .declare_column("column_name", TEXT, false)
        .declare_column("ordinal_position", GINT, false);

    for (table, def) in selected_constraints(conn, filter)? {
        if !matches!(def.kind, ConstraintKind::PrimaryKey) {
            continue;
        }
        for (pos, field) in def.fields.iter().enumerate() {
            out.push_row(vec![
                catalog.as_str().into(),
                catalog.as_str().into(),
                table.as_str().into(),
                def.name.as_str().into(),
                field.as_str().into(),
                Value::Int(pos as i64 + 1),
            ]);
        }
    }
    Ok(out)
}

fn check_columns<C: Introspect + ?Sized>(
    conn: &C,
    filter: &MetaFilter,
) -> EngineResult<TabularResult> {
    let catalog = conn.catalog()?;
    let mut out = TabularResult::new();
    out.declare_column("table_catalog", TEXT, false)
        .declare_column("table_schema", TEXT, false)
        .declare_column("table_name", TEXT, false)
        .declare_column("constraint_name", TEXT, false)
        .declare_column("column_name", TEXT, false);

    for (table, def) in selected_constraints(conn, filter)? {
        if !matches!(def.kind, ConstraintKind::Check) {
            continue;
        }
        for field in &def.fields {
            out.push_row(vec![
                catalog.as_str().into(),
                catalog.as_str().into(),
                table.as_str().into(),
                def.name.as_str().into(),
                field.as_str().into(),
            ]);
        }
    }
    Ok(out)
}

fn triggers<C: Introspect + ?Sized>(conn: &C, filter: &MetaFilter) -> EngineResult<TabularResult> {
    let catalog = conn.catalog()?;
    let mut out = TabularResult::new();
    out.declare_column("trigger_catalog", TEXT, false)
        .declare_column("trigger_schema", TEXT, false)
        .declare_column("trigger_name", TEXT, false)
        .declare_column("event_manipulation", TEXT, false)
        .declare_column("event_object_catalog", TEXT, false)
        .declare_column("event_object_schema", TEXT, false)
        .declare_column("event_object_table", TEXT, false)
        .declare_column("action_statement", TEXT, true)
        .declare_column("action_orientation", TEXT, false)
        .declare_column("condition_timing", TEXT, false)
        .declare_column("trigger_comments", TEXT, true)
        .declare_column("trigger_short_name", TEXT, false)
        .declare_column("trigger_full_name", TEXT, false);

    for name in conn.list_triggers(filter.table_name.as_deref())? {
        let Some(def) = conn.trigger_definition(&name)? else {
            continue;
        };
        out.push_row(vec![
            catalog.as_str().into(),
            catalog.as_str().into(),
            name.as_str().into(),
            def.event.into(),
            catalog.as_str().into(),
            catalog.as_str().into(),
            def.table.into(),
            def.body.into(),
            "ROW".into(),
            def.timing.into(),
            def.comment.into(),
            name.as_str().into(),
            format!("{}.{}", catalog, name).into(),
        ]);
    }
    Ok(out)
}
