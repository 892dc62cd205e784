//! Tabular result marshalling.
//!
//! Row sets travel as a `gda_array` block:
//!
//! ```xml
//! <gda_array>
//!   <gda_array_field id="FI0" name="x" gdatype="gint64" dbtype="INTEGER" nullok="TRUE"/>
//!   <gda_array_data>
//!     <gda_array_row><gda_value>1</gda_value><gda_value isnull="t"/></gda_array_row>
//!   </gda_array_data>
//! </gda_array>
//! ```
//!
//! Ampersands in values are pre-escaped to `&amp;` before regular XML
//! escaping, so a literal `&` appears as `&amp;amp;` on the wire. Receivers
//! undo both layers.

use thiserror::Error;

use crate::driver::{LogicalType, RowSet, Value};
use crate::protocol::XmlNode;

pub const ARRAY_TAG: &str = "gda_array";
const FIELD_TAG: &str = "gda_array_field";
const DATA_TAG: &str = "gda_array_data";
const ROW_TAG: &str = "gda_array_row";
const VALUE_TAG: &str = "gda_value";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    #[error("expected <gda_array>, found <{0}>")]
    NotAnArray(String),

    #[error("row {row} has {found} values, expected {expected}")]
    RowWidth {
        row: usize,
        found: usize,
        expected: usize,
    },
}

/// Declaration of one result column.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub logical_type: LogicalType,
    pub driver_type: Option<String>,
    pub nullable: bool,
}

/// Typed, nullable columns and their rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabularResult {
    pub fields: Vec<FieldSpec>,
    pub rows: Vec<Vec<Value>>,
}

impl TabularResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the next column.
    pub fn declare_column(
        &mut self,
        name: &str,
        logical_type: LogicalType,
        nullable: bool,
    ) -> &mut Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            logical_type,
            driver_type: None,
            nullable,
        });
        self
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    /// Wrap a driver row set; every column is declared nullable.
    pub fn from_row_set(rs: RowSet) -> Self {
        let fields = rs
            .columns
            .into_iter()
            .map(|c| FieldSpec {
                name: c.name,
                logical_type: c.logical_type,
                driver_type: c.driver_type,
                nullable: true,
            })
            .collect();
        Self {
            fields,
            rows: rs.rows,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Value at `row` in the column called `name`.
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        let col = self.column_index(name)?;
        self.rows.get(row)?.get(col)
    }

    pub fn to_node(&self) -> XmlNode {
        let mut array = XmlNode::new(ARRAY_TAG);

        for (idx, field) in self.fields.iter().enumerate() {
            let mut node = XmlNode::new(FIELD_TAG)
                .attr("id", format!("FI{}", idx))
                .attr("name", field.name.as_str())
                .attr("gdatype", field.logical_type.as_wire());
            if let Some(dbtype) = &field.driver_type {
                node.set_attr("dbtype", dbtype.as_str());
            }
            node.set_attr("nullok", if field.nullable { "TRUE" } else { "FALSE" });
            array.push(node);
        }

        let mut data = XmlNode::new(DATA_TAG);
        for row in &self.rows {
            let mut row_node = XmlNode::new(ROW_TAG);
            for value in row {
                row_node.push(match value.to_wire() {
                    Some(text) => XmlNode::with_text(VALUE_TAG, escape_value(&text)),
                    None => XmlNode::new(VALUE_TAG).attr("isnull", "t"),
                });
            }
            data.push(row_node);
        }
        array.push(data);
        array
    }

    pub fn from_node(node: &XmlNode) -> Result<Self, MarshalError> {
        if node.name != ARRAY_TAG {
            return Err(MarshalError::NotAnArray(node.name.clone()));
        }

        let fields: Vec<FieldSpec> = node
            .children_named(FIELD_TAG)
            .map(|f| FieldSpec {
                name: f.attr_value("name").unwrap_or_default().to_string(),
                logical_type: LogicalType::from_wire(f.attr_value("gdatype").unwrap_or("string")),
                driver_type: f.attr_value("dbtype").map(str::to_string),
                nullable: f.attr_value("nullok") != Some("FALSE"),
            })
            .collect();

        let mut rows = Vec::new();
        if let Some(data) = node.child(DATA_TAG) {
            for (row_idx, row_node) in data.children_named(ROW_TAG).enumerate() {
                let values: Vec<Value> = row_node
                    .children_named(VALUE_TAG)
                    .zip(fields.iter())
                    .map(|(v, field)| decode_value(v, field.logical_type))
                    .collect();
                let found = row_node.children_named(VALUE_TAG).count();
                if found != fields.len() {
                    return Err(MarshalError::RowWidth {
                        row: row_idx,
                        found,
                        expected: fields.len(),
                    });
                }
                rows.push(values);
            }
        }

        Ok(Self { fields, rows })
    }
}

/// Pre-escape ampersands in a value text.
pub fn escape_value(text: &str) -> String {
    text.replace('&', "&amp;")
}

/// Undo [`escape_value`].
pub fn unescape_value(text: &str) -> String {
    text.replace("&amp;", "&")
}

fn decode_value(node: &XmlNode, logical_type: LogicalType) -> Value {
    if node.attr_value("isnull") == Some("t") {
        return Value::Null;
    }
    let text = unescape_value(node.text());
    match logical_type {
        LogicalType::Boolean => match text.as_str() {
            "TRUE" | "true" | "t" => Value::Bool(true),
            "FALSE" | "false" | "f" => Value::Bool(false),
            _ => Value::Text(text),
        },
        LogicalType::Int | LogicalType::Int64 => {
            text.parse().map(Value::Int).unwrap_or(Value::Text(text))
        }
        LogicalType::Double => text.parse().map(Value::Double).unwrap_or(Value::Text(text)),
        _ => Value::Text(text),
    }
}
