//! Typed view of a `<request>` payload.
//!
//! ```xml
//! <request>
//!   <token>hex</token>
//!   <cmd>EXEC
//!     <sql type="SELECT">SELECT * FROM t WHERE id = ?</sql>
//!     <preparehash>…</preparehash>
//!     <arguments><arg type="integer">1</arg></arguments>
//!   </cmd>
//! </request>
//! ```
//!
//! Children are kept in document order; a token applies to the commands
//! that follow it.

use std::collections::BTreeMap;

use thiserror::Error;

use super::xml::{XmlError, XmlNode};
use crate::driver::ArgType;

/// Structural problem with a request payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Bad XML input")]
    Malformed(#[from] XmlError),

    #[error("Bad XML input")]
    WrongRoot(String),

    #[error("Bad XML input")]
    UnexpectedChild(String),

    #[error("Bad XML input")]
    MissingElement(&'static str),
}

impl RequestError {
    /// Detail for logs; the reply text stays generic.
    pub fn detail(&self) -> String {
        match self {
            RequestError::Malformed(e) => e.to_string(),
            RequestError::WrongRoot(name) => format!("unexpected root <{}>", name),
            RequestError::UnexpectedChild(name) => format!("unexpected element <{}>", name),
            RequestError::MissingElement(name) => format!("missing <{}>", name),
        }
    }
}

/// One bound argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub arg_type: ArgType,
    /// `None` binds NULL.
    pub value: Option<String>,
}

/// SQL text with its result kind and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementSpec {
    pub sql: String,
    pub returns_rows: bool,
    pub args: Vec<Argument>,
}

impl StatementSpec {
    pub fn new(sql: impl Into<String>, returns_rows: bool) -> Self {
        Self {
            sql: sql.into(),
            returns_rows,
            args: Vec::new(),
        }
    }

    pub fn arg_types(&self) -> Vec<ArgType> {
        self.args.iter().map(|a| a.arg_type).collect()
    }
}

/// The closed set of commands a worker understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Hello,
    Connect,
    Bye,
    Prepare(StatementSpec),
    Unprepare {
        prepare_hash: Option<String>,
    },
    Exec {
        statement: StatementSpec,
        prepare_hash: Option<String>,
    },
    Begin {
        savepoint: Option<String>,
    },
    Commit,
    Rollback {
        savepoint: Option<String>,
    },
    Meta {
        kind: String,
        args: BTreeMap<String, String>,
    },
    Unknown(String),
}

impl Command {
    /// Wire name, for logging.
    pub fn name(&self) -> &str {
        match self {
            Command::Hello => "HELLO",
            Command::Connect => "CONNECT",
            Command::Bye => "BYE",
            Command::Prepare(_) => "PREPARE",
            Command::Unprepare { .. } => "UNPREPARE",
            Command::Exec { .. } => "EXEC",
            Command::Begin { .. } => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Rollback { .. } => "ROLLBACK",
            Command::Meta { .. } => "META",
            Command::Unknown(name) => name,
        }
    }

    /// Serialize as a `<cmd>` element.
    pub fn to_node(&self) -> XmlNode {
        let mut cmd = XmlNode::with_text("cmd", self.name());
        match self {
            Command::Prepare(spec) => push_statement(&mut cmd, spec),
            Command::Exec {
                statement,
                prepare_hash,
            } => {
                push_statement(&mut cmd, statement);
                if let Some(hash) = prepare_hash {
                    cmd.push(XmlNode::with_text("preparehash", hash.as_str()));
                }
            }
            Command::Unprepare {
                prepare_hash: Some(hash),
            } => cmd.push(XmlNode::with_text("preparehash", hash.as_str())),
            Command::Begin {
                savepoint: Some(name),
            }
            | Command::Rollback {
                savepoint: Some(name),
            } => cmd.set_attr("svpname", name.as_str()),
            Command::Meta { kind, args } => {
                cmd.set_attr("type", kind.as_str());
                for (name, value) in args {
                    cmd.push(XmlNode::with_text("arg", value.as_str()).attr("name", name.as_str()));
                }
            }
            _ => {}
        }
        cmd
    }

    fn from_node(node: &XmlNode) -> Result<Self, RequestError> {
        let name = node.text().trim();
        let command = match name {
            "HELLO" => Command::Hello,
            "CONNECT" => Command::Connect,
            "BYE" => Command::Bye,
            "PREPARE" => Command::Prepare(statement_from(node)?),
            "UNPREPARE" => Command::Unprepare {
                prepare_hash: node.child("preparehash").map(|n| n.text().trim().to_string()),
            },
            "EXEC" => Command::Exec {
                statement: statement_from(node)?,
                prepare_hash: node
                    .child("preparehash")
                    .map(|n| n.text().trim().to_string())
                    .filter(|h| !h.is_empty()),
            },
            "BEGIN" => Command::Begin {
                savepoint: node.attr_value("svpname").map(str::to_string),
            },
            "COMMIT" => Command::Commit,
            "ROLLBACK" => Command::Rollback {
                savepoint: node.attr_value("svpname").map(str::to_string),
            },
            "META" => {
                let kind = node
                    .attr_value("type")
                    .ok_or(RequestError::MissingElement("type"))?
                    .to_string();
                let args = node
                    .children_named("arg")
                    .filter_map(|arg| {
                        arg.attr_value("name")
                            .map(|n| (n.to_string(), arg.text().to_string()))
                    })
                    .collect();
                Command::Meta { kind, args }
            }
            other => Command::Unknown(other.to_string()),
        };
        Ok(command)
    }
}

fn statement_from(node: &XmlNode) -> Result<StatementSpec, RequestError> {
    let sql = node
        .child("sql")
        .ok_or(RequestError::MissingElement("sql"))?;
    let returns_rows = sql.attr_value("type") == Some("SELECT");

    let args = match node.child("arguments") {
        Some(arguments) => arguments
            .children_named("arg")
            .map(|arg| {
                let type_name = arg.attr_value("type").unwrap_or("text");
                let is_null = type_name.eq_ignore_ascii_case("NULL")
                    || arg.attr_value("isnull") == Some("t");
                Argument {
                    arg_type: ArgType::from_wire(type_name),
                    value: if is_null {
                        None
                    } else {
                        Some(arg.text().to_string())
                    },
                }
            })
            .collect(),
        None => Vec::new(),
    };

    Ok(StatementSpec {
        sql: sql.text().to_string(),
        returns_rows,
        args,
    })
}

fn push_statement(cmd: &mut XmlNode, spec: &StatementSpec) {
    let mut sql = XmlNode::with_text("sql", spec.sql.as_str());
    if spec.returns_rows {
        sql.set_attr("type", "SELECT");
    }
    cmd.push(sql);

    if !spec.args.is_empty() {
        let mut arguments = XmlNode::new("arguments");
        for arg in &spec.args {
            let node = match &arg.value {
                Some(v) => XmlNode::with_text("arg", v.as_str()).attr("type", arg.arg_type.as_wire()),
                None => XmlNode::new("arg").attr("type", "NULL"),
            };
            arguments.push(node);
        }
        cmd.push(arguments);
    }
}

/// A token or a command, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestItem {
    Token(String),
    Command(Command),
}

/// A parsed request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub items: Vec<RequestItem>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.items.push(RequestItem::Token(token.into()));
        self
    }

    pub fn command(mut self, command: Command) -> Self {
        self.items.push(RequestItem::Command(command));
        self
    }

    /// Parse a payload.
    pub fn parse(payload: &str) -> Result<Self, RequestError> {
        let root = XmlNode::parse(payload)?;
        Self::from_node(&root)
    }

    pub fn from_node(root: &XmlNode) -> Result<Self, RequestError> {
        if root.name != "request" {
            return Err(RequestError::WrongRoot(root.name.clone()));
        }

        let mut items = Vec::with_capacity(root.children.len());
        for child in &root.children {
            match child.name.as_str() {
                "token" => items.push(RequestItem::Token(child.text().trim().to_string())),
                "cmd" => items.push(RequestItem::Command(Command::from_node(child)?)),
                other => return Err(RequestError::UnexpectedChild(other.to_string())),
            }
        }
        Ok(Self { items })
    }

    pub fn to_node(&self) -> XmlNode {
        let mut root = XmlNode::new("request");
        for item in &self.items {
            match item {
                RequestItem::Token(t) => root.push(XmlNode::with_text("token", t.as_str())),
                RequestItem::Command(c) => root.push(c.to_node()),
            }
        }
        root
    }

    pub fn to_xml(&self) -> String {
        self.to_node().to_xml()
    }
}
