//! `<reply>` payloads.
//!
//! Children are emitted in a fixed order:
//!
//! ```text
//! command-specific children, challenge, status[@error], counter, session
//! ```
//!
//! `challenge` is omitted on `CLOSED` replies; the trailing `session` is
//! only present in debug mode.

use std::fmt;

use super::xml::{XmlError, XmlNode};

/// Outcome carried in `<status>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
    Closed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Error => "ERROR",
            Status::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "OK" => Some(Status::Ok),
            "ERROR" => Some(Status::Error),
            "CLOSED" => Some(Status::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reply under construction, or one decoded by a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    /// Command-specific children, in the order commands produced them.
    pub body: Vec<XmlNode>,
    pub challenge: Option<String>,
    pub status: Option<Status>,
    /// Error text, carried in `status/@error`.
    pub error: Option<String>,
    pub counter: Option<u64>,
    /// Trailing session id (debug mode).
    pub session: Option<String>,
}

impl Reply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: XmlNode) {
        self.body.push(node);
    }

    pub fn push_text(&mut self, name: &str, text: impl Into<String>) {
        self.body.push(XmlNode::with_text(name, text));
    }

    /// First body child named `name`.
    pub fn find(&self, name: &str) -> Option<&XmlNode> {
        self.body.iter().find(|n| n.name == name)
    }

    /// Text of the first body child named `name`.
    pub fn text_of(&self, name: &str) -> Option<&str> {
        self.find(name).map(|n| n.text())
    }

    pub fn to_node(&self) -> XmlNode {
        let mut root = XmlNode::new("reply");
        root.children.extend(self.body.iter().cloned());

        if let Some(challenge) = &self.challenge {
            root.push(XmlNode::with_text("challenge", challenge.as_str()));
        }
        if let Some(status) = self.status {
            let mut node = XmlNode::with_text("status", status.as_str());
            if let Some(error) = &self.error {
                node.set_attr("error", error.as_str());
            }
            root.push(node);
        }
        if let Some(counter) = self.counter {
            root.push(XmlNode::with_text("counter", counter.to_string()));
        }
        if let Some(session) = &self.session {
            root.push(XmlNode::with_text("session", session.as_str()));
        }
        root
    }

    pub fn to_xml(&self) -> String {
        self.to_node().to_xml()
    }

    /// Decode a reply payload.
    ///
    /// Everything that is not a protocol field lands in `body`; a session
    /// element that appears before any protocol field is treated as a body
    /// child (HELLO and greeting replies).
    pub fn parse(payload: &str) -> Result<Self, XmlError> {
        let root = XmlNode::parse(payload)?;
        if root.name != "reply" {
            return Err(XmlError(format!("unexpected root <{}>", root.name)));
        }

        let mut reply = Reply::new();
        let mut seen_field = false;
        for child in root.children {
            match child.name.as_str() {
                "challenge" => {
                    seen_field = true;
                    reply.challenge = Some(child.text().to_string());
                }
                "status" => {
                    seen_field = true;
                    reply.status = Status::parse(child.text());
                    reply.error = child.attr_value("error").map(str::to_string);
                }
                "counter" => {
                    seen_field = true;
                    reply.counter = child.text().trim().parse().ok();
                }
                "session" if seen_field => reply.session = Some(child.text().to_string()),
                _ => reply.body.push(child),
            }
        }
        Ok(reply)
    }
}
