//! Wire protocol between clients and session workers.
//!
//! Every message is a signed envelope around a small XML document:
//!
//! ```text
//! client ──► worker        d41d8cd98f00b204e9800998ecf8427e
//!                          <request><token>…</token><cmd>EXEC…</cmd></request>
//!
//! worker ──► client        9e107d9d372bb6826bd81d3542a419d6
//!                          <reply>…<challenge>…</challenge><status>OK</status><counter>1</counter></reply>
//! ```

pub mod envelope;
pub mod reply;
pub mod request;
pub mod xml;

pub use envelope::{seal, seal_unsigned, Envelope, EnvelopeError, Signature, UNSIGNED};
pub use reply::{Reply, Status};
pub use request::{Argument, Command, Request, RequestError, RequestItem, StatementSpec};
pub use xml::{XmlError, XmlNode};
