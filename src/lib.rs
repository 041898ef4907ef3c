//! A minimal MongoDB client with an embedded BSON codec.
//!
//! The crate is built from two tightly coupled halves: the `bson` module,
//! which assembles and reads the length-prefixed binary document format,
//! and the wire client (`wire_protocol`, `client`), which frames those
//! documents into legacy protocol messages over a single TCP connection,
//! iterates server-side cursors, and discovers the primary of a replica
//! set.
//!
//! ```no_run
//! use mongolite::Connection;
//! use mongolite::bson::DocumentBuilder;
//! use mongolite::wire_protocol::flags::OpQueryFlags;
//!
//! # fn run() -> mongolite::Result<()> {
//! let mut conn = Connection::new("localhost", 27017)?;
//!
//! let mut builder = DocumentBuilder::new();
//! builder.append_string("hello", "world")?;
//! let doc = builder.into_document()?;
//!
//! conn.insert("test.greetings", &doc)?;
//!
//! let query = mongolite::bson::Document::empty();
//! let mut cursor = conn.find("test.greetings", &query, None, 0, 0, OpQueryFlags::no_flags())?;
//! while cursor.advance()? {
//!     if let Some(doc) = cursor.current() {
//!         println!("{} bytes", doc.size());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate bitflags;
extern crate bufstream;
extern crate byteorder;
extern crate chrono;
extern crate hex;
extern crate md5;
extern crate rand;
extern crate time;

pub mod bson;
pub mod client;
pub mod transport;
pub mod wire_protocol;

mod error;

pub use error::{Error, Result};
pub use client::{Connection, Host};
pub use client::cursor::Cursor;
