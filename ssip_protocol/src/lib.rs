//! # SSIP Protocol
//!
//! Client side of SSIP, the line-oriented text protocol spoken by the speech
//! synthesis daemon.
//!
//! This crate provides:
//! - Framing of CR LF delimited replies (`protocol`)
//! - Escaping of outbound data blocks (`escape`)
//! - A [`Connection`] that owns the socket, runs a reading thread and
//!   demultiplexes synchronous replies from pushed events
//! - Event routing to a connection-wide callback and per-message
//!   subscriptions (`dispatch`)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use ssip_protocol::{Connection, Event, Subscription};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = Connection::connect("127.0.0.1:6560")?;
//! conn.send_command("SET", &[&"self", &"CLIENT_NAME", &"joe:demo:main"])?;
//!
//! conn.send_command("SPEAK", &[])?;
//! let subscription = Subscription::new(|event: &Event| {
//!     println!("{:?} for message {}", event.event_type, event.message_id);
//! });
//! let reply = conn.send_data_tracked("Hello world", Some(subscription))?;
//! println!("Queued as message {:?}", reply.message_id());
//!
//! conn.close();
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod escape;
pub mod event;
pub mod protocol;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export commonly used types
pub use connection::Connection;
pub use dispatch::{EventCallback, EventDispatcher, Subscription};
pub use error::{Result, SsipError};
pub use escape::{encode_data_block, escape_data};
pub use event::{Event, EventParseError, EventType};
pub use protocol::{format_command, ProtocolError, Reply, ReplyReader, DEFAULT_HOST, DEFAULT_PORT};
