//! A small line-oriented TCP key-value server with blocking reads.
//!
//! The server speaks a five-command text protocol (`SET`, `GET`, `BGET`,
//! `KEYS`, `SHUTDOWN`) over one TCP connection per client, handled by one
//! thread per connection. The interesting command is `BGET`: a read that,
//! when the key is absent, *blocks* until someone `SET`s it or a timeout
//! elapses, built on [`handoff_sync::WaitRegistry`].
//!
//! The crate is split along the obvious seams:
//!
//! - [`protocol`] parses command lines and renders response lines, with no
//!   I/O of its own;
//! - [`store`] is the key-value map, a plain reader-writer-locked
//!   [`HashMap`](std::collections::HashMap);
//! - [`server`] owns the listener, the per-connection threads, and the
//!   shutdown choreography tying the other two together.

#![warn(missing_docs)]

pub mod protocol;
pub mod server;
pub mod store;

#[doc(inline)]
pub use self::{
    protocol::{Command, ProtocolError, Response},
    server::Server,
    store::Store,
};
