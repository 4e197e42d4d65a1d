//! # Chat Relay Server Library
//!
//! This library provides the relay server for the multi-user chat system. It
//! accepts TCP connections, registers clients by the identity they log in
//! with, and relays their messages to everyone else using the fixed-size
//! frames defined in the `shared` crate.
//!
//! ## Core Responsibilities
//!
//! ### Connection Lifecycle
//! Every accepted connection gets its own session task. The session expects a
//! login frame first; anything else closes the connection without notifying
//! anyone. After login, the session relays frames until the peer quits,
//! disconnects, or sends something it should not, and then deregisters.
//!
//! ### Relaying
//! - Public chat goes to every registered client except the sender, stamped
//!   with the sender's logged-in identity
//! - Private chat goes to the first client registered under the target identity
//! - Who requests are answered with a listing of all online identities
//! - Join and leave events are announced by the system identity
//!
//! ### Operator Console
//! Lines typed on the server's standard input are broadcast to all clients
//! as system messages.
//!
//! ## Architecture Design
//!
//! ### Shared Registry
//! All sessions share one `Registry` guarded by a single async mutex. Broadcasts
//! take a snapshot of the recipients, release the lock, and only then queue
//! frames, so no session ever blocks another on network I/O while holding it.
//!
//! ### Per-Connection Writers
//! Each registered connection has an `Outbox` drained by a dedicated writer
//! task. Frames queued by the owning session and by other sessions' broadcasts
//! are written one whole frame at a time, so frames never interleave on the
//! wire.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! Connection handles, outboxes, and the table of logged-in clients.
//!
//! ### Delivery Module (`delivery`)
//! Broadcast, directed delivery, the who listing, and system notice builders.
//!
//! ### Session Module (`session`)
//! The per-connection state machine.
//!
//! ### Operator Module (`operator`)
//! Console input to system broadcast.
//!
//! ### Network Module (`network`)
//! Listener configuration and the accept loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         port: 9000,
//!         ..ServerConfig::default()
//!     };
//!
//!     let server = ChatServer::bind(&config).await?;
//!
//!     // Relay console lines to clients in the background
//!     let operator = server.operator();
//!     tokio::spawn(operator.run(tokio::io::BufReader::new(tokio::io::stdin())));
//!
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod delivery;
pub mod network;
pub mod operator;
pub mod registry;
pub mod session;

pub use network::{ChatServer, ServerConfig};
pub use registry::{ConnectionHandle, Registry};
pub use session::{Session, SessionEnd};
