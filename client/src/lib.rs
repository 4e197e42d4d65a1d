//! # Chat Client Library
//!
//! This library provides the terminal client for the multi-user chat relay.
//! It connects over TCP, logs in under a chosen identity, and then runs two
//! halves side by side: one printing whatever the server sends, the other
//! turning lines typed by the user into frames.
//!
//! ## Commands
//!
//! - `quit` leaves the chat
//! - `\who` asks the server who is online
//! - `\msg <user> <message>` sends a private message
//! - a blank line is ignored
//! - anything else is sent to everyone as public chat
//!
//! ## Module Organization
//!
//! ### Input Module (`input`)
//! Parses typed lines into commands and formats received frames for display.
//!
//! ### Network Module (`network`)
//! Owns the connection: login, the send path, and the receive task.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::ChatClient;
//! use tokio::io::{stdin, stdout, BufReader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ChatClient::connect("127.0.0.1:8888", "alice").await?;
//!     let exit = client.run(BufReader::new(stdin()), stdout()).await?;
//!     println!("Disconnected: {:?}", exit);
//!     Ok(())
//! }
//! ```

pub mod input;
pub mod network;

pub use network::{ChatClient, ClientError, ClientExit};
