//! # Game Server Console Client
//!
//! Speaks the game server's remote-console protocol: a small request/reply
//! protocol on its own TCP port, independent of the game's player traffic.
//! The operations tooling uses it to talk to players before and after a
//! world snapshot and to run ad-hoc server commands.
//!
//! ## Protocol
//!
//! Frames are length-prefixed and little-endian (see [`packet`]). A session
//! logs in with the shared credential, sends a command and collects the reply,
//! which long outputs split across several frames carrying the same request id.
//!
//! ## Connection Lifecycle
//!
//! Each command gets a fresh connection that is closed once the reply has been
//! read or the exchange failed. Connections are never pooled or reused, since
//! the server behind the address may have been replaced since the last call.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use console::send_command;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let reply = send_command("10.0.1.17", 25575, "secret", "list").await?;
//!     println!("{}", reply);
//!     Ok(())
//! }
//! ```

use std::io;
use std::time::Duration;
use thiserror::Error;

pub mod packet;
pub mod session;

pub use session::{
    send_command, send_command_with, ConnectionState, ConsoleOptions, ConsoleSession,
};

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("could not reach console at {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("console authentication failed: {0}")]
    Authentication(String),
    #[error("console protocol error: {0}")]
    Protocol(String),
    #[error("console did not answer within {0:?}")]
    Timeout(Duration),
}
