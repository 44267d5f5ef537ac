//! # Game Server Operations
//!
//! Keeps a spot-hosted game server usable across instance replacement. The
//! server itself runs in a scaling group of one; its world lives on a shared
//! network filesystem. This library does the work around it.
//!
//! ## Operations
//!
//! ### Backup (`backup`)
//! Hourly or on demand. Warns the players over the console, walks the
//! configured world directories, uploads every file into an archival bucket
//! under a per-run timestamp prefix and reports a summary. Failed files are
//! listed in the summary; they never stop the rest of the run.
//!
//! ### DNS Update (`dns`)
//! Runs on every launch event from the scaling group. Looks up the new
//! instance's public address and upserts the public `A` record so players
//! reach the replacement under the same name.
//!
//! ### Console Commands (`notify`)
//! Resolves whichever instance currently runs the server and sends it a
//! command through the [`console`] crate. Player notices are best effort.
//!
//! ## Architecture
//!
//! Every invocation builds an [`OpsContext`] holding one client per control
//! plane (`cloud`). Production wires in the SDK clients from `aws`; tests use
//! the in-memory ones from `memory`. Nothing is cached between invocations:
//! fleet membership is looked up fresh each time (`resolver`).
//!
//! Uploads run on a fixed-width [`WorkerPool`] (`pool`). Directory listing is
//! blocking I/O and runs on the runtime's blocking threads. Dropping an
//! operation's future, e.g. when its deadline expires, aborts the uploads it
//! started.

pub mod aws;
pub mod backup;
pub mod cloud;
pub mod dns;
pub mod error;
pub mod memory;
pub mod notify;
pub mod pool;
pub mod resolver;

pub use backup::{run_backup, run_backup_within};
pub use cloud::OpsContext;
pub use dns::{update_dns, update_dns_within};
pub use error::OpsError;
pub use notify::{notify_players, send_console_command};
pub use pool::WorkerPool;
