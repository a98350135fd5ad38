//! Connection lifecycle for the Strata storage engine
//!
//! This crate brings a database connection up and tears it down:
//! - Connection: the handle, its session pool, plugins, extensions, and files
//! - Startup: allocate and publish the handle, create cache and transactions
//! - Worker bootstrap: log, history store precheck, recovery, server threads
//! - Shutdown: ordered teardown that runs every step and keeps the first error
//!
//! The subsystems it drives (cache, log, recovery, eviction, maintenance
//! servers, catalog, history store) sit behind the traits in [`subsystem`].
//! [`builtin`] provides file-backed implementations; [`testing`] provides
//! recording ones.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod background;
pub mod builtin;
pub mod connection;
pub mod extension;
pub mod flags;
pub mod session;
pub mod shared;
pub mod subsystem;
pub mod testing;

pub use connection::{
    open, open_home, open_with, Connection, ConnectionConfig, HistoryStoreState,
};
pub use extension::{LoadedExtension, Plugin, PluginKind, Terminate, Unload};
pub use flags::{ConnFlag, LogFlag, SessionFlags};
pub use session::Session;
pub use shared::ConnectionShared;
pub use subsystem::Subsystems;
