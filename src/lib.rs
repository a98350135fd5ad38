//! Strata connection lifecycle
//!
//! Opens and closes Strata database connections: ordered startup of cache,
//! transactions, logging, recovery, and background servers, and an ordered
//! shutdown that keeps going past failures and reports the first one.
//!
//! # Quick Start
//!
//! ```ignore
//! use strata_lifecycle::open_home;
//!
//! // Reads (or writes a default) strata.toml in the home directory
//! let conn = open_home("/var/lib/strata")?;
//!
//! // Stops every server thread, releases the lock file
//! conn.close()?;
//! ```

pub use strata_core::{ErrorKind, FirstError, StrataError, StrataResult};
pub use strata_engine::*;
