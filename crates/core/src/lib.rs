//! Core types for the Strata connection layer
//!
//! This crate defines the foundational types shared by the engine:
//! - StrataError / StrataResult: Error type hierarchy
//! - ErrorKind: Coarse error classification
//! - FirstError: First-error accumulator for teardown sequences

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accumulate;
pub mod error;

pub use accumulate::FirstError;
pub use error::{ErrorKind, StrataError, StrataResult};
