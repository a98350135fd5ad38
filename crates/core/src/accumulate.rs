//! First-error accumulation for continue-on-error sequences
//!
//! Teardown paths must run every step even after one fails. [`FirstError`]
//! remembers the first failure it is handed and reports later failures to a
//! caller-supplied sink instead of keeping them.
//!
//! ```text
//! let mut first = FirstError::new();
//! first.record("sweep", sweep.destroy());
//! first.record("eviction", eviction.stop());   // still runs if sweep failed
//! first.into_result()?;
//! ```

use crate::error::{StrataError, StrataResult};

/// Holds the first error seen across a sequence of fallible steps.
#[derive(Debug, Default)]
pub struct FirstError {
    first: Option<(&'static str, StrataError)>,
    discarded: usize,
}

impl FirstError {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of `step`.
    ///
    /// The first error is kept. Later errors are passed to `on_discard`
    /// together with the step name and then dropped.
    pub fn record_with<F>(&mut self, step: &'static str, result: StrataResult<()>, on_discard: F)
    where
        F: FnOnce(&'static str, &StrataError),
    {
        if let Err(e) = result {
            if self.first.is_none() {
                self.first = Some((step, e));
            } else {
                self.discarded += 1;
                on_discard(step, &e);
            }
        }
    }

    /// Record the outcome of `step`, silently dropping errors after the first.
    pub fn record(&mut self, step: &'static str, result: StrataResult<()>) {
        self.record_with(step, result, |_, _| {});
    }

    /// True once any step has failed.
    pub fn is_err(&self) -> bool {
        self.first.is_some()
    }

    /// Name of the step that produced the kept error.
    pub fn failed_step(&self) -> Option<&'static str> {
        self.first.as_ref().map(|(step, _)| *step)
    }

    /// Number of errors dropped because an earlier one was already held.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Consume the accumulator, yielding the first error if any.
    pub fn into_result(self) -> StrataResult<()> {
        match self.first {
            Some((_, e)) => Err(e),
            None => Ok(()),
        }
    }
}
