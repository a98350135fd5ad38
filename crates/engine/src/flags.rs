//! Connection and session flag sets
//!
//! Connection flags are read by background server threads without any lock,
//! so they live in an `AtomicU32` with release stores and acquire loads.
//! Session flags belong to a single thread and are a plain bitset.

use std::marker::PhantomData;
use std::sync::atomic::{fence, AtomicU32, Ordering};

use strata_core::{StrataError, StrataResult};

/// A single bit in an atomic flag set.
pub trait Flag: Copy + std::fmt::Debug {
    /// Bit mask for this flag.
    fn bit(self) -> u32;

    /// Monotonic flags can be set but never cleared.
    fn is_monotonic(self) -> bool {
        false
    }
}

/// Connection-level facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnFlag {
    /// Shutdown has begun; servers should exit voluntarily.
    Closing,
    /// No new file may be opened.
    ClosingNoMoreOpens,
    /// Opened in salvage mode.
    Salvage,
    /// Skip freeing per-session structures at close.
    LeakMemory,
    /// The async operation server is running.
    ServerAsync,
    /// The LSM merge server is running.
    ServerLsm,
}

impl Flag for ConnFlag {
    fn bit(self) -> u32 {
        match self {
            ConnFlag::Closing => 1 << 0,
            ConnFlag::ClosingNoMoreOpens => 1 << 1,
            ConnFlag::Salvage => 1 << 2,
            ConnFlag::LeakMemory => 1 << 3,
            ConnFlag::ServerAsync => 1 << 4,
            ConnFlag::ServerLsm => 1 << 5,
        }
    }

    fn is_monotonic(self) -> bool {
        matches!(self, ConnFlag::Closing | ConnFlag::ClosingNoMoreOpens)
    }
}

/// Logging sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFlag {
    /// Write-ahead logging is configured on.
    Enabled,
    /// Recovery ran to completion.
    RecoverDone,
}

impl Flag for LogFlag {
    fn bit(self) -> u32 {
        match self {
            LogFlag::Enabled => 1 << 0,
            LogFlag::RecoverDone => 1 << 1,
        }
    }
}

/// Lock-free set of flags with single-writer, multi-reader semantics.
pub struct FlagSet<F: Flag> {
    bits: AtomicU32,
    _flag: PhantomData<F>,
}

impl<F: Flag> FlagSet<F> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
            _flag: PhantomData,
        }
    }

    /// Set `flag` with release ordering.
    pub fn set(&self, flag: F) {
        self.bits.fetch_or(flag.bit(), Ordering::Release);
    }

    /// Set `flag` and issue a full memory barrier.
    ///
    /// Every thread's next acquire load of the set observes the new bit.
    pub fn set_with_barrier(&self, flag: F) {
        self.set(flag);
        fence(Ordering::SeqCst);
    }

    /// Clear `flag`. Monotonic flags refuse.
    pub fn clear(&self, flag: F) -> StrataResult<()> {
        if flag.is_monotonic() {
            return Err(StrataError::internal(format!(
                "{:?} is monotonic and cannot be cleared",
                flag
            )));
        }
        self.bits.fetch_and(!flag.bit(), Ordering::Release);
        Ok(())
    }

    /// Test `flag` with acquire ordering.
    pub fn is_set(&self, flag: F) -> bool {
        self.bits.load(Ordering::Acquire) & flag.bit() != 0
    }

    /// Raw bits, for diagnostics.
    pub fn bits(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }
}

impl<F: Flag> Default for FlagSet<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Flag> std::fmt::Debug for FlagSet<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FlagSet({:#x})", self.bits())
    }
}

/// Per-session flags. Owned by whichever thread holds the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionFlags(u32);

impl SessionFlags {
    /// Session is used by the engine itself.
    pub const INTERNAL: SessionFlags = SessionFlags(1 << 0);
    /// Operations in this session are not written to the log.
    pub const NO_LOGGING: SessionFlags = SessionFlags(1 << 1);
    /// Session may not acquire data handles.
    pub const NO_DATA_HANDLES: SessionFlags = SessionFlags(1 << 2);

    /// No flags.
    pub const fn empty() -> Self {
        SessionFlags(0)
    }

    /// True when every bit of `other` is set.
    pub const fn contains(self, other: SessionFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`.
    pub fn insert(&mut self, other: SessionFlags) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`.
    pub fn remove(&mut self, other: SessionFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for SessionFlags {
    type Output = SessionFlags;

    fn bitor(self, rhs: SessionFlags) -> SessionFlags {
        SessionFlags(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_set_and_clear() {
        let flags = FlagSet::<ConnFlag>::new();
        assert!(!flags.is_set(ConnFlag::Salvage));
        flags.set(ConnFlag::Salvage);
        assert!(flags.is_set(ConnFlag::Salvage));
        assert!(!flags.is_set(ConnFlag::LeakMemory));
        flags.clear(ConnFlag::Salvage).unwrap();
        assert!(!flags.is_set(ConnFlag::Salvage));
    }

    #[test]
    fn test_closing_flags_are_monotonic() {
        let flags = FlagSet::<ConnFlag>::new();
        flags.set_with_barrier(ConnFlag::Closing);
        assert!(flags.clear(ConnFlag::Closing).is_err());
        assert!(flags.clear(ConnFlag::ClosingNoMoreOpens).is_err());
        assert!(flags.is_set(ConnFlag::Closing));
    }

    #[test]
    fn test_flag_visible_to_polling_thread() {
        let flags = Arc::new(FlagSet::<ConnFlag>::new());
        let reader = Arc::clone(&flags);
        let handle = thread::spawn(move || {
            while !reader.is_set(ConnFlag::Closing) {
                thread::yield_now();
            }
            true
        });
        flags.set_with_barrier(ConnFlag::Closing);
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_session_flags() {
        let mut flags = SessionFlags::INTERNAL | SessionFlags::NO_DATA_HANDLES;
        assert!(flags.contains(SessionFlags::INTERNAL));
        assert!(flags.contains(SessionFlags::NO_DATA_HANDLES));
        assert!(!flags.contains(SessionFlags::NO_LOGGING));
        flags.remove(SessionFlags::NO_DATA_HANDLES);
        assert!(!flags.contains(SessionFlags::NO_DATA_HANDLES));
        flags.insert(SessionFlags::NO_LOGGING);
        assert!(flags.contains(SessionFlags::NO_LOGGING));
    }
}
