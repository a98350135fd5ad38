//! Sessions and the fixed-size session pool
//!
//! A [`Session`] is the context passed to every subsystem call. It carries a
//! back-reference to the connection's shared state, its flags, and the pool
//! slot it occupies. The per-slot auxiliary structures (cursor cache,
//! handle-hash index, deferred-free stash, hazard-pointer table) outlive
//! session close and are only released by connection shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use strata_core::{StrataError, StrataResult};
use tracing::debug;

use crate::flags::SessionFlags;
use crate::shared::ConnectionShared;

/// Name of the placeholder session.
pub const DUMMY_SESSION_NAME: &str = "dummy";

/// Context for one thread's work against a connection.
#[derive(Clone)]
pub struct Session {
    slot: Option<usize>,
    name: &'static str,
    flags: SessionFlags,
    conn: Arc<ConnectionShared>,
}

impl Session {
    /// The placeholder session used before startup and after teardown.
    pub(crate) fn dummy(conn: Arc<ConnectionShared>) -> Self {
        Self {
            slot: None,
            name: DUMMY_SESSION_NAME,
            flags: SessionFlags::INTERNAL,
            conn,
        }
    }

    /// True for the placeholder session.
    pub fn is_dummy(&self) -> bool {
        self.slot.is_none()
    }

    /// Pool slot, `None` for the placeholder.
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    /// Purpose of the session, e.g. `"connection"`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Session flags.
    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    pub(crate) fn clear_flags(&mut self, flags: SessionFlags) {
        self.flags.remove(flags);
    }

    /// Shared state of the owning connection.
    pub fn connection(&self) -> &Arc<ConnectionShared> {
        &self.conn
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("slot", &self.slot)
            .field("name", &self.name)
            .field("flags", &self.flags)
            .finish()
    }
}

/// A cursor kept open across operations for reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedCursor {
    /// Object the cursor is positioned over
    pub uri: String,
}

/// Memory whose release is deferred until no reader can still hold it.
#[derive(Debug)]
pub struct StashEntry {
    /// Generation at which the memory was retired
    pub generation: u64,
    /// The retired allocation
    pub bytes: Box<[u8]>,
}

/// Pages this session is reading; consulted by eviction before reclaiming.
#[derive(Debug)]
pub struct HazardTable {
    slots: Box<[AtomicUsize]>,
}

impl HazardTable {
    fn allocate(len: usize) -> StrataResult<Self> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(len)?;
        slots.extend((0..len).map(|_| AtomicUsize::new(0)));
        Ok(Self {
            slots: slots.into_boxed_slice(),
        })
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True for a zero-length table.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots currently holding a reference.
    pub fn in_use(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.load(Ordering::Acquire) != 0)
            .count()
    }
}

/// Per-slot structures that persist past session close.
#[derive(Debug)]
pub struct SessionAux {
    /// Reusable cursors
    pub cursor_cache: Vec<CachedCursor>,
    /// Data handle uri to handle index
    pub dhandle_hash: HashMap<String, usize>,
    /// Deferred frees
    pub stash: Vec<StashEntry>,
    /// Hazard pointers
    pub hazard: HazardTable,
}

impl SessionAux {
    fn allocate(hazard_max: usize) -> StrataResult<Self> {
        Ok(Self {
            cursor_cache: Vec::new(),
            dhandle_hash: HashMap::new(),
            stash: Vec::new(),
            hazard: HazardTable::allocate(hazard_max)?,
        })
    }
}

#[derive(Debug, Default)]
struct SessionSlot {
    active: bool,
    name: &'static str,
    aux: Option<SessionAux>,
}

/// Fixed-length array of session slots owned by the connection.
#[derive(Debug, Default)]
pub struct SessionPool {
    slots: Vec<SessionSlot>,
    hazard_max: usize,
    leaked: usize,
}

impl SessionPool {
    /// A pool with no slots, the state before startup allocates one.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Allocate a pool of `size` slots whose sessions get `hazard_max`
    /// hazard pointers each.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` if the allocation fails.
    pub fn allocate(size: usize, hazard_max: usize) -> StrataResult<Self> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(size)?;
        slots.extend((0..size).map(|_| SessionSlot::default()));
        Ok(Self {
            slots,
            hazard_max,
            leaked: 0,
        })
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no pool has been allocated.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Sessions currently open.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }

    /// Slots holding auxiliary structures.
    pub fn aux_allocated(&self) -> usize {
        self.slots.iter().filter(|s| s.aux.is_some()).count()
    }

    /// Slots whose auxiliary structures were leaked instead of freed.
    pub fn leaked(&self) -> usize {
        self.leaked
    }

    /// Names of the open sessions, in slot order.
    pub fn active_names(&self) -> Vec<&'static str> {
        self.slots
            .iter()
            .filter(|s| s.active)
            .map(|s| s.name)
            .collect()
    }

    /// Open an internal session.
    ///
    /// `ctx` is the session performing the allocation; it is never the slot
    /// being filled.
    pub fn open_internal(
        &mut self,
        ctx: &Session,
        name: &'static str,
        flags: SessionFlags,
    ) -> StrataResult<Session> {
        let capacity = self.slots.len();
        let (idx, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| !s.active)
            .ok_or_else(|| {
                StrataError::ResourceExhausted(format!(
                    "out of sessions, configured for {} (including internal sessions)",
                    capacity
                ))
            })?;

        if slot.aux.is_none() {
            slot.aux = Some(SessionAux::allocate(self.hazard_max)?);
        }
        slot.active = true;
        slot.name = name;

        let conn = Arc::clone(ctx.connection());
        conn.stats().sessions_open.fetch_add(1, Ordering::Relaxed);
        debug!(target: "strata::conn", by = ctx.name(), session = name, slot = idx, "Opened internal session");

        Ok(Session {
            slot: Some(idx),
            name,
            flags: flags | SessionFlags::INTERNAL,
            conn,
        })
    }

    /// Close a session. Its auxiliary structures stay allocated.
    pub fn close(&mut self, session: Session) -> StrataResult<()> {
        let idx = session
            .slot
            .ok_or_else(|| StrataError::internal("the placeholder session cannot be closed"))?;
        let slot = self
            .slots
            .get_mut(idx)
            .ok_or_else(|| StrataError::internal(format!("session slot {} out of range", idx)))?;
        if !slot.active {
            return Err(StrataError::internal(format!(
                "session '{}' in slot {} closed twice",
                session.name, idx
            )));
        }
        slot.active = false;
        if let Some(aux) = slot.aux.as_mut() {
            aux.cursor_cache.clear();
        }
        session
            .conn
            .stats()
            .sessions_open
            .fetch_sub(1, Ordering::Relaxed);
        debug!(target: "strata::conn", session = session.name, slot = idx, "Closed internal session");
        Ok(())
    }

    /// Remember a cursor opened by `session` for reuse.
    pub fn cache_cursor(&mut self, session: &Session, uri: &str) {
        let aux = session
            .slot
            .and_then(|idx| self.slots.get_mut(idx))
            .and_then(|slot| slot.aux.as_mut());
        if let Some(aux) = aux {
            if !aux.cursor_cache.iter().any(|c| c.uri == uri) {
                aux.cursor_cache.push(CachedCursor {
                    uri: uri.to_string(),
                });
            }
        }
    }

    /// Auxiliary structures of the slot `session` occupies.
    pub fn aux(&self, session: &Session) -> Option<&SessionAux> {
        session
            .slot
            .and_then(|idx| self.slots.get(idx))
            .and_then(|slot| slot.aux.as_ref())
    }

    /// Free every slot's auxiliary structures. Returns how many were freed.
    pub fn discard_aux(&mut self) -> usize {
        let mut freed = 0;
        for slot in &mut self.slots {
            if slot.aux.take().is_some() {
                freed += 1;
            }
        }
        freed
    }

    /// Detach every slot's auxiliary structures without freeing them.
    pub fn leak_aux(&mut self) -> usize {
        let mut leaked = 0;
        for slot in &mut self.slots {
            if let Some(aux) = slot.aux.take() {
                std::mem::forget(aux);
                leaked += 1;
            }
        }
        self.leaked += leaked;
        leaked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HAZARD: usize = 15;

    fn dummy() -> Session {
        Session::dummy(Arc::new(ConnectionShared::new("/tmp/strata-test")))
    }

    #[test]
    fn test_empty_pool_has_no_sessions() {
        let mut pool = SessionPool::empty();
        assert!(pool.is_empty());
        let err = pool
            .open_internal(&dummy(), "connection", SessionFlags::empty())
            .unwrap_err();
        assert_eq!(err.kind(), strata_core::ErrorKind::ResourceExhausted);
        assert_eq!(pool.discard_aux(), 0);
    }

    #[test]
    fn test_allocation_failure_is_resource_exhausted() {
        let err = SessionPool::allocate(usize::MAX, HAZARD).unwrap_err();
        assert_eq!(err.kind(), strata_core::ErrorKind::ResourceExhausted);
    }

    #[test]
    fn test_hazard_allocation_failure_leaves_slot_free() {
        let ctx = dummy();
        let mut pool = SessionPool::allocate(2, usize::MAX / 4).unwrap();
        let err = pool
            .open_internal(&ctx, "connection", SessionFlags::empty())
            .unwrap_err();
        assert_eq!(err.kind(), strata_core::ErrorKind::ResourceExhausted);
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.aux_allocated(), 0);
        assert_eq!(ctx.connection().stats().snapshot().sessions_open, 0);
    }

    #[test]
    fn test_open_and_close() {
        let ctx = dummy();
        let mut pool = SessionPool::allocate(4, HAZARD).unwrap();
        let s = pool
            .open_internal(&ctx, "connection", SessionFlags::NO_DATA_HANDLES)
            .unwrap();
        assert_eq!(s.slot(), Some(0));
        assert!(!s.is_dummy());
        assert!(s.flags().contains(SessionFlags::INTERNAL));
        assert!(s.flags().contains(SessionFlags::NO_DATA_HANDLES));
        assert_eq!(pool.active_names(), vec!["connection"]);
        assert_eq!(ctx.connection().stats().snapshot().sessions_open, 1);

        pool.close(s).unwrap();
        assert_eq!(pool.active_count(), 0);
        assert_eq!(ctx.connection().stats().snapshot().sessions_open, 0);
    }

    #[test]
    fn test_aux_outlives_close() {
        let ctx = dummy();
        let mut pool = SessionPool::allocate(2, HAZARD).unwrap();
        let s = pool.open_internal(&ctx, "hs-exists", SessionFlags::NO_LOGGING).unwrap();
        pool.cache_cursor(&s, "metadata:");
        assert_eq!(pool.aux(&s).unwrap().cursor_cache.len(), 1);
        assert_eq!(pool.aux(&s).unwrap().hazard.len(), HAZARD);
        let probe = s.clone();
        pool.close(s).unwrap();

        let aux = pool.aux(&probe).unwrap();
        assert!(aux.cursor_cache.is_empty());
        assert_eq!(aux.hazard.in_use(), 0);
        assert_eq!(pool.aux_allocated(), 1);

        assert_eq!(pool.discard_aux(), 1);
        assert_eq!(pool.aux_allocated(), 0);
    }

    #[test]
    fn test_slot_reused_after_close() {
        let ctx = dummy();
        let mut pool = SessionPool::allocate(1, HAZARD).unwrap();
        let s = pool.open_internal(&ctx, "a", SessionFlags::empty()).unwrap();
        assert!(pool.open_internal(&ctx, "b", SessionFlags::empty()).is_err());
        pool.close(s).unwrap();
        let s = pool.open_internal(&ctx, "b", SessionFlags::empty()).unwrap();
        assert_eq!(s.slot(), Some(0));
        assert_eq!(pool.aux_allocated(), 1);
    }

    #[test]
    fn test_double_close_and_dummy_close_fail() {
        let ctx = dummy();
        let mut pool = SessionPool::allocate(1, HAZARD).unwrap();
        let s = pool.open_internal(&ctx, "a", SessionFlags::empty()).unwrap();
        pool.close(s.clone()).unwrap();
        assert!(pool.close(s).is_err());
        assert!(pool.close(ctx).is_err());
    }

    #[test]
    fn test_leak_aux_detaches() {
        let ctx = dummy();
        let mut pool = SessionPool::allocate(3, HAZARD).unwrap();
        let a = pool.open_internal(&ctx, "a", SessionFlags::empty()).unwrap();
        let _b = pool.open_internal(&ctx, "b", SessionFlags::empty()).unwrap();
        pool.close(a).unwrap();
        assert_eq!(pool.leak_aux(), 2);
        assert_eq!(pool.aux_allocated(), 0);
        assert_eq!(pool.leaked(), 2);
    }
}
