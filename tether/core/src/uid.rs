//! Identifier issuing and reference counting.
//!
//! [`UidAllocator`] hands out compact [`Uid`]s and recycles retired values
//! before advancing into fresh ones, so the identifier space stays bounded
//! by the peak number of simultaneously live identifiers rather than by the
//! total churned over a process lifetime.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Mutex,
};

use tracing::Level;

use crate::error::{Result, TetherError};

/// Opaque handle naming a tracked resource.
///
/// Compares, orders, and hashes by raw value. The all-bits-set value is
/// reserved as [`Uid::INVALID`] and is never issued by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(u32);

impl Uid {
    /// Reserved "no identifier" sentinel.
    pub const INVALID: Uid = Uid(u32::MAX);

    /// Raw value, mostly useful in diagnostics.
    pub fn value(self) -> u32 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl From<u32> for Uid {
    fn from(value: u32) -> Self {
        Uid(value)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{:08x}}}", self.0)
    }
}

/// Pool state behind the allocator's lock.
#[derive(Debug, Default)]
struct UidPool {
    initialized: bool,
    /// Smallest never-yet-issued value.
    next_value: u32,
    /// Retired values, reused smallest-first before `next_value` advances.
    free_pool: BTreeSet<u32>,
    /// Reference count per live identifier, always >= 1 while present.
    live: BTreeMap<Uid, usize>,
}

impl UidPool {
    fn require_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(TetherError::Uninitialized)
        }
    }

    fn count_mut(&mut self, uid: Uid) -> Result<&mut usize> {
        self.live.get_mut(&uid).ok_or(TetherError::NotFound(uid))
    }

    fn reset(&mut self) {
        self.next_value = 0;
        self.free_pool.clear();
        self.live.clear();
    }
}

/// Issues unique identifiers and tracks how many owners each one has.
///
/// Every value is in exactly one of three places at any time: never issued,
/// live with a positive reference count, or retired in the free pool waiting
/// to be reissued. All operations serialize on the allocator's own lock and
/// fail with [`TetherError::Uninitialized`] outside the
/// [`initialize`](Self::initialize)/[`uninitialize`](Self::uninitialize)
/// window.
#[derive(Debug, Default)]
pub struct UidAllocator {
    pool: Mutex<UidPool>,
}

impl UidAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the pools and arms the allocator. Strict: initializing twice
    /// without an intervening teardown is an error.
    pub fn initialize(&self) -> Result<()> {
        let mut pool = self.pool.lock()?;
        if pool.initialized {
            return Err(TetherError::AlreadyInitialized);
        }

        pool.reset();
        pool.initialized = true;
        Ok(())
    }

    /// Clears all state. Identifiers still live are forgotten, not reclaimed
    /// from their holders.
    pub fn uninitialize(&self) -> Result<()> {
        let mut pool = self.pool.lock()?;
        pool.require_initialized()?;

        pool.reset();
        pool.initialized = false;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.pool
            .lock()
            .map(|pool| pool.initialized)
            .unwrap_or(false)
    }

    /// Issues the next identifier with a reference count of 1, preferring
    /// the smallest retired value over a fresh one.
    #[tracing::instrument(level = Level::TRACE, skip(self), ret, err(level = Level::TRACE))]
    pub fn generate(&self) -> Result<Uid> {
        let mut pool = self.pool.lock()?;
        pool.require_initialized()?;

        let uid = match pool.free_pool.pop_first() {
            Some(retired) => Uid(retired),
            None if pool.next_value == Uid::INVALID.0 => {
                return Err(TetherError::InsufficientCapacity)
            }
            None => {
                let fresh = Uid(pool.next_value);
                pool.next_value += 1;
                fresh
            }
        };

        pool.live.insert(uid, 1);
        Ok(uid)
    }

    /// Whether `uid` is currently live.
    pub fn contains(&self, uid: Uid) -> Result<bool> {
        let pool = self.pool.lock()?;
        pool.require_initialized()?;

        Ok(pool.live.contains_key(&uid))
    }

    /// Number of owners currently holding `uid`.
    pub fn reference_count(&self, uid: Uid) -> Result<usize> {
        let pool = self.pool.lock()?;
        pool.require_initialized()?;

        pool.live
            .get(&uid)
            .copied()
            .ok_or(TetherError::NotFound(uid))
    }

    /// Registers one more owner of `uid`, returning the new count.
    pub fn increment_reference(&self, uid: Uid) -> Result<usize> {
        let mut pool = self.pool.lock()?;
        pool.require_initialized()?;

        let count = pool.count_mut(uid)?;
        *count += 1;
        Ok(*count)
    }

    /// Releases one owner of `uid`, returning the count after the call. At
    /// zero the identifier is retired into the free pool and becomes
    /// eligible for reuse.
    #[tracing::instrument(level = Level::TRACE, skip(self), ret, err(level = Level::TRACE))]
    pub fn decrement_reference(&self, uid: Uid) -> Result<usize> {
        let mut pool = self.pool.lock()?;
        pool.require_initialized()?;

        let count = pool.count_mut(uid)?;
        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            pool.live.remove(&uid);
            pool.free_pool.insert(uid.0);
        }

        Ok(remaining)
    }

    /// Number of live identifiers.
    pub fn size(&self) -> Result<usize> {
        let pool = self.pool.lock()?;
        pool.require_initialized()?;

        Ok(pool.live.len())
    }

    /// Pins the next fresh value, for exhaustion tests.
    #[cfg(test)]
    fn set_next_value(&self, value: u32) {
        self.pool.lock().unwrap().next_value = value;
    }
}
