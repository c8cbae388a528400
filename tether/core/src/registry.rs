//! Identifier-keyed socket registry.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use tracing::{debug, Level};

use crate::{
    error::{Result, TetherError},
    socket::Socket,
    uid::{Uid, UidAllocator},
};

#[derive(Debug)]
struct Entry {
    socket: Arc<Socket>,
    /// Logical owners of this entry, independent of how many [`Arc`] handles
    /// [`SocketRegistry::at`] has handed out.
    references: usize,
}

/// Registered sockets behind the registry's lock.
#[derive(Debug, Default)]
struct Entries {
    initialized: bool,
    sockets: BTreeMap<Uid, Entry>,
}

impl Entries {
    fn require_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(TetherError::Uninitialized)
        }
    }

    fn get(&self, uid: Uid) -> Result<&Entry> {
        self.sockets.get(&uid).ok_or(TetherError::NotFound(uid))
    }

    fn get_mut(&mut self, uid: Uid) -> Result<&mut Entry> {
        self.sockets.get_mut(&uid).ok_or(TetherError::NotFound(uid))
    }
}

/// Shares one [`Socket`] per [`Uid`] across any number of logical owners.
///
/// Mirrors [`UidAllocator`]'s counting discipline, scoped to socket
/// ownership: the same endpoint can be fetched by identifier again and
/// again without re-resolving or re-connecting. An entry whose count drops
/// to zero is evicted and its identifier is returned to the allocator;
/// the registry keeps no free pool of its own.
#[derive(Debug)]
pub struct SocketRegistry {
    uids: Arc<UidAllocator>,
    entries: Mutex<Entries>,
}

impl SocketRegistry {
    pub fn new(uids: Arc<UidAllocator>) -> Self {
        Self {
            uids,
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Clears the registry and arms it. Strict: initializing twice without
    /// an intervening teardown is an error.
    pub fn initialize(&self) -> Result<()> {
        let mut entries = self.entries.lock()?;
        if entries.initialized {
            return Err(TetherError::AlreadyInitialized);
        }

        entries.sockets.clear();
        entries.initialized = true;
        Ok(())
    }

    /// Clears the registry, releasing the identifier of every entry still
    /// registered.
    pub fn uninitialize(&self) -> Result<()> {
        let mut entries = self.entries.lock()?;
        entries.require_initialized()?;

        let stale = std::mem::take(&mut entries.sockets);
        entries.initialized = false;
        drop(entries);

        for uid in stale.into_keys() {
            self.release_uid(uid);
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.initialized)
            .unwrap_or(false)
    }

    /// Registers a new closed TCP endpoint seeded with `host`/`port`,
    /// owning one reference, and returns its identifier. Opening the
    /// endpoint is the holder's explicit next step.
    #[tracing::instrument(level = Level::TRACE, skip(self), ret, err(level = Level::TRACE))]
    pub fn generate_tcp(&self, host: &str, port: u16) -> Result<Uid> {
        let mut entries = self.entries.lock()?;
        entries.require_initialized()?;

        let uid = self.uids.generate()?;
        let socket = Arc::new(Socket::with_endpoint(uid, host, port));
        entries.sockets.insert(
            uid,
            Entry {
                socket,
                references: 1,
            },
        );
        Ok(uid)
    }

    /// Shared handle to the socket registered under `uid`. Handing out a
    /// handle does not change the entry's reference count.
    pub fn at(&self, uid: Uid) -> Result<Arc<Socket>> {
        let entries = self.entries.lock()?;
        entries.require_initialized()?;

        Ok(entries.get(uid)?.socket.clone())
    }

    /// Whether `uid` is currently registered.
    pub fn contains(&self, uid: Uid) -> Result<bool> {
        let entries = self.entries.lock()?;
        entries.require_initialized()?;

        Ok(entries.sockets.contains_key(&uid))
    }

    /// Number of owners currently holding the entry.
    pub fn reference_count(&self, uid: Uid) -> Result<usize> {
        let entries = self.entries.lock()?;
        entries.require_initialized()?;

        Ok(entries.get(uid)?.references)
    }

    /// Registers one more owner of the entry, returning the new count.
    pub fn increment_reference(&self, uid: Uid) -> Result<usize> {
        let mut entries = self.entries.lock()?;
        entries.require_initialized()?;

        let entry = entries.get_mut(uid)?;
        entry.references += 1;
        Ok(entry.references)
    }

    /// Releases one owner, returning the count after the call. At zero the
    /// entry is evicted and its identifier goes back to the allocator.
    #[tracing::instrument(level = Level::TRACE, skip(self), ret, err(level = Level::TRACE))]
    pub fn decrement_reference(&self, uid: Uid) -> Result<usize> {
        let mut entries = self.entries.lock()?;
        entries.require_initialized()?;

        let entry = entries.get_mut(uid)?;
        entry.references -= 1;
        let remaining = entry.references;
        if remaining == 0 {
            entries.sockets.remove(&uid);
            drop(entries);
            debug!(%uid, "evicted socket entry");
            self.release_uid(uid);
        }

        Ok(remaining)
    }

    /// Number of registered sockets.
    pub fn size(&self) -> Result<usize> {
        let entries = self.entries.lock()?;
        entries.require_initialized()?;

        Ok(entries.sockets.len())
    }

    /// Returns an entry's identifier to the allocator. The allocator
    /// reference was taken in [`SocketRegistry::generate_tcp`]; a failed
    /// release means the allocator was cleared first, which teardown
    /// tolerates.
    fn release_uid(&self, uid: Uid) {
        if let Err(error) = self.uids.decrement_reference(uid) {
            debug!(%uid, %error, "identifier was already released");
        }
    }
}
