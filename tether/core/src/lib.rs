//! Recyclable unique identifiers and the lifecycle-managed TCP endpoints
//! they name.
//!
//! [`Tether`] owns two cooperating components: a [`UidAllocator`] that
//! issues reference-counted identifiers and recycles retired values
//! smallest-first, and a [`SocketRegistry`] that shares one [`Socket`] per
//! identifier across any number of logical owners. Everything is
//! synchronous and blocking; each component serializes its own state behind
//! its own lock.
//!
//! ```
//! use tether_core::Tether;
//!
//! # fn main() -> tether_core::Result<()> {
//! let tether = Tether::new();
//! tether.initialize()?;
//!
//! let uid = tether.sockets().generate_tcp("localhost", 8080)?;
//! let socket = tether.sockets().at(uid)?;
//! assert!(!socket.is_open());
//! println!("{}", socket.describe(true));
//!
//! tether.sockets().decrement_reference(uid)?;
//! tether.uninitialize()?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex};

use tracing::Level;

pub mod error;
pub mod registry;
pub mod socket;
pub mod uid;

pub use crate::{
    error::{Result, TetherError},
    registry::SocketRegistry,
    socket::{Socket, SocketFamily, SocketKind, READ_CHUNK_SIZE},
    uid::{Uid, UidAllocator},
};

/// Owning context for the identifier allocator and the socket registry.
///
/// Replaces process-global state with an explicitly constructed object:
/// whoever owns the `Tether` owns the lifetime of everything it issues.
/// The lifecycle is strict in both directions; double initialization and
/// double teardown are caller bugs and fail accordingly.
#[derive(Debug)]
pub struct Tether {
    uids: Arc<UidAllocator>,
    sockets: SocketRegistry,
    initialized: Mutex<bool>,
}

impl Tether {
    pub fn new() -> Self {
        let uids = Arc::new(UidAllocator::new());
        let sockets = SocketRegistry::new(uids.clone());
        Self {
            uids,
            sockets,
            initialized: Mutex::new(false),
        }
    }

    /// Arms the allocator, then the registry.
    #[tracing::instrument(level = Level::TRACE, skip(self), err(level = Level::TRACE))]
    pub fn initialize(&self) -> Result<()> {
        let mut initialized = self.initialized.lock()?;
        if *initialized {
            return Err(TetherError::AlreadyInitialized);
        }

        self.uids.initialize()?;
        self.sockets.initialize()?;
        *initialized = true;
        Ok(())
    }

    /// Tears down in reverse order: the registry first, so surviving
    /// entries release their identifiers into a still-armed allocator.
    #[tracing::instrument(level = Level::TRACE, skip(self), err(level = Level::TRACE))]
    pub fn uninitialize(&self) -> Result<()> {
        let mut initialized = self.initialized.lock()?;
        if !*initialized {
            return Err(TetherError::Uninitialized);
        }

        self.sockets.uninitialize()?;
        self.uids.uninitialize()?;
        *initialized = false;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
            .lock()
            .map(|initialized| *initialized)
            .unwrap_or(false)
    }

    /// The identifier allocator this context owns.
    pub fn uids(&self) -> &UidAllocator {
        &self.uids
    }

    /// The socket registry this context owns.
    pub fn sockets(&self) -> &SocketRegistry {
        &self.sockets
    }

    /// Library version.
    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

impl Default for Tether {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tether_tests {
    use super::*;

    #[test]
    fn lifecycle() {
        let tether = Tether::new();
        assert!(!tether.is_initialized());
        assert!(matches!(
            tether.uninitialize(),
            Err(TetherError::Uninitialized)
        ));

        tether.initialize().unwrap();
        assert!(tether.is_initialized());
        assert!(tether.uids().is_initialized());
        assert!(tether.sockets().is_initialized());
        assert!(matches!(
            tether.initialize(),
            Err(TetherError::AlreadyInitialized)
        ));

        tether.uninitialize().unwrap();
        assert!(!tether.is_initialized());
        assert!(!tether.uids().is_initialized());
        assert!(!tether.sockets().is_initialized());
        assert!(matches!(
            tether.uids().generate(),
            Err(TetherError::Uninitialized)
        ));
    }

    #[test]
    fn teardown_releases_registered_sockets() {
        let tether = Tether::new();
        tether.initialize().unwrap();

        let uid = tether.sockets().generate_tcp("localhost", 8080).unwrap();
        assert_eq!(tether.uids().size().unwrap(), 1);

        tether.uninitialize().unwrap();
        tether.initialize().unwrap();
        assert_eq!(tether.uids().size().unwrap(), 0);
        assert_eq!(tether.sockets().generate_tcp("localhost", 8081).unwrap(), uid);
    }

    #[test]
    fn version_matches_manifest() {
        assert_eq!(Tether::new().version(), env!("CARGO_PKG_VERSION"));
    }
}
