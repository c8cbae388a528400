use std::{
    io,
    sync::{MutexGuard, PoisonError},
};

use thiserror::Error;

use crate::uid::Uid;

/// Single error family for every fallible operation in this crate.
///
/// Nothing is retried or recovered internally; every failure propagates to
/// the caller, who decides whether to retry, close, or abort.
#[derive(Debug, Error)]
pub enum TetherError {
    #[error("component is already initialized")]
    AlreadyInitialized,

    #[error("component is not initialized")]
    Uninitialized,

    #[error("identifier space is exhausted")]
    InsufficientCapacity,

    #[error("no entry registered for identifier {0}")]
    NotFound(Uid),

    #[error("socket is already open")]
    AlreadyOpen,

    #[error("socket is not open")]
    NotOpen,

    /// An OS-level networking primitive failed; `op` names it
    /// (`resolve`, `socket`, `connect`, `send`, `receive`).
    #[error("socket {op} failed: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("internal lock was poisoned by a panicked thread")]
    LockPoisoned,
}

impl TetherError {
    pub(crate) fn transport(op: &'static str, source: io::Error) -> Self {
        Self::Transport { op, source }
    }
}

impl<T> From<PoisonError<MutexGuard<'_, T>>> for TetherError {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        TetherError::LockPoisoned
    }
}

pub type Result<T, E = TetherError> = std::result::Result<T, E>;
