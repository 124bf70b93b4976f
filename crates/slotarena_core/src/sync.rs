//! # Serialized Access
//!
//! The structures in this crate take no locks. When several threads share one
//! arena, every call must hold the same exclusion object for its whole
//! duration; [`Serialized`] is that object.
//!
//! ```
//! use slotarena_core::{IndexAllocator, Serialized};
//!
//! let size = IndexAllocator::size_for(8).unwrap() as usize;
//! let shared = Serialized::new(IndexAllocator::init(vec![0u8; size], 8).unwrap());
//!
//! let slot = shared.with(|pool| pool.alloc()).unwrap();
//! shared.with(|pool| pool.dealloc(slot)).unwrap();
//! ```

use parking_lot::Mutex;

/// A structure behind a mutex, reachable only through [`Serialized::with`].
#[derive(Debug, Default)]
pub struct Serialized<S> {
    inner: Mutex<S>,
}

impl<S> Serialized<S> {
    /// Wraps `structure`.
    pub fn new(structure: S) -> Self {
        Self { inner: Mutex::new(structure) }
    }

    /// Runs `f` with exclusive access to the structure.
    ///
    /// The lock is held for exactly the duration of `f`.
    pub fn with<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    /// Like [`Serialized::with`], but returns `None` instead of waiting if
    /// another thread holds the lock.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        let mut guard = self.inner.try_lock()?;
        Some(f(&mut guard))
    }

    /// Unwraps the structure.
    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}
