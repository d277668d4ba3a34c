//! A synchronization primitive which can be written to only once.

#![cfg_attr(not(test), no_std)]

use core::{
    cell::UnsafeCell,
    fmt,
    mem::MaybeUninit,
    sync::atomic::{AtomicBool, Ordering},
};

/// A synchronization primitive which can be written to only once.
///
/// Unlike a lazy cell, a reader never waits for a writer: while the first
/// writer is still running its initializer, readers observe the cell as
/// uninitialized.
pub struct OnceInit<T> {
    initializing: AtomicBool,
    initialized: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

unsafe impl<T> Sync for OnceInit<T> where T: Send + Sync {}

impl<T> Default for OnceInit<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for OnceInit<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("OnceInit");
        if let Ok(value) = self.try_get() {
            f.field(&value);
        } else {
            f.field(&format_args!("<uninit>"));
        }
        f.finish()
    }
}

impl<T> OnceInit<T> {
    /// Creates a new uninitialized cell.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            initializing: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Initializes the cell with the value returned by `f`.
    ///
    /// `f` runs only if this call wins the race to initialize the cell.
    /// Returns `Err(InitError::AlreadyInitialized)` without calling `f`
    /// otherwise.
    pub fn try_init_with<F>(&self, f: F) -> Result<&T, InitError>
    where
        F: FnOnce() -> T,
    {
        if self
            .initializing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(InitError::AlreadyInitialized);
        }

        let value = unsafe { (*self.value.get()).write(f()) };
        self.initialized.store(true, Ordering::Release);

        Ok(value)
    }

    /// Gets the reference of the contents of the cell.
    ///
    /// Returns `Err(GetError::NotInitialized)` if the cell is not initialized.
    pub fn try_get(&self) -> Result<&T, GetError> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(GetError::NotInitialized);
        }

        Ok(unsafe { (*self.value.get()).assume_init_ref() })
    }
}

impl<T> Drop for OnceInit<T> {
    fn drop(&mut self) {
        // Drops `value` only if the cell is initialized.
        if *self.initialized.get_mut() {
            unsafe {
                (*self.value.get()).assume_init_drop();
            }
        }
    }
}

/// An error returns from [`OnceInit`] initialize functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    /// [`OnceInit`] is already initialized.
    #[error("already initialized")]
    AlreadyInitialized,
}

/// An error returns from [`OnceInit`] get functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GetError {
    /// [`OnceInit`] is not initialized yet.
    #[error("not initialized")]
    NotInitialized,
}
