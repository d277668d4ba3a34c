use core::sync::atomic::{AtomicU32, Ordering};

/// An atomic reference count that runs a destructor when it drops to zero.
#[derive(Debug)]
pub struct KRef {
    count: AtomicU32,
}

impl KRef {
    #[must_use]
    pub const fn new(count: u32) -> Self {
        Self {
            count: AtomicU32::new(count),
        }
    }

    /// Takes another reference.
    ///
    /// # Panics
    ///
    /// Panics if the count was zero: an object whose last reference is gone
    /// cannot be revived.
    #[track_caller]
    pub fn increment(&self) {
        let prev = self.count.fetch_add(1, Ordering::Relaxed);
        assert!(prev > 0, "kref: increment of a released reference");
    }

    /// Drops a reference, running `destructor` if it was the last one.
    ///
    /// Returns `false` if the destructor ran and `true` if references remain.
    /// Under concurrent decrements exactly one caller runs the destructor.
    ///
    /// # Panics
    ///
    /// Panics if the count was already zero.
    #[track_caller]
    pub fn decrement<F>(&self, destructor: F) -> bool
    where
        F: FnOnce(),
    {
        let prev = self.count.fetch_sub(1, Ordering::Release);
        assert!(prev > 0, "kref: decrement of a released reference");
        if prev != 1 {
            return true;
        }
        // Every other holder's accesses happen before the destructor.
        core::sync::atomic::fence(Ordering::Acquire);
        destructor();
        false
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}
