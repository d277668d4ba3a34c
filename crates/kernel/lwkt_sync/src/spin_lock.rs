use core::{
    cell::UnsafeCell,
    fmt, hint,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

use lwkt_params::SPIN_WARN_LOOPS;
use mutex_api::{Mutex, Relock};

/// A busy-waiting lock with no owner identity.
///
/// Never hold a spin lock across a sleep.
pub struct RawSpinLock {
    locked: AtomicBool,
    name: &'static str,
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new("spinlock")
    }
}

impl fmt::Debug for RawSpinLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSpinLock")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl RawSpinLock {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            locked: AtomicBool::new(false),
            name,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Acquires the lock if it is free.
    pub fn try_acquire(&self) -> bool {
        // `Ordering::Acquire` keeps the critical section's loads and stores
        // from moving above this point.
        !self.locked.swap(true, Ordering::Acquire)
    }

    /// Acquires the lock.
    ///
    /// Loops (spins) until the lock is acquired.
    pub fn acquire(&self) {
        let mut loops = 0_usize;
        while self.locked.swap(true, Ordering::Acquire) {
            // Spin on a plain load so the cache line stays shared while
            // the holder runs.
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
                loops += 1;
                if loops == SPIN_WARN_LOOPS {
                    log::warn!("spin lock {:?}: indefinite wait", self.name);
                }
            }
        }
    }

    /// Releases the lock.
    ///
    /// # Safety
    ///
    /// The caller must hold the lock.
    #[track_caller]
    pub unsafe fn release(&self) {
        // `Ordering::Release` makes every store of the critical section
        // visible before the lock is seen as free.
        let was_locked = self.locked.swap(false, Ordering::Release);
        debug_assert!(was_locked, "spin lock {:?} released while not held", self.name);
    }

    /// Returns `true` if some thread holds the lock.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// A value protected by a [`RawSpinLock`].
#[derive(Default)]
pub struct SpinLock<T> {
    lock: RawSpinLock,
    value: UnsafeCell<T>,
}

unsafe impl<T> Sync for SpinLock<T> where T: Send {}

impl<T> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self::named("spinlock", value)
    }

    pub const fn named(name: &'static str, value: T) -> Self {
        Self {
            lock: RawSpinLock::new(name),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock if it is free.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.lock
            .try_acquire()
            .then(|| SpinLockGuard { lock: self })
    }

    /// Acquires the lock.
    ///
    /// Loops (spins) until the lock is acquired.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.lock.acquire();
        SpinLockGuard { lock: self }
    }

    pub fn raw(&self) -> &RawSpinLock {
        &self.lock
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T> Mutex for SpinLock<T> {
    type Data = T;
    type Guard<'a>
        = SpinLockGuard<'a, T>
    where
        T: 'a;

    fn new(data: Self::Data) -> Self {
        Self::new(data)
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.lock()
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

unsafe impl<T> Sync for SpinLockGuard<'_, T> where T: Sync {}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        unsafe { self.lock.lock.release() }
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<'a, T> SpinLockGuard<'a, T> {
    /// Releases the lock and returns it.
    pub fn into_lock(self) -> &'a SpinLock<T> {
        let lock = self.lock;
        drop(self);
        lock
    }
}

impl<T> Relock for SpinLockGuard<'_, T> {
    fn relock_after<F, R>(self, f: F) -> (Self, R)
    where
        F: FnOnce() -> R,
    {
        let lock = self.into_lock();
        let res = f();
        (lock.lock(), res)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::named("test", 0);
        let guard = lock.lock();
        assert!(lock.raw().is_locked());
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(!lock.raw().is_locked());
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn relock_releases_around_closure() {
        let lock = SpinLock::new(1);
        let guard = lock.lock();
        let (mut guard, held) = guard.relock_after(|| lock.raw().is_locked());
        assert!(!held);
        *guard += 1;
        drop(guard);
        assert_eq!(lock.into_inner(), 2);
    }

    #[test]
    #[should_panic(expected = "released while not held")]
    #[cfg(debug_assertions)]
    fn release_without_holding_panics() {
        let lock = RawSpinLock::new("unheld");
        unsafe { lock.release() };
    }

    #[test]
    fn counter_is_mutually_exclusive() {
        const THREADS: usize = 8;
        const LOOPS: usize = 10_000;

        let lock = Arc::new(SpinLock::new(0_usize));
        let handles = (0..THREADS)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..LOOPS {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.lock(), THREADS * LOOPS);
    }
}
