//! The MP lock serializing code that is not yet safe to run on several CPUs
//! at once.
//!
//! With the `smp` feature [`MpLock`] is a recursive [`Token`] owned by one
//! thread at a time. Without it there is only one CPU, nothing can run
//! concurrently, and every operation succeeds without touching any state.

use core::{fmt, marker::PhantomData};

use crate::{sleep::Scheduler, thread::ThreadId, token::Token};

#[cfg(feature = "smp")]
pub type MpLock<S> = SmpMpLock<S>;
#[cfg(not(feature = "smp"))]
pub type MpLock<S> = UpMpLock<S>;

/// Operations shared by the SMP and uniprocessor MP locks.
pub trait MpLockApi {
    /// Acquires the lock for the calling thread, yielding until it is
    /// available. The owner may acquire it again without blocking.
    fn acquire(&self);

    /// Acquires the lock if it is free or already owned by the caller.
    fn try_acquire(&self) -> bool;

    /// Drops one level of the caller's hold.
    fn release(&self);

    /// Returns how many times `thread` holds the lock.
    fn held_count(&self, thread: ThreadId) -> u32;

    /// Returns `true` if the calling thread may run code serialized by the
    /// lock.
    fn is_held(&self) -> bool;

    /// Acquires the lock and returns a guard releasing it on drop.
    fn lock(&self) -> MpLockGuard<'_, Self> {
        self.acquire();
        MpLockGuard::new(self)
    }

    fn try_lock(&self) -> Option<MpLockGuard<'_, Self>> {
        self.try_acquire().then(|| MpLockGuard::new(self))
    }
}

pub struct SmpMpLock<S> {
    sched: S,
    token: Token,
}

impl<S> fmt::Debug for SmpMpLock<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmpMpLock")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

impl<S> SmpMpLock<S>
where
    S: Scheduler,
{
    pub const fn new(sched: S) -> Self {
        Self {
            sched,
            token: Token::new("mp_token"),
        }
    }

    /// Returns the thread holding the lock.
    pub fn owner(&self) -> Option<ThreadId> {
        self.token.owner()
    }

    pub fn token(&self) -> &Token {
        &self.token
    }
}

impl<S> MpLockApi for SmpMpLock<S>
where
    S: Scheduler,
{
    fn acquire(&self) {
        self.token.acquire(&self.sched);
    }

    fn try_acquire(&self) -> bool {
        self.token.try_acquire(self.sched.current_thread())
    }

    #[track_caller]
    fn release(&self) {
        self.token.release(self.sched.current_thread());
    }

    fn held_count(&self, thread: ThreadId) -> u32 {
        self.token.held_count(thread)
    }

    fn is_held(&self) -> bool {
        self.held_count(self.sched.current_thread()) > 0
    }
}

/// The MP lock of a uniprocessor build.
///
/// Holds no lock state: acquiring always succeeds, and hold counts are not
/// tracked (`held_count` is always `0`).
pub struct UpMpLock<S> {
    _sched: PhantomData<fn() -> S>,
}

impl<S> fmt::Debug for UpMpLock<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpMpLock").finish_non_exhaustive()
    }
}

impl<S> UpMpLock<S> {
    /// Creates the lock. The scheduler is not needed with a single CPU.
    pub fn new(_sched: S) -> Self {
        Self {
            _sched: PhantomData,
        }
    }
}

impl<S> MpLockApi for UpMpLock<S> {
    fn acquire(&self) {}

    fn try_acquire(&self) -> bool {
        true
    }

    fn release(&self) {}

    fn held_count(&self, _thread: ThreadId) -> u32 {
        0
    }

    fn is_held(&self) -> bool {
        true
    }
}

/// Releases one level of an MP lock hold when dropped.
///
/// The guard stays on the thread that acquired the lock.
pub struct MpLockGuard<'a, L>
where
    L: MpLockApi + ?Sized,
{
    lock: &'a L,
    _not_send: PhantomData<*const ()>,
}

impl<'a, L> MpLockGuard<'a, L>
where
    L: MpLockApi + ?Sized,
{
    fn new(lock: &'a L) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

impl<L> Drop for MpLockGuard<'_, L>
where
    L: MpLockApi + ?Sized,
{
    fn drop(&mut self) {
        self.lock.release();
    }
}
