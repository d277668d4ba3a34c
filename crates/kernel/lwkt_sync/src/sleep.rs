//! Contract with the low-level scheduler.
//!
//! The primitives in this crate never park a thread themselves. They describe
//! what they want through [`Scheduler`], which the kernel (or a host
//! emulation) implements.

use core::{ptr, time::Duration};

use bitflags::bitflags;
use strum::FromRepr;

use crate::thread::ThreadId;

/// Opaque identity that sleepers and wakers agree on.
///
/// By convention the address of the object being waited for is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitChannel(usize);

impl WaitChannel {
    /// Returns the channel keyed by the address of `obj`.
    pub fn of<T>(obj: &T) -> Self
    where
        T: ?Sized,
    {
        Self(ptr::from_ref(obj).cast::<()>().addr())
    }

    #[must_use]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn addr(self) -> usize {
        self.0
    }
}

bitflags! {
    /// Flags passed to [`Scheduler::register_interlock`] and [`Scheduler::sleep`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SleepFlags: u32 {
        /// The sleep may be broken by a signal-like event.
        const INTERRUPTIBLE = 1 << 0;
        /// The caller has already called [`Scheduler::register_interlock`]
        /// on the same channel.
        const INTERLOCKED = 1 << 1;
    }
}

/// Reasons a sleep ends without a wakeup.
///
/// The discriminants are the scheduler's errno values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, thiserror::Error)]
#[repr(isize)]
pub enum SleepError {
    /// The sleep timed out (`EWOULDBLOCK`).
    #[error("operation would block")]
    WouldBlock = 35,
    /// The sleep was interrupted (`EINTR`).
    #[error("interrupted system call")]
    Interrupted = 4,
    /// The sleep was interrupted and the call should be restarted (`ERESTART`).
    #[error("restart system call")]
    Restart = -1,
}

impl SleepError {
    /// Converts a raw sleep status into a result. `0` means woken.
    ///
    /// Unknown codes are reported as interruptions.
    #[must_use]
    pub fn from_errno(code: isize) -> Result<(), Self> {
        if code == 0 {
            return Ok(());
        }
        Err(Self::from_repr(code).unwrap_or(Self::Interrupted))
    }

    #[must_use]
    pub fn errno(self) -> isize {
        self as isize
    }
}

/// Interlocked sleep and cooperative yield, provided by the scheduler.
///
/// Implementations must guarantee that a wakeup issued after
/// [`register_interlock`](Self::register_interlock) and before
/// [`sleep`](Self::sleep) is not lost: the subsequent `sleep` with
/// [`SleepFlags::INTERLOCKED`] returns at once.
///
/// The outcome of a sleep is decided exactly once: a sleeper that has timed
/// out is no longer a candidate for [`wakeup`](Self::wakeup), and a woken
/// sleeper does not time out afterwards.
pub trait Scheduler {
    /// Returns the identity of the calling thread.
    fn current_thread(&self) -> ThreadId;

    /// Marks the calling thread as about to sleep on `chan`.
    ///
    /// Must be called before the lock protecting the wait predicate is
    /// released. Acts as a release/acquire boundary with [`wakeup`](Self::wakeup).
    fn register_interlock(&self, chan: WaitChannel, flags: SleepFlags);

    /// Suspends the calling thread until woken on `chan`.
    ///
    /// `timeout` of `None` waits forever.
    fn sleep(
        &self,
        chan: WaitChannel,
        flags: SleepFlags,
        desc: &str,
        timeout: Option<Duration>,
    ) -> Result<(), SleepError>;

    /// Wakes every thread sleeping on `chan` and returns how many were woken.
    fn wakeup(&self, chan: WaitChannel) -> usize;

    /// Wakes one thread sleeping on `chan`, returning `false` if there was none.
    fn wakeup_one(&self, chan: WaitChannel) -> bool;

    /// Gives up the CPU to other runnable threads.
    fn yield_now(&self);
}

impl<S> Scheduler for &S
where
    S: Scheduler + ?Sized,
{
    fn current_thread(&self) -> ThreadId {
        (**self).current_thread()
    }

    fn register_interlock(&self, chan: WaitChannel, flags: SleepFlags) {
        (**self).register_interlock(chan, flags);
    }

    fn sleep(
        &self,
        chan: WaitChannel,
        flags: SleepFlags,
        desc: &str,
        timeout: Option<Duration>,
    ) -> Result<(), SleepError> {
        (**self).sleep(chan, flags, desc, timeout)
    }

    fn wakeup(&self, chan: WaitChannel) -> usize {
        (**self).wakeup(chan)
    }

    fn wakeup_one(&self, chan: WaitChannel) -> bool {
        (**self).wakeup_one(chan)
    }

    fn yield_now(&self) {
        (**self).yield_now();
    }
}
