//! Condition variables on top of a spin lock and interlocked sleep.
//!
//! A waiter registers its intent to sleep with the scheduler and bumps the
//! waiter count while holding the condition variable's spin lock, then drops
//! both the spin lock and the caller's lock and sleeps. A signal issued at any
//! point after the registration finds the waiter, so no wakeup is lost.

use core::{fmt, time::Duration};

use mutex_api::Relock;

use crate::{
    error::WaitError,
    sleep::{Scheduler, SleepFlags, WaitChannel},
    spin_lock::SpinLock,
};

pub struct CondVar<S> {
    sched: S,
    /// Number of threads blocked in `wait` whose sleep has not ended yet.
    waiters: SpinLock<usize>,
    desc: &'static str,
}

impl<S> fmt::Debug for CondVar<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CondVar")
            .field("desc", &self.desc)
            .field("waiters", &*self.waiters.lock())
            .finish_non_exhaustive()
    }
}

impl<S> CondVar<S>
where
    S: Scheduler,
{
    /// Creates a condition variable.
    ///
    /// `desc` shows up as the wait message of sleeping threads.
    pub const fn new(sched: S, desc: &'static str) -> Self {
        Self {
            sched,
            waiters: SpinLock::named("cv_lock", 0),
            desc,
        }
    }

    pub fn description(&self) -> &'static str {
        self.desc
    }

    /// Returns the number of threads currently blocked on this condition variable.
    pub fn waiters(&self) -> usize {
        *self.waiters.lock()
    }

    fn channel(&self) -> WaitChannel {
        WaitChannel::of(self)
    }

    /// Releases `guard`'s lock, waits for a signal, and reacquires the lock.
    ///
    /// With [`SleepFlags::INTERRUPTIBLE`] the wait may end with
    /// [`WaitError::Interrupted`]. The lock is held again in every case.
    pub fn wait<G>(&self, guard: G, flags: SleepFlags) -> Result<G, (G, WaitError)>
    where
        G: Relock,
    {
        self.wait_common(guard, None, flags)
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout`.
    pub fn timed_wait<G>(
        &self,
        guard: G,
        timeout: Duration,
        flags: SleepFlags,
    ) -> Result<G, (G, WaitError)>
    where
        G: Relock,
    {
        self.wait_common(guard, Some(timeout), flags)
    }

    /// Waits for a signal without holding any caller lock.
    pub fn wait_unlocked(
        &self,
        timeout: Option<Duration>,
        flags: SleepFlags,
    ) -> Result<(), WaitError> {
        self.wait_common(NoLock, timeout, flags)
            .map(|NoLock| ())
            .map_err(|(NoLock, e)| e)
    }

    fn wait_common<G>(
        &self,
        guard: G,
        timeout: Option<Duration>,
        flags: SleepFlags,
    ) -> Result<G, (G, WaitError)>
    where
        G: Relock,
    {
        let chan = self.channel();
        let flags = flags - SleepFlags::INTERLOCKED;

        let mut waiters = self.waiters.lock();
        self.sched.register_interlock(chan, flags);
        *waiters += 1;
        drop(waiters);

        let (guard, res) = guard.relock_after(|| {
            self.sched
                .sleep(chan, flags | SleepFlags::INTERLOCKED, self.desc, timeout)
        });

        let Err(error) = res else {
            // The waker already took us off the count.
            return Ok(guard);
        };

        // Nobody woke us, so nobody accounted for us.
        let mut waiters = self.waiters.lock();
        assert!(*waiters > 0, "condvar {:?}: waiter count underflow", self.desc);
        *waiters -= 1;
        drop(waiters);

        let error = WaitError::from(error);
        log::debug!("condvar {:?}: wait ended: {error}", self.desc);
        Err((guard, error))
    }

    /// Wakes one blocked thread, if any.
    ///
    /// Which waiter is woken is up to the scheduler.
    pub fn signal(&self) {
        let mut waiters = self.waiters.lock();
        if *waiters == 0 {
            return;
        }
        if self.sched.wakeup_one(self.channel()) {
            *waiters -= 1;
        }
    }

    /// Wakes every thread blocked at the time of the call.
    pub fn broadcast(&self) {
        let mut waiters = self.waiters.lock();
        if *waiters == 0 {
            return;
        }
        let woken = self.sched.wakeup(self.channel());
        assert!(
            woken <= *waiters,
            "condvar {:?}: woke {woken} threads but only {} were waiting",
            self.desc,
            *waiters
        );
        // Waiters that timed out but have not yet left stay counted until
        // they remove themselves.
        *waiters -= woken;
    }

    /// Tears down the condition variable.
    ///
    /// # Panics
    ///
    /// Panics if a thread is still waiting.
    #[track_caller]
    pub fn destroy(self) {
        let waiters = self.waiters();
        assert!(
            waiters == 0,
            "condvar {:?} destroyed with {waiters} waiters",
            self.desc
        );
    }
}

/// Guard type for waits that hold no caller lock.
struct NoLock;

impl Relock for NoLock {
    fn relock_after<F, R>(self, f: F) -> (Self, R)
    where
        F: FnOnce() -> R,
    {
        (self, f())
    }
}
