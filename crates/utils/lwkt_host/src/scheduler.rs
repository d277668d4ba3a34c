use std::{
    cell::Cell,
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU32, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use lwkt_sync::{Scheduler, SleepError, SleepFlags, ThreadId, WaitChannel};

static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static CURRENT: Cell<Option<ThreadId>> = const { Cell::new(None) };
}

/// Returns the id of the calling OS thread, assigning one on first use.
pub fn current_thread_id() -> ThreadId {
    CURRENT.with(|current| {
        if let Some(id) = current.get() {
            return id;
        }
        let raw = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        let Some(id) = ThreadId::from_raw(raw) else {
            panic!("thread ids exhausted");
        };
        current.set(Some(id));
        id
    })
}

#[derive(Debug)]
struct Sleeper {
    thread: ThreadId,
    chan: WaitChannel,
    flags: SleepFlags,
    /// Errno the sleep ends with, once decided.
    status: Option<isize>,
}

#[derive(Debug, Default)]
struct State {
    /// In registration order, so `wakeup_one` is FIFO.
    sleepers: Vec<Sleeper>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    cond: Condvar,
}

/// Interlocked sleep on top of a std mutex and condition variable.
///
/// Every OS thread is an LWKT thread. Clones share the same sleep queues.
#[derive(Debug, Clone, Default)]
pub struct HostScheduler {
    inner: Arc<Inner>,
}

impl HostScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Breaks the sleep of `thread` if it sleeps interruptibly.
    ///
    /// Returns `false` if there was no such sleep.
    pub fn interrupt(&self, thread: ThreadId) -> bool {
        let mut state = self.state();
        let Some(sleeper) = state.sleepers.iter_mut().find(|s| {
            s.thread == thread && s.status.is_none() && s.flags.contains(SleepFlags::INTERRUPTIBLE)
        }) else {
            return false;
        };
        sleeper.status = Some(SleepError::Interrupted.errno());
        drop(state);
        log::trace!("interrupted thread {thread}");
        self.inner.cond.notify_all();
        true
    }

    /// Returns the number of threads whose sleep on `chan` is undecided.
    pub fn sleepers(&self, chan: WaitChannel) -> usize {
        self.state()
            .sleepers
            .iter()
            .filter(|s| s.chan == chan && s.status.is_none())
            .count()
    }

    fn register(state: &mut State, thread: ThreadId, chan: WaitChannel, flags: SleepFlags) {
        assert!(
            state.sleepers.iter().all(|s| s.thread != thread),
            "thread {thread} is already registered to sleep"
        );
        state.sleepers.push(Sleeper {
            thread,
            chan,
            flags: flags - SleepFlags::INTERLOCKED,
            status: None,
        });
    }
}

impl Scheduler for HostScheduler {
    fn current_thread(&self) -> ThreadId {
        current_thread_id()
    }

    fn register_interlock(&self, chan: WaitChannel, flags: SleepFlags) {
        Self::register(&mut self.state(), current_thread_id(), chan, flags);
    }

    fn sleep(
        &self,
        chan: WaitChannel,
        flags: SleepFlags,
        desc: &str,
        timeout: Option<Duration>,
    ) -> Result<(), SleepError> {
        let thread = current_thread_id();
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        let mut state = self.state();
        if !flags.contains(SleepFlags::INTERLOCKED) {
            Self::register(&mut state, thread, chan, flags);
        }
        log::trace!("thread {thread} sleeps on {desc:?}");

        loop {
            let Some(idx) = state.sleepers.iter().position(|s| s.thread == thread) else {
                panic!("thread {thread} sleeps on {desc:?} without registering");
            };
            if let Some(status) = state.sleepers[idx].status {
                state.sleepers.remove(idx);
                return SleepError::from_errno(status);
            }

            match deadline {
                None => {
                    state = self
                        .inner
                        .cond
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        // Decided under the lock: no waker can pick us any more.
                        state.sleepers.remove(idx);
                        log::trace!("thread {thread} timed out on {desc:?}");
                        return Err(SleepError::WouldBlock);
                    }
                    state = self
                        .inner
                        .cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    fn wakeup(&self, chan: WaitChannel) -> usize {
        let mut state = self.state();
        let mut woken = 0;
        for sleeper in &mut state.sleepers {
            if sleeper.chan == chan && sleeper.status.is_none() {
                sleeper.status = Some(0);
                woken += 1;
            }
        }
        drop(state);
        if woken > 0 {
            self.inner.cond.notify_all();
        }
        woken
    }

    fn wakeup_one(&self, chan: WaitChannel) -> bool {
        let mut state = self.state();
        let Some(sleeper) = state
            .sleepers
            .iter_mut()
            .find(|s| s.chan == chan && s.status.is_none())
        else {
            return false;
        };
        sleeper.status = Some(0);
        drop(state);
        self.inner.cond.notify_all();
        true
    }

    fn yield_now(&self) {
        thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_ids_are_stable_and_distinct() {
        let here = current_thread_id();
        assert_eq!(current_thread_id(), here);
        let there = thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn wakeup_before_sleep_is_not_lost() {
        let sched = HostScheduler::new();
        let chan = WaitChannel::from_raw(0x1000);
        sched.register_interlock(chan, SleepFlags::empty());
        assert_eq!(sched.sleepers(chan), 1);
        assert_eq!(sched.wakeup(chan), 1);
        assert_eq!(sched.sleepers(chan), 0);
        assert_eq!(
            sched.sleep(chan, SleepFlags::INTERLOCKED, "test", None),
            Ok(())
        );
    }

    #[test]
    fn timed_out_sleeper_is_not_woken() {
        let sched = HostScheduler::new();
        let chan = WaitChannel::from_raw(0x2000);
        let res = sched.sleep(chan, SleepFlags::empty(), "test", Some(Duration::from_millis(10)));
        assert_eq!(res, Err(SleepError::WouldBlock));
        assert!(!sched.wakeup_one(chan));
        assert_eq!(sched.wakeup(chan), 0);
    }

    #[test]
    fn interrupt_needs_interruptible_sleep() {
        let sched = HostScheduler::new();
        let chan = WaitChannel::from_raw(0x3000);
        let me = current_thread_id();

        sched.register_interlock(chan, SleepFlags::empty());
        assert!(!sched.interrupt(me));
        assert!(sched.wakeup_one(chan));
        assert_eq!(sched.sleep(chan, SleepFlags::INTERLOCKED, "test", None), Ok(()));

        sched.register_interlock(chan, SleepFlags::INTERRUPTIBLE);
        assert!(sched.interrupt(me));
        assert_eq!(
            sched.sleep(
                chan,
                SleepFlags::INTERRUPTIBLE | SleepFlags::INTERLOCKED,
                "test",
                None
            ),
            Err(SleepError::Interrupted)
        );
    }
}
