//! A deterministic single-threaded scheduler for unit tests.
//!
//! "Other threads" are closures queued with
//! [`on_next_sleep`](ModelScheduler::on_next_sleep). The next time the
//! current thread sleeps or yields, the queued closure runs (usually inside
//! [`as_thread`](ModelScheduler::as_thread)) before the sleep decides its
//! outcome. A sleep nobody can end is a deadlock and panics.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    time::Duration,
};

use crate::{
    sleep::{Scheduler, SleepError, SleepFlags, WaitChannel},
    thread::ThreadId,
};

struct Sleeper {
    thread: ThreadId,
    chan: WaitChannel,
    flags: SleepFlags,
    /// `None` while still asleep, otherwise the errno the sleep ends with.
    status: Option<isize>,
}

pub(crate) struct ModelScheduler {
    current: Cell<u32>,
    sleepers: RefCell<Vec<Sleeper>>,
    hooks: RefCell<VecDeque<Box<dyn FnOnce()>>>,
    wakeups: Cell<usize>,
    yields: Cell<usize>,
}

impl ModelScheduler {
    pub(crate) fn leak() -> &'static Self {
        Box::leak(Box::new(Self {
            current: Cell::new(1),
            sleepers: RefCell::new(vec![]),
            hooks: RefCell::new(VecDeque::new()),
            wakeups: Cell::new(0),
            yields: Cell::new(0),
        }))
    }

    pub(crate) fn current(&self) -> ThreadId {
        ThreadId::from_raw(self.current.get()).unwrap()
    }

    /// Runs `f` as thread `id`.
    pub(crate) fn as_thread<R>(&self, id: u32, f: impl FnOnce() -> R) -> R {
        let prev = self.current.replace(id);
        let res = f();
        self.current.set(prev);
        res
    }

    /// Queues `f` to run the next time a thread sleeps or yields.
    pub(crate) fn on_next_sleep(&self, f: impl FnOnce() + 'static) {
        self.hooks.borrow_mut().push_back(Box::new(f));
    }

    fn run_hook(&self) -> bool {
        let hook = self.hooks.borrow_mut().pop_front();
        hook.map(|hook| hook()).is_some()
    }

    fn resolve(&self, thread: ThreadId, errno: isize, need: SleepFlags) {
        let mut sleepers = self.sleepers.borrow_mut();
        if let Some(s) = sleepers
            .iter_mut()
            .find(|s| s.thread == thread && s.status.is_none() && s.flags.contains(need))
        {
            s.status = Some(errno);
        }
    }

    /// Delivers a signal-like event to `thread` if it sleeps interruptibly.
    pub(crate) fn interrupt(&self, thread: ThreadId) {
        self.resolve(thread, SleepError::Interrupted.errno(), SleepFlags::INTERRUPTIBLE);
    }

    /// Makes the sleep of `thread` time out now.
    pub(crate) fn expire(&self, thread: ThreadId) {
        self.resolve(thread, SleepError::WouldBlock.errno(), SleepFlags::empty());
    }

    pub(crate) fn wakeups(&self) -> usize {
        self.wakeups.get()
    }

    pub(crate) fn yields(&self) -> usize {
        self.yields.get()
    }
}

impl Scheduler for ModelScheduler {
    fn current_thread(&self) -> ThreadId {
        self.current()
    }

    fn register_interlock(&self, chan: WaitChannel, flags: SleepFlags) {
        let thread = self.current();
        let mut sleepers = self.sleepers.borrow_mut();
        assert!(
            sleepers.iter().all(|s| s.thread != thread),
            "thread {thread} registered twice"
        );
        sleepers.push(Sleeper {
            thread,
            chan,
            flags,
            status: None,
        });
    }

    fn sleep(
        &self,
        chan: WaitChannel,
        flags: SleepFlags,
        desc: &str,
        timeout: Option<Duration>,
    ) -> Result<(), SleepError> {
        if !flags.contains(SleepFlags::INTERLOCKED) {
            self.register_interlock(chan, flags);
        }
        let thread = self.current();

        let already_resolved = {
            let sleepers = self.sleepers.borrow();
            sleepers
                .iter()
                .any(|s| s.thread == thread && s.status.is_some())
        };
        if !already_resolved {
            self.run_hook();
        }

        let mut sleepers = self.sleepers.borrow_mut();
        let idx = sleepers
            .iter()
            .position(|s| s.thread == thread)
            .expect("sleeping thread must be registered");
        let sleeper = sleepers.remove(idx);
        match sleeper.status {
            Some(code) => SleepError::from_errno(code),
            None if timeout.is_some() => Err(SleepError::WouldBlock),
            None => panic!("thread {thread} sleeps on {desc:?} forever"),
        }
    }

    fn wakeup(&self, chan: WaitChannel) -> usize {
        let mut woken = 0;
        for s in self.sleepers.borrow_mut().iter_mut() {
            if s.chan == chan && s.status.is_none() {
                s.status = Some(0);
                woken += 1;
            }
        }
        self.wakeups.set(self.wakeups.get() + woken);
        woken
    }

    fn wakeup_one(&self, chan: WaitChannel) -> bool {
        let mut sleepers = self.sleepers.borrow_mut();
        let Some(s) = sleepers
            .iter_mut()
            .find(|s| s.chan == chan && s.status.is_none())
        else {
            return false;
        };
        s.status = Some(0);
        self.wakeups.set(self.wakeups.get() + 1);
        true
    }

    fn yield_now(&self) {
        self.yields.set(self.yields.get() + 1);
        assert!(
            self.run_hook(),
            "thread {} yields with nothing else to run",
            self.current()
        );
    }
}
