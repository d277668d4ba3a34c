//! Lightweight kernel thread (LWKT) synchronization primitives.
//!
//! The primitives here sit between kernel subsystems and the low-level
//! scheduler. Everything that actually parks a thread goes through the
//! [`Scheduler`] contract, and deferred work is raised through
//! [`SoftInterrupt`], so every primitive can be built against the real kernel
//! or against a host emulation.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub use self::{
    condvar::CondVar,
    error::{NetisrError, ThreadListError, WaitError},
    kref::KRef,
    mp_lock::{MpLock, MpLockApi, MpLockGuard, SmpMpLock, UpMpLock},
    netisr::{Netisr, NetisrHandler, SoftInterrupt},
    sleep::{Scheduler, SleepError, SleepFlags, WaitChannel},
    spin_lock::{RawSpinLock, SpinLock, SpinLockGuard},
    thread::ThreadId,
    thread_list::{ThreadList, ThreadSlot, ThreadTable},
    token::Token,
};

pub mod condvar;
pub mod error;
pub mod kref;
pub mod mp_lock;
pub mod netisr;
pub mod sleep;
pub mod spin_lock;
pub mod thread;
pub mod thread_list;
pub mod token;

#[cfg(test)]
mod test_sched;
