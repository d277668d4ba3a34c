//! Host (std) implementations of the services LWKT primitives build on.
//!
//! OS threads stand in for lightweight threads: [`HostScheduler`] parks them
//! on a std condition variable, [`HostSoftInterrupt`] raises flags a host
//! thread can wait for, and [`HostMutex`] is a blocking lock whose guard can
//! be released across a condition variable wait.

pub use self::{
    mutex::{HostMutex, HostMutexGuard},
    scheduler::{HostScheduler, current_thread_id},
    softint::{HostSoftInterrupt, SoftIntVector},
};

mod mutex;
mod scheduler;
mod softint;
