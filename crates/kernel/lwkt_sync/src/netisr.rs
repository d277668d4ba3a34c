//! Deferred dispatch of network software interrupts.
//!
//! Producers mark work with [`Netisr::schedule`], which sets a bit in a
//! pending mask and raises a soft interrupt. The soft interrupt handler calls
//! [`Netisr::dispatch`], which runs the handler of every pending bit. Setting
//! a bit that is already pending is free, so any number of schedules before a
//! dispatch collapse into one handler call.

use alloc::sync::Arc;
use core::{
    fmt,
    sync::atomic::{self, AtomicU32, Ordering},
};

use lwkt_params::NETISR_MAX;
use once_init::OnceInit;

use crate::{error::NetisrError, spin_lock::SpinLock};

pub type NetisrHandler = Arc<dyn Fn() + Send + Sync>;

/// A soft interrupt mechanism, provided by the platform.
pub trait SoftInterrupt {
    type Vector: Copy;

    /// Registers a soft interrupt and returns its vector.
    fn install(&self, name: &'static str) -> Self::Vector;

    /// Requests that the handler of `vector` runs soon.
    fn trigger(&self, vector: Self::Vector);
}

const _: () = assert!(NETISR_MAX <= u32::BITS as usize);

pub struct Netisr<S>
where
    S: SoftInterrupt,
{
    softint: S,
    /// Installed on the first registration.
    vector: OnceInit<S::Vector>,
    pending: AtomicU32,
    handlers: SpinLock<[Option<NetisrHandler>; NETISR_MAX]>,
}

impl<S> fmt::Debug for Netisr<S>
where
    S: SoftInterrupt,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Netisr")
            .field("installed", &self.is_installed())
            .field("pending", &format_args!("{:#x}", self.pending()))
            .finish_non_exhaustive()
    }
}

impl<S> Netisr<S>
where
    S: SoftInterrupt,
{
    pub const fn new(softint: S) -> Self {
        Self {
            softint,
            vector: OnceInit::new(),
            pending: AtomicU32::new(0),
            handlers: SpinLock::named("netisr", [const { None }; NETISR_MAX]),
        }
    }

    fn check_index(index: usize) -> Result<(), NetisrError> {
        if index >= NETISR_MAX {
            return Err(NetisrError::InvalidIndex { index });
        }
        Ok(())
    }

    /// Sets the handler run for `index`, replacing any previous one.
    pub fn register<F>(&self, index: usize, handler: F) -> Result<(), NetisrError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::check_index(index)?;
        self.handlers.lock()[index] = Some(Arc::new(handler));
        log::debug!("netisr {index}: handler registered");

        if let Ok(&vector) = self
            .vector
            .try_init_with(|| self.softint.install("netisr"))
        {
            log::debug!("netisr: soft interrupt installed");
            // Pairs with the fence in `schedule`: either it sees the vector
            // or we see its bit.
            atomic::fence(Ordering::SeqCst);
            if self.pending.load(Ordering::Relaxed) != 0 {
                self.softint.trigger(vector);
            }
        }
        Ok(())
    }

    /// Removes the handler of `index`.
    ///
    /// A dispatch already past the lookup may still run the old handler once.
    pub fn unregister(&self, index: usize) -> Result<(), NetisrError> {
        Self::check_index(index)?;
        self.handlers.lock()[index] = None;
        log::debug!("netisr {index}: handler unregistered");
        Ok(())
    }

    pub fn is_registered(&self, index: usize) -> bool {
        index < NETISR_MAX && self.handlers.lock()[index].is_some()
    }

    /// Returns `true` once the soft interrupt has been installed.
    pub fn is_installed(&self) -> bool {
        self.vector.try_get().is_ok()
    }

    /// Returns the mask of scheduled, not yet dispatched indices.
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Relaxed)
    }

    /// Marks `index` as pending and raises the soft interrupt.
    ///
    /// `index` must have a registered handler.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range, or, with debug assertions enabled,
    /// if no handler is registered for it.
    #[track_caller]
    pub fn schedule(&self, index: usize) {
        assert!(index < NETISR_MAX, "netisr {index}: index out of range");
        debug_assert!(
            self.is_registered(index),
            "netisr {index}: scheduled without a handler"
        );
        self.pending.fetch_or(1 << index, Ordering::Release);
        atomic::fence(Ordering::SeqCst);
        if let Ok(vector) = self.vector.try_get() {
            self.softint.trigger(*vector);
        }
    }

    /// Runs the handlers of all pending indices, lowest index first.
    ///
    /// Indices scheduled while dispatching are picked up by the same call.
    /// Returns the number of handlers run.
    pub fn dispatch(&self) -> usize {
        let mut ran = 0;
        loop {
            let bits = self.pending.load(Ordering::Acquire);
            if bits == 0 {
                break;
            }
            let index = bits.trailing_zeros();
            let bit = 1 << index;
            if self.pending.fetch_and(!bit, Ordering::AcqRel) & bit == 0 {
                // Someone else dispatched it.
                continue;
            }

            let handler = self.handlers.lock()[index as usize].clone();
            let Some(handler) = handler else {
                log::warn!("netisr {index}: scheduled without a handler");
                continue;
            };
            log::trace!("netisr {index}: dispatch");
            handler();
            ran += 1;
        }
        ran
    }
}
