use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use lwkt_sync::SoftInterrupt;

/// Handle of an installed host soft interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoftIntVector(usize);

impl SoftIntVector {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
struct Line {
    name: &'static str,
    raised: bool,
    triggers: u64,
}

#[derive(Debug, Default)]
struct Inner {
    lines: Mutex<Vec<Line>>,
    cond: Condvar,
}

/// Soft interrupts delivered to whichever host thread polls or waits for
/// them.
///
/// A trigger sets the line's raised flag; triggering a raised line again is
/// absorbed, as with a real interrupt.
#[derive(Debug, Clone, Default)]
pub struct HostSoftInterrupt {
    inner: Arc<Inner>,
}

impl HostSoftInterrupt {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lines(&self) -> MutexGuard<'_, Vec<Line>> {
        self.inner
            .lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the number of installed soft interrupts.
    pub fn installed(&self) -> usize {
        self.lines().len()
    }

    /// Looks up the first soft interrupt installed under `name`.
    pub fn vector(&self, name: &str) -> Option<SoftIntVector> {
        self.lines()
            .iter()
            .position(|line| line.name == name)
            .map(SoftIntVector)
    }

    pub fn name(&self, vector: SoftIntVector) -> &'static str {
        self.lines()[vector.0].name
    }

    /// Returns how many times `vector` has been triggered.
    pub fn triggers(&self, vector: SoftIntVector) -> u64 {
        self.lines()[vector.0].triggers
    }

    /// Acknowledges `vector` if it is raised.
    pub fn take(&self, vector: SoftIntVector) -> bool {
        let mut lines = self.lines();
        let line = &mut lines[vector.0];
        let raised = line.raised;
        line.raised = false;
        raised
    }

    /// Waits up to `timeout` for `vector` to be raised, then acknowledges it.
    ///
    /// Returns `false` on timeout.
    pub fn wait(&self, vector: SoftIntVector, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut lines = self.lines();
        loop {
            let line = &mut lines[vector.0];
            if line.raised {
                line.raised = false;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            lines = self
                .inner
                .cond
                .wait_timeout(lines, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl SoftInterrupt for HostSoftInterrupt {
    type Vector = SoftIntVector;

    fn install(&self, name: &'static str) -> SoftIntVector {
        let mut lines = self.lines();
        lines.push(Line {
            name,
            raised: false,
            triggers: 0,
        });
        let vector = SoftIntVector(lines.len() - 1);
        log::debug!("soft interrupt {name:?} installed as vector {}", vector.0);
        vector
    }

    fn trigger(&self, vector: SoftIntVector) {
        let mut lines = self.lines();
        let line = &mut lines[vector.0];
        line.raised = true;
        line.triggers += 1;
        drop(lines);
        self.inner.cond.notify_all();
    }
}
