use std::{
    ops::{Deref, DerefMut},
    sync::{self, PoisonError},
};

use mutex_api::{Mutex, Relock};

/// A blocking mutex whose guard can be handed to a condition variable wait.
#[derive(Debug, Default)]
pub struct HostMutex<T> {
    inner: sync::Mutex<T>,
}

impl<T> HostMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: sync::Mutex::new(value),
        }
    }

    pub fn lock(&self) -> HostMutexGuard<'_, T> {
        HostMutexGuard {
            lock: self,
            guard: self.inner.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Mutex for HostMutex<T> {
    type Data = T;
    type Guard<'a>
        = HostMutexGuard<'a, T>
    where
        T: 'a;

    fn new(data: Self::Data) -> Self {
        Self::new(data)
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.lock()
    }
}

pub struct HostMutexGuard<'a, T> {
    lock: &'a HostMutex<T>,
    guard: sync::MutexGuard<'a, T>,
}

impl<T> Deref for HostMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for HostMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<T> Relock for HostMutexGuard<'_, T> {
    fn relock_after<F, R>(self, f: F) -> (Self, R)
    where
        F: FnOnce() -> R,
    {
        let lock = self.lock;
        drop(self);
        let res = f();
        (lock.lock(), res)
    }
}
