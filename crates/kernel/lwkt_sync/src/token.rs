//! Recursive, owner-tracked serialization tokens.

use core::{
    fmt,
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use crate::{sleep::Scheduler, thread::ThreadId};

const DEPTH_MASK: u64 = 0xffff_ffff;
const UNOWNED: u64 = 0;

/// A token owned by at most one thread at a time.
///
/// The owner and its recursion depth are packed in one word: the owner's id
/// in the upper half and the depth in the lower half, `0` meaning unowned.
/// Only the owner ever writes the word while it is owned; contenders only
/// try to swap it away from `0`.
pub struct Token {
    state: AtomicU64,
    /// Bumped each time the token goes from unowned to owned.
    generation: AtomicU32,
    name: &'static str,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("name", &self.name)
            .field("owner", &self.owner())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

fn pack(owner: ThreadId, depth: u32) -> u64 {
    (u64::from(u32::from(owner)) << 32) | u64::from(depth)
}

fn unpack(state: u64) -> Option<(ThreadId, u32)> {
    #[expect(clippy::cast_possible_truncation)]
    let owner = ThreadId::from_raw((state >> 32) as u32)?;
    #[expect(clippy::cast_possible_truncation)]
    let depth = (state & DEPTH_MASK) as u32;
    Some((owner, depth))
}

impl Token {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            state: AtomicU64::new(UNOWNED),
            generation: AtomicU32::new(0),
            name,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Takes the token for `thread` if it is free or already owned by `thread`.
    pub fn try_acquire(&self, thread: ThreadId) -> bool {
        let state = self.state.load(Ordering::Acquire);
        match unpack(state) {
            None => {
                if self
                    .state
                    .compare_exchange(
                        UNOWNED,
                        pack(thread, 1),
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_err()
                {
                    return false;
                }
                let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                log::trace!(
                    "token {:?}: acquired by {thread} (gen {generation})",
                    self.name
                );
                true
            }
            Some((owner, depth)) if owner == thread => {
                assert!(depth < u32::MAX, "token {:?}: depth overflow", self.name);
                self.state.store(pack(thread, depth + 1), Ordering::Relaxed);
                true
            }
            Some(_) => false,
        }
    }

    /// Takes the token for the calling thread, yielding while another thread
    /// owns it.
    pub fn acquire<S>(&self, sched: &S)
    where
        S: Scheduler + ?Sized,
    {
        let thread = sched.current_thread();
        while !self.try_acquire(thread) {
            sched.yield_now();
        }
    }

    /// Takes the token and reports whether anyone else owned it since
    /// `*generation` was recorded.
    ///
    /// `*generation` is updated to the current generation. A caller that
    /// drops the token while blocking uses this to find out whether the state
    /// it protected may have changed.
    pub fn acquire_gen<S>(&self, sched: &S, generation: &mut u32) -> bool
    where
        S: Scheduler + ?Sized,
    {
        self.acquire(sched);
        let now = self.generation();
        // Our own acquisition accounts for at most one bump.
        let unchanged = now == *generation || now == generation.wrapping_add(1);
        *generation = now;
        unchanged
    }

    /// Drops one level of ownership held by `thread`.
    ///
    /// # Panics
    ///
    /// Panics if `thread` does not own the token.
    #[track_caller]
    pub fn release(&self, thread: ThreadId) {
        let state = self.state.load(Ordering::Relaxed);
        let Some((owner, depth)) = unpack(state) else {
            panic!("token {:?}: released while unowned", self.name);
        };
        assert!(
            owner == thread,
            "token {:?}: released by {thread} but owned by {owner}",
            self.name
        );
        let next = if depth == 1 {
            log::trace!("token {:?}: released by {thread}", self.name);
            UNOWNED
        } else {
            pack(thread, depth - 1)
        };
        self.state.store(next, Ordering::Release);
    }

    /// Returns the recursion depth `thread` holds the token with.
    pub fn held_count(&self, thread: ThreadId) -> u32 {
        match unpack(self.state.load(Ordering::Acquire)) {
            Some((owner, depth)) if owner == thread => depth,
            _ => 0,
        }
    }

    pub fn owner(&self) -> Option<ThreadId> {
        unpack(self.state.load(Ordering::Acquire)).map(|(owner, _)| owner)
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Relaxed)
    }
}
