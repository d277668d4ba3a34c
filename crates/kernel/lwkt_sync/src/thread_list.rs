//! The global list of live threads and static TLS distribution.
//!
//! Thread records live in an arena. A [`ThreadSlot`] names a record by index
//! plus the generation of that index, so a slot kept past the record's
//! reclamation is detected instead of aliasing a newer thread.
//!
//! Each record owns a static TLS block of [`STATIC_TLS_SIZE`] bytes. The
//! thread control block sits right past the end of the block and a segment
//! at offset `offset` starts `offset` bytes below it (variant II layout).

use alloc::{boxed::Box, string::String, vec, vec::Vec};

use lwkt_params::STATIC_TLS_SIZE;
use mutex_api::Mutex;

use crate::{error::ThreadListError, thread::ThreadId};

/// Index of a thread record, tagged with the generation of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadSlot {
    index: usize,
    generation: u32,
}

impl ThreadSlot {
    #[must_use]
    pub fn index(self) -> usize {
        self.index
    }
}

/// List of threads, protected by `M`.
///
/// Registration, unregistration, and TLS distribution all run under the one
/// list lock, so a distribution reaches exactly the threads registered when
/// it starts.
#[derive(Debug)]
pub struct ThreadList<M>(M);

impl<M> Default for ThreadList<M>
where
    M: Mutex<Data = ThreadTable>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M> ThreadList<M>
where
    M: Mutex<Data = ThreadTable>,
{
    #[must_use]
    pub fn new() -> Self {
        Self(M::new(ThreadTable::new()))
    }

    /// Adds a live thread and returns its slot.
    ///
    /// The thread's TLS block starts out with every segment distributed so
    /// far.
    pub fn register(&self, id: ThreadId, name: &str) -> ThreadSlot {
        let slot = self.0.lock().register(id, name);
        log::debug!("thread {id} ({name:?}) registered at slot {}", slot.index);
        slot
    }

    /// Removes a thread from the list.
    ///
    /// The record stays allocated while the thread is held.
    pub fn unregister(&self, slot: ThreadSlot) -> Result<(), ThreadListError> {
        let id = self.0.lock().unregister(slot)?;
        log::debug!("thread {id} unregistered from slot {}", slot.index);
        Ok(())
    }

    /// Keeps the record of `slot` alive until a matching [`release`](Self::release).
    pub fn hold(&self, slot: ThreadSlot) -> Result<(), ThreadListError> {
        self.0.lock().hold(slot)
    }

    pub fn release(&self, slot: ThreadSlot) -> Result<(), ThreadListError> {
        self.0.lock().release(slot)
    }

    /// Returns `true` while `slot` names a record with outstanding holds.
    pub fn is_held(&self, slot: ThreadSlot) -> bool {
        self.0.lock().is_held(slot)
    }

    /// Returns `true` while `slot` names a registered thread.
    pub fn is_registered(&self, slot: ThreadSlot) -> bool {
        self.0.lock().is_registered(slot)
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the ids of the registered threads in registration order.
    pub fn threads(&self) -> Vec<ThreadId> {
        self.0.lock().iter().map(|rec| rec.id).collect()
    }

    pub fn set_name(&self, slot: ThreadSlot, name: &str) -> Result<(), ThreadListError> {
        let mut table = self.0.lock();
        let rec = table.record_mut(slot)?;
        rec.name.clear();
        rec.name.push_str(name);
        Ok(())
    }

    pub fn name(&self, slot: ThreadSlot) -> Result<String, ThreadListError> {
        Ok(self.0.lock().record(slot)?.name.clone())
    }

    /// Runs `f` on the static TLS block of `slot`.
    ///
    /// The slice ends at the thread control block.
    pub fn with_tls<F, R>(&self, slot: ThreadSlot, f: F) -> Result<R, ThreadListError>
    where
        F: FnOnce(&[u8]) -> R,
    {
        Ok(f(&self.0.lock().record(slot)?.tls[..]))
    }

    /// Installs a static TLS segment in every registered thread.
    ///
    /// The segment starts `offset` bytes below each thread's control block.
    /// The first `copy_len` bytes come from `src` and the rest up to
    /// `total_len` is zeroed. Threads registered afterwards get the segment
    /// too. Returns the number of threads updated.
    pub fn distribute_static_tls(
        &self,
        offset: usize,
        src: &[u8],
        copy_len: usize,
        total_len: usize,
    ) -> Result<usize, ThreadListError> {
        let mut table = self.0.lock();
        let updated = table.distribute_static_tls(offset, src, copy_len, total_len)?;
        drop(table);
        log::debug!(
            "static TLS at offset {offset} ({copy_len}/{total_len} bytes) distributed to {updated} threads"
        );
        Ok(updated)
    }
}

#[derive(Debug)]
struct ThreadRecord {
    id: ThreadId,
    name: String,
    tls: Box<[u8]>,
    holds: u32,
    registered: bool,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
struct Entry {
    generation: u32,
    record: Option<ThreadRecord>,
}

/// The thread records behind a [`ThreadList`] lock.
#[derive(Debug)]
pub struct ThreadTable {
    entries: Vec<Entry>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    /// TLS image every new thread starts with.
    template: Box<[u8]>,
}

impl Default for ThreadTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
            template: vec![0; STATIC_TLS_SIZE].into_boxed_slice(),
        }
    }

    fn record(&self, slot: ThreadSlot) -> Result<&ThreadRecord, ThreadListError> {
        self.entries
            .get(slot.index)
            .filter(|e| e.generation == slot.generation)
            .and_then(|e| e.record.as_ref())
            .ok_or(ThreadListError::StaleSlot)
    }

    fn record_mut(&mut self, slot: ThreadSlot) -> Result<&mut ThreadRecord, ThreadListError> {
        self.entries
            .get_mut(slot.index)
            .filter(|e| e.generation == slot.generation)
            .and_then(|e| e.record.as_mut())
            .ok_or(ThreadListError::StaleSlot)
    }

    fn rec(&self, index: usize) -> &ThreadRecord {
        self.entries[index]
            .record
            .as_ref()
            .expect("linked entry must hold a record")
    }

    fn rec_mut(&mut self, index: usize) -> &mut ThreadRecord {
        self.entries[index]
            .record
            .as_mut()
            .expect("linked entry must hold a record")
    }

    fn register(&mut self, id: ThreadId, name: &str) -> ThreadSlot {
        let record = ThreadRecord {
            id,
            name: String::from(name),
            tls: self.template.clone(),
            holds: 0,
            registered: true,
            prev: self.tail,
            next: None,
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.entries[index].record = Some(record);
                index
            }
            None => {
                self.entries.push(Entry {
                    generation: 0,
                    record: Some(record),
                });
                self.entries.len() - 1
            }
        };

        match self.tail {
            Some(tail) => self.rec_mut(tail).next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;

        ThreadSlot {
            index,
            generation: self.entries[index].generation,
        }
    }

    fn unregister(&mut self, slot: ThreadSlot) -> Result<ThreadId, ThreadListError> {
        let rec = self.record_mut(slot)?;
        if !rec.registered {
            return Err(ThreadListError::StaleSlot);
        }
        rec.registered = false;
        let (id, prev, next, holds) = (rec.id, rec.prev.take(), rec.next.take(), rec.holds);

        match prev {
            Some(prev) => self.rec_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.rec_mut(next).prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;

        if holds == 0 {
            self.reclaim(slot.index);
        }
        Ok(id)
    }

    fn reclaim(&mut self, index: usize) {
        let entry = &mut self.entries[index];
        entry.record = None;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(index);
    }

    fn hold(&mut self, slot: ThreadSlot) -> Result<(), ThreadListError> {
        let rec = self.record_mut(slot)?;
        rec.holds += 1;
        Ok(())
    }

    fn release(&mut self, slot: ThreadSlot) -> Result<(), ThreadListError> {
        let rec = self.record_mut(slot)?;
        assert!(rec.holds > 0, "thread {}: released without hold", rec.id);
        rec.holds -= 1;
        if rec.holds == 0 && !rec.registered {
            self.reclaim(slot.index);
        }
        Ok(())
    }

    fn is_held(&self, slot: ThreadSlot) -> bool {
        self.record(slot).is_ok_and(|rec| rec.holds > 0)
    }

    fn is_registered(&self, slot: ThreadSlot) -> bool {
        self.record(slot).is_ok_and(|rec| rec.registered)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn iter(&self) -> impl Iterator<Item = &ThreadRecord> + '_ {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let rec = self.rec(cursor?);
            cursor = rec.next;
            Some(rec)
        })
    }

    fn distribute_static_tls(
        &mut self,
        offset: usize,
        src: &[u8],
        copy_len: usize,
        total_len: usize,
    ) -> Result<usize, ThreadListError> {
        if offset > STATIC_TLS_SIZE
            || total_len > offset
            || copy_len > total_len
            || copy_len > src.len()
        {
            return Err(ThreadListError::TlsOutOfRange {
                offset,
                copy_len,
                total_len,
            });
        }

        let base = STATIC_TLS_SIZE - offset;
        let install = |tls: &mut [u8]| {
            let segment = &mut tls[base..base + total_len];
            let (init, zero) = segment.split_at_mut(copy_len);
            init.copy_from_slice(&src[..copy_len]);
            zero.fill(0);
        };

        install(&mut self.template[..]);
        let mut updated = 0;
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let rec = self.rec_mut(index);
            install(&mut rec.tls[..]);
            cursor = rec.next;
            updated += 1;
        }
        Ok(updated)
    }
}
