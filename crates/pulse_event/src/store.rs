//! Per-type event storage: double-buffered append log and entry lifecycle.
//!
//! Writers append to the write buffer at any point during a frame; readers
//! iterate the read buffer, which holds exactly the previous frame's
//! writes. [`EventStore::advance`] is the sole transition between frames:
//! it finalises every entry still in the old read buffer, swaps the
//! buffers, and recycles entries nobody references any more.
//!
//! Entry state (`pending`, `cancelled`, `completed`) is atomic and never
//! takes the store lock. Completion is a compare-and-swap; the winner alone
//! closes the entry's done-signal, so the signal fires at most once.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::diag::EventDiagnostics;

/// Upper bound on recycled entries retained per store.
const POOL_LIMIT: usize = 1024;

/// One emitted event and its lifecycle state.
pub(crate) struct Entry<E> {
    /// `None` only while the entry rests in the recycle pool.
    value: Option<E>,
    /// Readers currently registered to process this entry.
    pending: AtomicI32,
    /// Set by any reader that cancels the event; monotonic.
    cancelled: AtomicBool,
    /// Monotonic completion flag; transitions true at most once.
    completed: AtomicBool,
    /// Lazily materialised one-shot completion signal.
    done: Mutex<Option<DoneSignal>>,
}

/// A one-shot notification: dropping the sender wakes every receiver.
struct DoneSignal {
    sender: Option<Sender<()>>,
    receiver: Receiver<()>,
}

impl DoneSignal {
    fn open() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            sender: Some(sender),
            receiver,
        }
    }

    /// Already signalled: receivers wake immediately.
    fn pre_signalled() -> Self {
        let (sender, receiver) = bounded(0);
        drop(sender);
        Self {
            sender: None,
            receiver,
        }
    }
}

impl<E> Entry<E> {
    fn new(value: E) -> Self {
        Self {
            value: Some(value),
            pending: AtomicI32::new(0),
            cancelled: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            done: Mutex::new(None),
        }
    }

    /// Fully reinitialises a pooled entry for a new emission.
    fn reset(&mut self, value: E) {
        self.value = Some(value);
        *self.pending.get_mut() = 0;
        *self.cancelled.get_mut() = false;
        *self.completed.get_mut() = false;
        *self.done.get_mut() = None;
    }

    /// Drops the payload and all lifecycle state before pooling.
    fn clear(&mut self) {
        self.value = None;
        *self.pending.get_mut() = 0;
        *self.cancelled.get_mut() = false;
        *self.completed.get_mut() = false;
        *self.done.get_mut() = None;
    }

    pub(crate) fn value(&self) -> Option<&E> {
        self.value.as_ref()
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Registers one reader.
    pub(crate) fn register(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops one reader registration; returns `true` for the thread whose
    /// decrement observed zero.
    pub(crate) fn release(&self) -> bool {
        self.pending.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn pending_readers(&self) -> i32 {
        self.pending.load(Ordering::Acquire)
    }

    /// Attempts the false→true completion transition.
    ///
    /// The winning thread — and only it — closes the done-signal.
    pub(crate) fn try_complete(&self) -> bool {
        if self
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if let Some(signal) = self.done.lock().as_mut() {
            // Dropping the sender closes the channel for every waiter.
            signal.sender.take();
        }
        true
    }

    /// Returns a receiver on the done-signal, materialising it on demand.
    ///
    /// Asking after completion yields a pre-signalled channel, so late
    /// waiters never block.
    pub(crate) fn ensure_done(&self) -> Receiver<()> {
        let mut done = self.done.lock();
        if let Some(signal) = done.as_ref() {
            return signal.receiver.clone();
        }
        let signal = if self.is_completed() {
            DoneSignal::pre_signalled()
        } else {
            DoneSignal::open()
        };
        let receiver = signal.receiver.clone();
        *done = Some(signal);
        receiver
    }
}

/// Per-type, frame-buffered event container.
pub struct EventStore<E> {
    buffers: RwLock<Buffers<E>>,
    pool: Mutex<Vec<Arc<Entry<E>>>>,
    type_name: &'static str,
    diag: Option<Arc<dyn EventDiagnostics>>,
}

struct Buffers<E> {
    read_buf: Vec<Arc<Entry<E>>>,
    write_buf: Vec<Arc<Entry<E>>>,
}

impl<E: Send + Sync + 'static> EventStore<E> {
    pub(crate) fn new(diag: Option<Arc<dyn EventDiagnostics>>) -> Self {
        Self {
            buffers: RwLock::new(Buffers {
                read_buf: Vec::new(),
                write_buf: Vec::new(),
            }),
            pool: Mutex::new(Vec::new()),
            type_name: std::any::type_name::<E>(),
            diag,
        }
    }

    /// Takes an entry from the recycle pool or allocates a fresh one.
    fn new_entry(&self, value: E) -> Arc<Entry<E>> {
        let recycled = self.pool.lock().pop();
        match recycled {
            Some(mut entry) => match Arc::get_mut(&mut entry) {
                Some(slot) => {
                    slot.reset(value);
                    entry
                }
                // The pool only holds uniquely-owned entries; this arm is
                // unreachable but harmless.
                None => Arc::new(Entry::new(value)),
            },
            None => Arc::new(Entry::new(value)),
        }
    }

    /// Appends one event to the write buffer and returns its entry.
    pub(crate) fn append(&self, value: E) -> Arc<Entry<E>> {
        if let Some(diag) = &self.diag {
            diag.event_emit(self.type_name, 1);
        }
        let entry = self.new_entry(value);
        self.buffers.write().write_buf.push(Arc::clone(&entry));
        entry
    }

    /// Appends many events in one critical section.
    pub(crate) fn append_many(&self, values: impl IntoIterator<Item = E>) {
        let entries: Vec<_> = values.into_iter().map(|v| self.new_entry(v)).collect();
        if entries.is_empty() {
            return;
        }
        if let Some(diag) = &self.diag {
            diag.event_emit(self.type_name, entries.len());
        }
        self.buffers.write().write_buf.extend(entries);
    }

    /// Snapshots the read buffer for reader iteration.
    ///
    /// Snapshots must not be retained across the next [`Self::advance`].
    pub(crate) fn snapshot(&self) -> Vec<Arc<Entry<E>>> {
        self.buffers.read().read_buf.clone()
    }

    /// Copies the read-buffer values without registering readers and
    /// without clearing; completion still runs through
    /// [`Self::complete_no_reader`] or [`Self::advance`].
    pub(crate) fn drain_values(&self) -> Vec<E>
    where
        E: Clone,
    {
        self.buffers
            .read()
            .read_buf
            .iter()
            .filter_map(|entry| entry.value().cloned())
            .collect()
    }

    /// Completes every read-buffer entry that has no registered readers.
    pub fn complete_no_reader(&self) {
        let snapshot = self.snapshot();
        for entry in snapshot {
            if entry.pending_readers() == 0 {
                entry.try_complete();
            }
        }
    }

    /// Swaps the buffers: last frame's writes become readable, and the old
    /// read buffer is finalised and recycled.
    ///
    /// Every entry still sitting in the old read buffer is defensively
    /// completed so no waiter can hang across a frame boundary. Entries
    /// that nobody else references go back to the pool fully reset; an
    /// entry still held by a writer receipt is dropped from the store's
    /// side instead, which keeps its final state observable.
    pub fn advance(&self) {
        let mut buffers = self.buffers.write();

        for entry in &buffers.read_buf {
            entry.try_complete();
        }

        let Buffers {
            read_buf,
            write_buf,
        } = &mut *buffers;
        std::mem::swap(read_buf, write_buf);

        // `write_buf` now holds the finalised entries of the frame before
        // last; recycle what we uniquely own.
        let mut pool = self.pool.lock();
        for mut entry in write_buf.drain(..) {
            if pool.len() >= POOL_LIMIT {
                continue;
            }
            if let Some(slot) = Arc::get_mut(&mut entry) {
                slot.clear();
                pool.push(entry);
            }
        }
    }
}
