//! Event readers: frame-snapshot iteration with per-event cancellation.

use std::sync::Arc;

use crate::store::{Entry, EventStore};

/// Reads the previous frame's events of one type.
///
/// Obtained from [`EventBus::reader_for`](crate::EventBus::reader_for);
/// cheap to clone.
pub struct EventReader<E> {
    store: Arc<EventStore<E>>,
}

impl<E> Clone for EventReader<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<E: Send + Sync + 'static> EventReader<E> {
    pub(crate) fn new(store: Arc<EventStore<E>>) -> Self {
        Self { store }
    }

    /// Iterates the current read buffer in append order.
    ///
    /// The callback receives an [`EventRef`] exposing the payload and the
    /// event's cancellation controls, and returns `false` to stop early.
    ///
    /// Completion tracking is exact even on early exit: the reader first
    /// registers for every not-yet-completed entry of the snapshot, then
    /// consumes them in order, dropping its registration after each one.
    /// Registering up front means a `break` cannot leave a writer waiting
    /// forever, and the thread whose decrement reaches zero closes the
    /// entry. Entries completed by an earlier iteration are skipped, so a
    /// second `for_each` within the same frame observes nothing.
    pub fn for_each(&self, mut visit: impl FnMut(EventRef<'_, E>) -> bool) {
        let entries = self.store.snapshot();
        if entries.is_empty() {
            return;
        }

        let mut registered = vec![false; entries.len()];
        for (index, entry) in entries.iter().enumerate() {
            if !entry.is_completed() {
                entry.register();
                registered[index] = true;
            }
        }

        let mut stopped = false;
        for (index, entry) in entries.iter().enumerate() {
            if !registered[index] {
                continue;
            }
            if !stopped && !entry.is_completed() {
                if let Some(value) = entry.value() {
                    let event = EventRef {
                        value,
                        entry: entry.as_ref(),
                    };
                    if !visit(event) {
                        stopped = true;
                    }
                }
            }
            if entry.release() {
                entry.try_complete();
            }
        }
    }

    /// Collects the current read buffer into a `Vec`, in append order.
    ///
    /// Unlike [`Self::for_each`], draining does not register the reader:
    /// writers awaiting these events resolve through the frame's
    /// `complete_no_reader` instead.
    #[must_use]
    pub fn drain(&self) -> Vec<E>
    where
        E: Clone,
    {
        self.store.drain_values()
    }

    /// Copies up to `dst.len()` events into `dst`, returning the count.
    ///
    /// Same registration semantics as [`Self::drain`].
    pub fn drain_into(&self, dst: &mut [E]) -> usize
    where
        E: Clone,
    {
        if dst.is_empty() {
            return 0;
        }
        let values = self.store.drain_values();
        let count = values.len().min(dst.len());
        for (slot, value) in dst.iter_mut().zip(values.into_iter().take(count)) {
            *slot = value;
        }
        count
    }
}

/// One event as seen during [`EventReader::for_each`].
///
/// Dereferences to the payload. Must not be retained outside the callback.
pub struct EventRef<'a, E> {
    value: &'a E,
    entry: &'a Entry<E>,
}

impl<E> EventRef<'_, E> {
    /// The event payload.
    #[must_use]
    pub fn get(&self) -> &E {
        self.value
    }

    /// Marks this event as cancelled.
    ///
    /// Visible to the writer through its receipt and to other readers
    /// currently iterating the same event.
    pub fn cancel(&self) {
        self.entry.cancel();
    }

    /// Returns whether any reader has cancelled this event.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.entry.is_cancelled()
    }
}

impl<E> std::ops::Deref for EventRef<'_, E> {
    type Target = E;

    fn deref(&self) -> &Self::Target {
        self.value
    }
}
