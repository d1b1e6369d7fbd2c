//! Event writers and the per-event completion receipt.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::select;

use pulse_core::CancelToken;

use crate::store::{Entry, EventStore};

/// Appends events of one type to the current frame's write buffer.
///
/// Obtained from [`EventBus::writer_for`](crate::EventBus::writer_for);
/// cheap to clone.
pub struct EventWriter<E> {
    store: Arc<EventStore<E>>,
}

impl<E> Clone for EventWriter<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<E: Send + Sync + 'static> EventWriter<E> {
    pub(crate) fn new(store: Arc<EventStore<E>>) -> Self {
        Self { store }
    }

    /// Appends an event, fire-and-forget.
    pub fn emit(&self, value: E) {
        let _ = self.store.append(value);
    }

    /// Appends an event and returns a receipt observing its completion and
    /// cancellation.
    pub fn emit_result(&self, value: E) -> EventReceipt<E> {
        EventReceipt {
            entry: Some(self.store.append(value)),
        }
    }

    /// Appends many events in one critical section.
    pub fn emit_many(&self, values: impl IntoIterator<Item = E>) {
        self.store.append_many(values);
    }

    /// Emits and blocks until the event completes or `cancel` fires;
    /// returns whether a reader cancelled the event.
    pub fn emit_and_wait(&self, cancel: &CancelToken, value: E) -> bool {
        self.emit_result(value).wait(cancel)
    }
}

/// Writer-side handle observing one emitted event.
///
/// The default value is an invalid receipt on which every accessor returns
/// `false`.
pub struct EventReceipt<E> {
    entry: Option<Arc<Entry<E>>>,
}

impl<E> Default for EventReceipt<E> {
    fn default() -> Self {
        Self { entry: None }
    }
}

impl<E> Clone for EventReceipt<E> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry.clone(),
        }
    }
}

impl<E> EventReceipt<E> {
    /// Returns whether this receipt observes an actual emission.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.entry.is_some()
    }

    /// Current cancellation state, without waiting.
    ///
    /// May be `false` simply because no reader has run yet.
    #[must_use]
    pub fn cancelled(&self) -> bool {
        self.entry
            .as_deref()
            .is_some_and(Entry::is_cancelled)
    }

    /// Blocks until the event completes or `cancel` fires.
    ///
    /// Returns the event's cancellation state at that point: `true` iff
    /// some reader cancelled it. Completion arrives when the last
    /// registered reader finishes, or from the frame's
    /// `complete_no_reader`/`advance` if no reader registered.
    pub fn wait(&self, cancel: &CancelToken) -> bool {
        let Some(entry) = self.entry.as_deref() else {
            return false;
        };
        if entry.is_completed() {
            return entry.is_cancelled();
        }

        let done = entry.ensure_done();
        select! {
            recv(done) -> _ => entry.is_cancelled(),
            recv(cancel.closed()) -> _ => entry.is_cancelled(),
        }
    }

    /// Returns as soon as the event is cancelled, completed, or `cancel`
    /// fires — whichever happens first — with the current cancellation
    /// state.
    ///
    /// Cancellation is a bare flag with no notification of its own, so
    /// after a brief spin this falls back to short polling multiplexed
    /// with the done-signal; that keeps the answer prompt without
    /// per-event timer overhead.
    pub fn wait_cancelled(&self, cancel: &CancelToken) -> bool {
        let Some(entry) = self.entry.as_deref() else {
            return false;
        };

        const SPINS: usize = 4;
        for _ in 0..SPINS {
            if entry.is_cancelled() {
                return true;
            }
            if entry.is_completed() || cancel.is_cancelled() {
                return entry.is_cancelled();
            }
            std::thread::yield_now();
        }

        let done = entry.ensure_done();
        loop {
            if entry.is_cancelled() {
                return true;
            }
            if entry.is_completed() || cancel.is_cancelled() {
                return entry.is_cancelled();
            }
            select! {
                recv(done) -> _ => return entry.is_cancelled(),
                recv(cancel.closed()) -> _ => return entry.is_cancelled(),
                default(Duration::from_micros(250)) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn writer() -> (Arc<EventStore<u32>>, EventWriter<u32>) {
        let store = Arc::new(EventStore::new(None));
        (Arc::clone(&store), EventWriter::new(store))
    }

    #[test]
    fn test_invalid_receipt_accessors() {
        let receipt: EventReceipt<u32> = EventReceipt::default();
        assert!(!receipt.valid());
        assert!(!receipt.cancelled());
        let cancel = CancelToken::new();
        assert!(!receipt.wait(&cancel));
        assert!(!receipt.wait_cancelled(&cancel));
    }

    #[test]
    fn test_wait_fast_path_after_completion() {
        let (store, writer) = writer();
        let receipt = writer.emit_result(1);
        store.advance();
        store.complete_no_reader();

        let cancel = CancelToken::new();
        let begin = Instant::now();
        assert!(!receipt.wait(&cancel));
        assert!(!receipt.wait_cancelled(&cancel));
        assert!(begin.elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn test_wait_returns_on_external_cancellation() {
        let (_store, writer) = writer();
        let receipt = writer.emit_result(1);
        // Event never advances, so only the token can release the waiter.
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(!receipt.wait(&cancel));
        assert!(!receipt.wait_cancelled(&cancel));
    }

    #[test]
    fn test_wait_observes_reader_cancellation() {
        let (store, writer) = writer();
        let receipt = writer.emit_result(1);
        store.advance();

        let entry = store.snapshot().remove(0);
        let waiter = std::thread::spawn(move || {
            let cancel = CancelToken::new();
            receipt.wait_cancelled(&cancel)
        });
        std::thread::sleep(Duration::from_millis(5));
        entry.cancel();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_wait_blocks_until_completion() {
        let (store, writer) = writer();
        let receipt = writer.emit_result(1);
        store.advance();

        let waiter = std::thread::spawn(move || {
            let cancel = CancelToken::new();
            receipt.wait(&cancel)
        });
        std::thread::sleep(Duration::from_millis(5));
        store.complete_no_reader();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn test_emit_many_appends_in_order() {
        let (store, writer) = writer();
        writer.emit_many([1, 2, 3]);
        writer.emit_many(Vec::<u32>::new());
        store.advance();
        let values: Vec<_> = store
            .snapshot()
            .iter()
            .filter_map(|e| e.value().copied())
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
    }
}
