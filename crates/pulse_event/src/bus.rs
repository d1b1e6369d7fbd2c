//! The event bus: a type-indexed registry of per-type event stores.

use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;

use crate::diag::EventDiagnostics;
use crate::reader::EventReader;
use crate::store::EventStore;
use crate::writer::EventWriter;

/// Erased view of a store, for frame-wide fan-out.
trait AnyStore: Send + Sync {
    fn advance(&self);
    fn complete_no_reader(&self);
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<E: Send + Sync + 'static> AnyStore for EventStore<E> {
    fn advance(&self) {
        EventStore::advance(self);
    }

    fn complete_no_reader(&self) {
        EventStore::complete_no_reader(self);
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Frame-buffered, multi-producer/multi-consumer event delivery, keyed by
/// event type.
///
/// Stores are created on first reader/writer use. The bus never
/// synchronises readers against writers across stores; per-store locks
/// suffice because no operation reaches across types.
pub struct EventBus {
    stores: DashMap<TypeId, Arc<dyn AnyStore>>,
    diag: Option<Arc<dyn EventDiagnostics>>,
}

impl EventBus {
    /// Creates a bus without a diagnostics sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stores: DashMap::new(),
            diag: None,
        }
    }

    /// Creates a bus that reports every append to `diag`.
    #[must_use]
    pub fn with_diagnostics(diag: Arc<dyn EventDiagnostics>) -> Self {
        Self {
            stores: DashMap::new(),
            diag: Some(diag),
        }
    }

    /// Returns a writer for events of type `E`, creating the store on
    /// first use. Idempotent and thread-safe.
    #[must_use]
    pub fn writer_for<E: Send + Sync + 'static>(&self) -> EventWriter<E> {
        EventWriter::new(self.ensure_store::<E>())
    }

    /// Returns a reader for events of type `E`, creating the store on
    /// first use. Idempotent and thread-safe.
    #[must_use]
    pub fn reader_for<E: Send + Sync + 'static>(&self) -> EventReader<E> {
        EventReader::new(self.ensure_store::<E>())
    }

    /// Flips write→read buffers for every registered event type.
    pub fn advance(&self) {
        for store in self.stores.iter() {
            store.value().advance();
        }
    }

    /// Completes events with no registered readers, for every type.
    ///
    /// Call once per frame after the systems have run and before
    /// [`Self::advance`].
    pub fn complete_no_reader(&self) {
        for store in self.stores.iter() {
            store.value().complete_no_reader();
        }
    }

    fn ensure_store<E: Send + Sync + 'static>(&self) -> Arc<EventStore<E>> {
        let erased: Arc<dyn AnyStore> = {
            let slot = self.stores.entry(TypeId::of::<E>()).or_insert_with(|| {
                Arc::new(EventStore::<E>::new(self.diag.clone())) as Arc<dyn AnyStore>
            });
            Arc::clone(slot.value())
        };
        match erased.as_any().downcast::<EventStore<E>>() {
            Ok(store) => store,
            // Stores are keyed by their exact type token.
            Err(_) => unreachable!("event store registered under a mismatched type token"),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
