//! Combined diagnostics surface of the runtime.
//!
//! The scheduler and the event bus each define the narrow hook trait they
//! call; applications implement this combined trait once and the runtime
//! adapts it to both.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, error, trace};

use pulse_schedule::{Stage, SystemError};

/// Receives execution and event callbacks from the whole runtime.
///
/// Callbacks run on worker threads and writer threads; implementations
/// must be cheap and must not block.
pub trait Diagnostics: Send + Sync {
    /// A system is about to run.
    fn system_start(&self, name: &str, stage: Stage);

    /// A system finished, normally or with a captured failure.
    fn system_end(&self, name: &str, stage: Stage, error: Option<&SystemError>, duration: Duration);

    /// `count` events of type `type_name` were appended in one call.
    fn event_emit(&self, type_name: &str, count: usize);
}

/// A diagnostics sink that ignores every callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopDiagnostics;

impl Diagnostics for NopDiagnostics {
    fn system_start(&self, _name: &str, _stage: Stage) {}

    fn system_end(
        &self,
        _name: &str,
        _stage: Stage,
        _error: Option<&SystemError>,
        _duration: Duration,
    ) {
    }

    fn event_emit(&self, _type_name: &str, _count: usize) {}
}

/// A diagnostics sink that reports through `tracing`.
///
/// System lifecycle goes to `debug`, failures to `error`, event emission
/// to `trace`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn system_start(&self, name: &str, stage: Stage) {
        debug!(system = name, stage = %stage, "system started");
    }

    fn system_end(&self, name: &str, stage: Stage, err: Option<&SystemError>, duration: Duration) {
        match err {
            Some(err) => error!(
                system = name,
                stage = %stage,
                duration_us = duration.as_micros() as u64,
                error = %err,
                "system finished with error"
            ),
            None => debug!(
                system = name,
                stage = %stage,
                duration_us = duration.as_micros() as u64,
                "system finished"
            ),
        }
    }

    fn event_emit(&self, type_name: &str, count: usize) {
        trace!(event = type_name, count, "events emitted");
    }
}

/// Swappable fan-out point between the app and the two subsystem traits.
///
/// The bus and the scheduler hold this hub; replacing the sink through
/// [`DiagHub::set`] takes effect immediately for both.
pub(crate) struct DiagHub {
    inner: RwLock<Arc<dyn Diagnostics>>,
}

impl DiagHub {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(NopDiagnostics)),
        }
    }

    pub(crate) fn set(&self, sink: Arc<dyn Diagnostics>) {
        *self.inner.write() = sink;
    }
}

impl pulse_schedule::Diagnostics for DiagHub {
    fn system_start(&self, name: &str, stage: Stage) {
        self.inner.read().system_start(name, stage);
    }

    fn system_end(&self, name: &str, stage: Stage, error: Option<&SystemError>, duration: Duration) {
        self.inner.read().system_end(name, stage, error, duration);
    }
}

impl pulse_event::EventDiagnostics for DiagHub {
    fn event_emit(&self, type_name: &str, count: usize) {
        self.inner.read().event_emit(type_name, count);
    }
}
