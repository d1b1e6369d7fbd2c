//! Execution diagnostics hooks.

use std::time::Duration;

use crate::error::SystemError;
use crate::stage::Stage;

/// Receives timing and error callbacks around every system execution.
///
/// Implementations must be cheap and must not block: the callbacks run on
/// worker threads inside the batch barrier.
pub trait Diagnostics: Send + Sync {
    /// A system is about to run.
    fn system_start(&self, name: &str, stage: Stage);

    /// A system finished, normally or with a captured failure.
    fn system_end(&self, name: &str, stage: Stage, error: Option<&SystemError>, duration: Duration);
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
}
