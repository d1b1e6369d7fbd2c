//! Event-side diagnostics hook.

/// Receives a callback for every event append.
///
/// Runs inside the writer's emit path; implementations must be cheap.
pub trait EventDiagnostics: Send + Sync {
    /// `count` events of type `type_name` were appended in one call.
    fn event_emit(&self, type_name: &str, count: usize);
}
