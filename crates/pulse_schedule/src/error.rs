//! Scheduler error types.

use crate::stage::Stage;

/// Errors detected while building the execution plan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// The dependency constraints of a stage form a cycle; the scheduler
    /// refuses to run until the constraints are fixed.
    #[error("stage {stage}: cyclic dependency detected")]
    CyclicDependency {
        /// The stage whose constraint graph is cyclic.
        stage: Stage,
    },
}

/// Failure of a single system execution, surfaced through diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    /// The system body panicked. The message carries the panic payload
    /// followed by a captured backtrace.
    #[error("panic: {0}")]
    Panicked(String),
}
