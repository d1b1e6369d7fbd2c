//! Scheduling stages of the application loop.

use std::fmt;

/// A named phase of the loop; the scheduler's ordering and batching unit.
///
/// The first three stages run once at application start; the last three run
/// every frame. Within each group the stages execute in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Runs once before the main [`Stage::Startup`] stage.
    PreStartup,
    /// Runs once at application initialisation.
    Startup,
    /// Runs once after [`Stage::Startup`] to finalise early initialisation.
    PostStartup,
    /// Runs every frame before the main [`Stage::Update`] stage.
    PreUpdate,
    /// Runs every frame for the main application logic.
    Update,
    /// Runs every frame after [`Stage::Update`] for cleanup and finalisation.
    PostUpdate,
}

impl Stage {
    /// The one-shot stages, in execution order.
    pub const STARTUP: [Stage; 3] = [Stage::PreStartup, Stage::Startup, Stage::PostStartup];

    /// The per-frame stages, in execution order.
    pub const FRAME: [Stage; 3] = [Stage::PreUpdate, Stage::Update, Stage::PostUpdate];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::PreStartup => "PreStartup",
            Stage::Startup => "Startup",
            Stage::PostStartup => "PostStartup",
            Stage::PreUpdate => "PreUpdate",
            Stage::Update => "Update",
            Stage::PostUpdate => "PostUpdate",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names() {
        assert_eq!(Stage::PreStartup.to_string(), "PreStartup");
        assert_eq!(Stage::Update.to_string(), "Update");
    }

    #[test]
    fn test_stage_groups_are_ordered() {
        assert!(Stage::STARTUP.windows(2).all(|w| w[0] < w[1]));
        assert!(Stage::FRAME.windows(2).all(|w| w[0] < w[1]));
        assert!(Stage::PostStartup < Stage::PreUpdate);
    }
}
