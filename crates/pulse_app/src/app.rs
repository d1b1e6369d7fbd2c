//! The application runtime: registration façade and staged main loop.

use std::sync::Arc;

use tracing::info;

use pulse_core::CancelToken;
use pulse_event::EventBus;
use pulse_schedule::{BuildError, Scheduler, Stage, SystemMeta};

use crate::diag::{DiagHub, Diagnostics};
use crate::world::World;

/// Extends an [`App`] with systems, resources and configuration.
pub trait Plugin {
    /// Called once when the plugin is added.
    fn build(&self, app: &mut App);
}

/// The Pulse application: a world, a scheduler and an event bus behind a
/// staged main loop.
///
/// # Examples
///
/// ```rust
/// use pulse_app::{App, CancelToken, Stage, SystemMeta};
///
/// let mut app = App::new();
/// app.add_system(Stage::Update, "heartbeat", SystemMeta::new(), |_, _| {});
///
/// let cancel = CancelToken::new();
/// cancel.cancel(); // a real driver cancels on shutdown instead
/// app.run(&cancel).unwrap();
/// ```
pub struct App {
    world: Arc<World>,
    scheduler: Scheduler<World>,
    events: Arc<EventBus>,
    diag: Arc<DiagHub>,
}

impl App {
    /// Creates an empty application with a no-op diagnostics sink.
    #[must_use]
    pub fn new() -> Self {
        let diag = Arc::new(DiagHub::new());
        let events = Arc::new(EventBus::with_diagnostics(
            Arc::clone(&diag) as Arc<dyn pulse_event::EventDiagnostics>
        ));
        Self {
            world: Arc::new(World::new()),
            scheduler: Scheduler::new(),
            events,
            diag,
        }
    }

    /// Replaces the diagnostics sink for both the scheduler and the bus.
    pub fn set_diagnostics(&self, sink: Arc<dyn Diagnostics>) {
        self.diag.set(sink);
    }

    /// Registers a system.
    ///
    /// `name` must be unique within its stage; `meta` carries the access
    /// declaration, ordering constraints and optional period. The body
    /// receives the driver's cancellation token and the world.
    pub fn add_system(
        &mut self,
        stage: Stage,
        name: impl Into<String>,
        meta: SystemMeta,
        body: impl Fn(&CancelToken, &World) + Send + Sync + 'static,
    ) -> &mut Self {
        self.scheduler.add_system(stage, name, meta, body);
        self
    }

    /// Runs a plugin's registration hook.
    pub fn add_plugin(&mut self, plugin: impl Plugin) -> &mut Self {
        plugin.build(self);
        self
    }

    /// Runs several plugins' registration hooks, in order.
    pub fn add_plugins<P: Plugin>(&mut self, plugins: impl IntoIterator<Item = P>) -> &mut Self {
        for plugin in plugins {
            plugin.build(self);
        }
        self
    }

    /// The world handed to every system.
    #[must_use]
    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    /// The event bus backing `writer_for`/`reader_for`.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Validates constraints and plans batches for every stage.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::CyclicDependency`] for the first stage whose
    /// constraints form a cycle.
    pub fn build(&self) -> Result<(), BuildError> {
        self.scheduler.build()
    }

    /// Runs one stage to completion (or to cancellation).
    pub fn run_stage(&self, stage: Stage, cancel: &CancelToken) {
        let diag = Arc::clone(&self.diag) as Arc<dyn pulse_schedule::Diagnostics>;
        self.scheduler.run_stage(stage, cancel, &self.world, &diag);
    }

    /// Closes out the frame on the event bus: events with no readers are
    /// completed, then the buffers flip so this frame's writes become
    /// readable in the next.
    pub fn end_frame(&self) {
        self.events.complete_no_reader();
        self.events.advance();
    }

    /// Runs the application until `cancel` fires.
    ///
    /// The startup stages run once, then the frame stages repeat; after
    /// each full pass the bus closes out the frame. Cancellation is
    /// honoured between batches, so a fired token stops the loop without
    /// interrupting systems already running. Shuts the worker pool down
    /// before returning.
    ///
    /// # Errors
    ///
    /// Returns the [`BuildError`] if the schedule fails to build; nothing
    /// has run in that case.
    pub fn run(&self, cancel: &CancelToken) -> Result<(), BuildError> {
        self.build()?;
        info!(systems = self.scheduler.system_count(), "runtime built");

        for stage in Stage::STARTUP {
            self.run_stage(stage, cancel);
        }
        self.end_frame();

        while !cancel.is_cancelled() {
            for stage in Stage::FRAME {
                self.run_stage(stage, cancel);
            }
            self.end_frame();
        }

        info!("runtime stopping");
        self.scheduler.shutdown();
        Ok(())
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}
