//! # pulse_app
//!
//! The Pulse application runtime: a staged main loop over the
//! access-aware scheduler (`pulse_schedule`) and the frame-buffered event
//! bus (`pulse_event`).
//!
//! An [`App`] owns the world, the scheduler and the bus. Systems register
//! per [`Stage`] with access declarations, ordering constraints and an
//! optional period; [`App::run`] builds the schedule, runs the startup
//! stages once and then repeats the frame stages — closing out the event
//! frame after each pass — until the driver's [`CancelToken`] fires.
//!
//! ## Frame contract
//!
//! Readers in frame N observe exactly the events written in frame N−1.
//! [`App::end_frame`] is the sole transition: it completes reader-less
//! events and flips every store's buffers.

pub mod app;
pub mod diag;
pub mod world;

pub use app::{App, Plugin};
pub use diag::{Diagnostics, LogDiagnostics, NopDiagnostics};
pub use world::{ResourceRef, ResourceRefMut, World};

pub use pulse_core::{monotonic_nanos, CancelToken};
pub use pulse_event::{EventBus, EventReader, EventReceipt, EventRef, EventWriter};
pub use pulse_schedule::{Access, BuildError, Stage, SystemError, SystemMeta};
