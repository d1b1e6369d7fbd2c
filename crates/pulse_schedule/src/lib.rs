//! # pulse_schedule
//!
//! Access-aware system scheduling for the Pulse runtime.
//!
//! Systems register per [`Stage`] with a declared read/write footprint
//! ([`Access`]), ordering constraints and an optional execution period.
//! [`Scheduler::build`] computes, per stage, a deterministic order and an
//! ordered list of **batches** — maximal sets of systems whose access
//! declarations are pairwise conflict-free and may therefore run in
//! parallel. [`Scheduler::run_stage`] dispatches the batches to a
//! persistent worker pool with a join barrier between batches, honours
//! cancellation between batches, gates periodic systems on a drift-free
//! clock and isolates panics per system.
//!
//! This crate provides:
//!
//! - [`BitSet`] — compact index sets behind the conflict checks.
//! - [`Access`] / [`AccessSets`] / [`TypeIndex`] — declared footprints and
//!   their compiled bit-set form.
//! - [`Stage`], [`SystemMeta`], [`System`] — the registration surface.
//! - [`Scheduler`] — ordering, batch planning, worker pool, dispatch.
//! - [`Diagnostics`] — start/end hooks around every system execution.

pub mod access;
pub mod bitset;
pub mod diag;
pub mod error;
pub mod scheduler;
pub mod stage;
pub mod system;

mod pool;

pub use access::{Access, AccessSets, TypeIndex};
pub use bitset::BitSet;
pub use diag::{Diagnostics, NopDiagnostics};
pub use error::{BuildError, SystemError};
pub use scheduler::Scheduler;
pub use stage::Stage;
pub use system::{System, SystemBody, SystemMeta};
