//! # pulse_event
//!
//! Frame-buffered, per-type event delivery for the Pulse runtime.
//!
//! Each event type gets a double-buffered store: writers append to the
//! current frame's write buffer, readers iterate the read buffer — exactly
//! the previous frame's writes. Once per frame the driver calls
//! [`EventBus::complete_no_reader`] followed by [`EventBus::advance`],
//! which finalises the old frame and flips the buffers for every type.
//!
//! Writers may keep an [`EventReceipt`] per emission to block until the
//! event has been seen ([`EventReceipt::wait`]) or to learn promptly that
//! a reader cancelled it ([`EventReceipt::wait_cancelled`]). Completion is
//! signalled exactly once per event, by whichever side drops the last
//! outstanding reader registration — or by the frame boundary when no
//! reader registered at all.

pub mod bus;
pub mod diag;
pub mod reader;
pub mod writer;

mod store;

pub use bus::EventBus;
pub use diag::EventDiagnostics;
pub use reader::{EventReader, EventRef};
pub use writer::{EventReceipt, EventWriter};
