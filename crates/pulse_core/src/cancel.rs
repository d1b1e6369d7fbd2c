//! Cooperative cancellation.
//!
//! A [`CancelToken`] is cloned freely; any clone may cancel, and every
//! clone observes it. Besides the flag, the token carries a channel that
//! never transports a message — cancelling drops the sender, which wakes
//! every receiver blocked on it. That lets waiters multiplex cancellation
//! with other channels in a `select!` instead of polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

/// A clonable cancellation token.
///
/// All clones share one state; `cancel` is idempotent and never blocks.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    // Held until cancellation; dropping it closes `closed`.
    sender: Mutex<Option<Sender<()>>>,
    closed: Receiver<()>,
}

impl CancelToken {
    /// Creates a fresh, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                sender: Mutex::new(Some(tx)),
                closed: rx,
            }),
        }
    }

    /// Cancels the token, waking every receiver blocked on [`Self::closed`].
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        // Dropping the sender closes the channel for all receivers.
        self.inner.sender.lock().take();
    }

    /// Returns `true` once [`Self::cancel`] has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// A channel that closes (and thus becomes ready) on cancellation.
    ///
    /// No message is ever sent on it; `recv` returning `Err` is the wakeup.
    /// Intended for `crossbeam_channel::select!` arms.
    #[must_use]
    pub fn closed(&self) -> &Receiver<()> {
        &self.inner.closed
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
