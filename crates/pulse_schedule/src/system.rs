//! System descriptors and the periodic execution gate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use pulse_core::CancelToken;

use crate::access::{Access, AccessSets, TypeIndex};
use crate::stage::Stage;

/// The executable body of a system.
///
/// Bodies receive the driver's cancellation token and the opaque world.
/// The scheduler guarantees that two bodies running concurrently have
/// non-conflicting access declarations; it makes no other claim about them.
pub type SystemBody<W> = Box<dyn Fn(&CancelToken, &W) + Send + Sync>;

/// Scheduling metadata attached to a system at registration.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use pulse_schedule::{Access, SystemMeta};
///
/// struct Position;
///
/// let meta = SystemMeta::new()
///     .with_access(Access::new().write::<Position>())
///     .in_set("movement")
///     .after("input")
///     .every(Duration::from_millis(30));
/// ```
#[derive(Debug, Clone, Default)]
pub struct SystemMeta {
    /// Declared read/write footprint.
    pub access: Access,
    /// Optional group tag; dependency constraints may target the whole set.
    pub set: Option<String>,
    /// Names of systems or sets this system must run before.
    pub before: Vec<String>,
    /// Names of systems or sets this system must run after.
    pub after: Vec<String>,
    /// Minimum interval between runs; zero means "run every frame".
    pub every: Duration,
}

impl SystemMeta {
    /// Creates empty metadata: no constraints, no access, runs every frame.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the access declaration.
    #[must_use]
    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Puts the system into a named set.
    #[must_use]
    pub fn in_set(mut self, set: impl Into<String>) -> Self {
        self.set = Some(set.into());
        self
    }

    /// Adds a "runs before" constraint targeting a system or set name.
    #[must_use]
    pub fn before(mut self, target: impl Into<String>) -> Self {
        self.before.push(target.into());
        self
    }

    /// Adds a "runs after" constraint targeting a system or set name.
    #[must_use]
    pub fn after(mut self, target: impl Into<String>) -> Self {
        self.after.push(target.into());
        self
    }

    /// Throttles the system to at most one run per `interval`.
    #[must_use]
    pub fn every(mut self, interval: Duration) -> Self {
        self.every = interval;
        self
    }
}

/// A registered system: immutable descriptor plus mutable gating state.
pub struct System<W> {
    name: String,
    stage: Stage,
    meta: SystemMeta,
    sets: AccessSets,
    body: SystemBody<W>,
    /// End timestamp of the most recent run, in monotonic nanoseconds.
    /// Zero means the system has never run.
    last_run_nanos: AtomicU64,
    /// Next deadline for periodic systems. Zero means not yet seeded.
    next_deadline_nanos: AtomicU64,
}

impl<W> System<W> {
    /// Builds a descriptor, compiling its access sets through `index`.
    pub(crate) fn new(
        stage: Stage,
        name: String,
        meta: SystemMeta,
        body: SystemBody<W>,
        index: &TypeIndex,
    ) -> Self {
        let sets = meta.access.compile(index);
        Self {
            name,
            stage,
            meta,
            sets,
            body,
            last_run_nanos: AtomicU64::new(0),
            next_deadline_nanos: AtomicU64::new(0),
        }
    }

    /// The system's name, unique within its stage.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The stage this system belongs to.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The registration metadata.
    #[must_use]
    pub fn meta(&self) -> &SystemMeta {
        &self.meta
    }

    /// Returns whether this system may not share a batch with `other`.
    #[must_use]
    pub fn conflicts_with(&self, other: &System<W>) -> bool {
        self.sets.conflicts(&other.sets)
    }

    /// Invokes the body.
    pub(crate) fn run(&self, cancel: &CancelToken, world: &W) {
        (self.body)(cancel, world);
    }

    /// Returns whether the periodic gate admits a run at `now_nanos`.
    ///
    /// Systems without a period always run. Periodic systems run when the
    /// current deadline has passed; the first deadline derives from the
    /// last run time, or is immediate if the system has never run.
    #[must_use]
    pub fn should_run(&self, now_nanos: u64) -> bool {
        if self.meta.every.is_zero() {
            return true;
        }

        let next = self.next_deadline_nanos.load(Ordering::Acquire);
        if next != 0 {
            return now_nanos >= next;
        }

        let last = self.last_run_nanos.load(Ordering::Acquire);
        if last == 0 {
            // Never ran; mark_run seeds the deadline after the first run.
            return true;
        }

        let first_deadline = last.saturating_add(self.meta.every.as_nanos() as u64);
        self.next_deadline_nanos
            .store(first_deadline, Ordering::Release);
        now_nanos >= first_deadline
    }

    /// Records a finished run ending at `end_nanos` and advances the gate.
    ///
    /// The next deadline steps from the previous deadline, not from the run
    /// time, so jitter does not accumulate. If execution lagged more than a
    /// full period the schedule resets to `end + every`, which skips the
    /// missed slots instead of bursting to catch up.
    pub fn mark_run(&self, end_nanos: u64) {
        self.last_run_nanos.store(end_nanos, Ordering::Release);

        if self.meta.every.is_zero() {
            return;
        }
        let every = self.meta.every.as_nanos() as u64;

        let scheduled = self.next_deadline_nanos.load(Ordering::Acquire);
        let base = if scheduled == 0 { end_nanos } else { scheduled };

        let mut next = base.saturating_add(every);
        if next < end_nanos {
            next = end_nanos.saturating_add(every);
        }
        self.next_deadline_nanos.store(next, Ordering::Release);
    }
}

impl<W> std::fmt::Debug for System<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .field("every", &self.meta.every)
            .finish_non_exhaustive()
    }
}
