//! Reusable worker pool for system execution.
//!
//! A fixed set of OS threads is spawned on first use and reused across
//! every stage run; jobs arrive over a single channel and completion is
//! reported per job so the scheduler can hold a barrier per batch.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::error;

use pulse_core::{monotonic_nanos, CancelToken};

use crate::diag::Diagnostics;
use crate::error::SystemError;
use crate::system::System;

/// Terminal state of one dispatched job.
pub(crate) enum JobOutcome {
    Completed,
    /// The body panicked; the original payload travels back to the
    /// dispatching stage so it can be re-raised after the batch barrier.
    Panicked(Box<dyn Any + Send>),
}

/// One unit of work: run a single system against the world.
pub(crate) struct Job<W> {
    pub(crate) system: Arc<System<W>>,
    pub(crate) cancel: CancelToken,
    pub(crate) world: Arc<W>,
    pub(crate) diag: Arc<dyn Diagnostics>,
    pub(crate) done: Sender<JobOutcome>,
}

/// Persistent worker pool, started lazily on the first stage run.
pub(crate) struct WorkerPool<W> {
    state: Mutex<Option<PoolState<W>>>,
}

struct PoolState<W> {
    jobs: Sender<Job<W>>,
    workers: Vec<JoinHandle<()>>,
}

impl<W: Send + Sync + 'static> WorkerPool<W> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    /// Returns the job channel, spawning the workers on first use.
    ///
    /// The pool holds `max(1, logical cores)` threads.
    pub(crate) fn ensure_started(&self) -> Sender<Job<W>> {
        let mut state = self.state.lock();
        if let Some(existing) = state.as_ref() {
            return existing.jobs.clone();
        }

        let (jobs, intake) = unbounded::<Job<W>>();
        let count = num_cpus::get().max(1);
        let workers = (0..count)
            .map(|worker| {
                let intake = intake.clone();
                std::thread::Builder::new()
                    .name(format!("pulse-worker-{worker}"))
                    .spawn(move || worker_loop(intake))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        *state = Some(PoolState {
            jobs: jobs.clone(),
            workers,
        });
        jobs
    }

    /// Closes the job channel and joins every worker.
    ///
    /// Idempotent; a later `ensure_started` spawns a fresh pool.
    pub(crate) fn shutdown(&self) {
        let Some(state) = self.state.lock().take() else {
            return;
        };
        drop(state.jobs);
        for worker in state.workers {
            let _ = worker.join();
        }
    }
}

/// Drains jobs until the channel closes at shutdown.
fn worker_loop<W>(intake: Receiver<Job<W>>) {
    for job in intake.iter() {
        run_job(job);
    }
}

fn run_job<W>(job: Job<W>) {
    let Job {
        system,
        cancel,
        world,
        diag,
        done,
    } = job;

    diag.system_start(system.name(), system.stage());
    let started = Instant::now();

    let result = catch_unwind(AssertUnwindSafe(|| system.run(&cancel, &world)));
    let duration = started.elapsed();

    let outcome = match result {
        Ok(()) => {
            diag.system_end(system.name(), system.stage(), None, duration);
            JobOutcome::Completed
        }
        Err(payload) => {
            let captured = SystemError::Panicked(format!(
                "{}\n{}",
                panic_message(payload.as_ref()),
                std::backtrace::Backtrace::force_capture()
            ));
            error!(
                system = system.name(),
                stage = %system.stage(),
                error = %captured,
                "system panicked"
            );
            diag.system_end(system.name(), system.stage(), Some(&captured), duration);
            JobOutcome::Panicked(payload)
        }
    };

    // Gate on the end time, not the start: more accurate pacing under load.
    system.mark_run(monotonic_nanos());

    // The dispatcher may have given up on the batch; a closed barrier is fine.
    let _ = done.send(outcome);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
