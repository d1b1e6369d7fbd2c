//! System scheduling: registration, deterministic ordering and parallel
//! batch dispatch.
//!
//! Systems register per stage with access declarations and `before`/`after`
//! constraints. [`Scheduler::build`] validates each stage's constraint
//! graph and plans an ordered list of batches, each a maximal set of
//! pairwise non-conflicting systems. [`Scheduler::run_stage`] dispatches
//! the batches to a reusable worker pool with a join barrier between
//! batches.
//!
//! Determinism: everywhere the algorithms choose among ready systems, ties
//! break by name ascending, so the same registrations always yield the same
//! order and the same batches.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crossbeam_channel::bounded;
use parking_lot::RwLock;
use tracing::{info, warn};

use pulse_core::{monotonic_nanos, CancelToken};

use crate::access::TypeIndex;
use crate::diag::Diagnostics;
use crate::error::BuildError;
use crate::pool::{Job, JobOutcome, WorkerPool};
use crate::stage::Stage;
use crate::system::{System, SystemMeta};

/// Schedules and executes systems, generic over the opaque world `W`.
///
/// The world is only ever handed through to system bodies; the scheduler
/// never inspects it.
pub struct Scheduler<W> {
    plan: RwLock<Plan<W>>,
    types: TypeIndex,
    pool: WorkerPool<W>,
}

struct Plan<W> {
    systems: HashMap<Stage, Vec<Arc<System<W>>>>,
    batches: HashMap<Stage, Vec<Vec<Arc<System<W>>>>>,
}

impl<W: Send + Sync + 'static> Scheduler<W> {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            plan: RwLock::new(Plan {
                systems: HashMap::new(),
                batches: HashMap::new(),
            }),
            types: TypeIndex::new(),
            pool: WorkerPool::new(),
        }
    }

    /// Registers a system for `stage` and invalidates the stage's plan.
    ///
    /// The access declaration is compiled to bit sets here, so conflict
    /// checks during planning are pure bit-set intersections.
    pub fn add_system(
        &self,
        stage: Stage,
        name: impl Into<String>,
        meta: SystemMeta,
        body: impl Fn(&CancelToken, &W) + Send + Sync + 'static,
    ) {
        let system = Arc::new(System::new(
            stage,
            name.into(),
            meta,
            Box::new(body),
            &self.types,
        ));
        let mut plan = self.plan.write();
        plan.systems.entry(stage).or_default().push(system);
        plan.batches.remove(&stage);
    }

    /// Returns the number of registered systems across all stages.
    #[must_use]
    pub fn system_count(&self) -> usize {
        self.plan.read().systems.values().map(Vec::len).sum()
    }

    /// Validates constraints and plans batches for every stage.
    ///
    /// Must run after all registration and before any [`Self::run_stage`].
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::CyclicDependency`] naming the first stage
    /// whose `before`/`after` constraints form a cycle.
    pub fn build(&self) -> Result<(), BuildError> {
        let mut plan = self.plan.write();

        let mut batches = HashMap::with_capacity(plan.systems.len());
        for (&stage, systems) in &plan.systems {
            let graph = DependencyGraph::new(systems);
            if topological_order(&graph).is_none() {
                return Err(BuildError::CyclicDependency { stage });
            }
            let stage_batches = compute_batches(&graph);
            info!(
                stage = %stage,
                systems = systems.len(),
                batches = stage_batches.len(),
                "stage plan built"
            );
            batches.insert(stage, stage_batches);
        }

        plan.batches = batches;
        Ok(())
    }

    /// Returns the planned batches of `stage` as lists of system names.
    ///
    /// Empty until [`Self::build`] has run.
    #[must_use]
    pub fn batch_names(&self, stage: Stage) -> Vec<Vec<String>> {
        self.plan
            .read()
            .batches
            .get(&stage)
            .map(|batches| {
                batches
                    .iter()
                    .map(|batch| batch.iter().map(|s| s.name().to_string()).collect())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Runs every due system of `stage`, batch by batch.
    ///
    /// Within a batch systems run concurrently on the worker pool; a join
    /// barrier separates batches. Cancellation is honoured between batches:
    /// systems already dispatched finish, later batches do not start.
    ///
    /// If a system panicked, the first captured payload is re-raised here
    /// once its batch has fully completed, so a supervising caller decides
    /// whether to terminate.
    ///
    /// Synchronous: returns only after the stage has executed or been
    /// cancelled.
    pub fn run_stage(
        &self,
        stage: Stage,
        cancel: &CancelToken,
        world: &Arc<W>,
        diag: &Arc<dyn Diagnostics>,
    ) {
        let jobs = self.pool.ensure_started();
        let batches = self
            .plan
            .read()
            .batches
            .get(&stage)
            .cloned()
            .unwrap_or_default();

        let mut first_panic = None;

        for mut batch in batches {
            if cancel.is_cancelled() {
                break;
            }

            batch.sort_by(|a, b| a.name().cmp(b.name()));

            let (done_tx, done_rx) = bounded(batch.len());
            let mut dispatched = 0usize;
            for system in batch {
                if !system.should_run(monotonic_nanos()) {
                    continue;
                }
                let job = Job {
                    system,
                    cancel: cancel.clone(),
                    world: Arc::clone(world),
                    diag: Arc::clone(diag),
                    done: done_tx.clone(),
                };
                if jobs.send(job).is_ok() {
                    dispatched += 1;
                }
            }
            drop(done_tx);

            // Batch barrier: every dispatched system finishes before the
            // next batch starts, panicking ones included.
            for _ in 0..dispatched {
                match done_rx.recv() {
                    Ok(JobOutcome::Completed) => {}
                    Ok(JobOutcome::Panicked(payload)) => {
                        if first_panic.is_none() {
                            first_panic = Some(payload);
                        }
                    }
                    Err(_) => break,
                }
            }

            if first_panic.is_some() {
                break;
            }
        }

        if let Some(payload) = first_panic {
            std::panic::resume_unwind(payload);
        }
    }

    /// Stops the worker pool, joining every worker thread.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

impl<W: Send + Sync + 'static> Default for Scheduler<W> {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-stage constraint graph over systems sorted by name.
///
/// Node indices refer to the name-sorted `nodes` vector, so ascending index
/// order is ascending name order and every tie-break below is index-based.
struct DependencyGraph<W> {
    nodes: Vec<Arc<System<W>>>,
    outgoing: Vec<Vec<usize>>,
    in_degree: Vec<usize>,
}

impl<W> DependencyGraph<W> {
    fn new(systems: &[Arc<System<W>>]) -> Self {
        let mut nodes: Vec<Arc<System<W>>> = systems.to_vec();
        nodes.sort_by(|a, b| a.name().cmp(b.name()));

        let mut by_name: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
        let mut set_members: HashMap<&str, Vec<usize>> = HashMap::new();
        for (index, system) in nodes.iter().enumerate() {
            by_name.insert(system.name(), index);
            if let Some(set) = system.meta().set.as_deref() {
                set_members.entry(set).or_default().push(index);
            }
        }

        let mut outgoing = vec![Vec::new(); nodes.len()];
        let mut in_degree = vec![0usize; nodes.len()];
        let mut seen_edges: HashSet<(usize, usize)> = HashSet::new();
        let mut add_edge = |from: usize, to: usize| {
            if seen_edges.insert((from, to)) {
                outgoing[from].push(to);
                in_degree[to] += 1;
            }
        };

        for (index, system) in nodes.iter().enumerate() {
            // This system must run before its `before` targets.
            for target in &system.meta().before {
                if let Some(&successor) = by_name.get(target.as_str()) {
                    add_edge(index, successor);
                } else if let Some(members) = set_members.get(target.as_str()) {
                    for &member in members {
                        add_edge(index, member);
                    }
                }
                // Targets resolving to neither contribute no edge, so
                // optional systems may be referenced freely.
            }
            // This system must run after its `after` dependencies.
            for dependency in &system.meta().after {
                if let Some(&predecessor) = by_name.get(dependency.as_str()) {
                    add_edge(predecessor, index);
                } else if let Some(members) = set_members.get(dependency.as_str()) {
                    for &member in members {
                        add_edge(member, index);
                    }
                }
            }
        }

        Self {
            nodes,
            outgoing,
            in_degree,
        }
    }
}

/// Kahn's algorithm with name-ascending tie-breaks.
///
/// Returns the complete order, or `None` if the graph has a cycle.
fn topological_order<W>(graph: &DependencyGraph<W>) -> Option<Vec<usize>> {
    let node_count = graph.nodes.len();
    let mut in_degree = graph.in_degree.clone();

    // Node indices are name-sorted, so keeping the ready list sorted by
    // index keeps extraction deterministic by name.
    let mut ready: Vec<usize> = (0..node_count).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(node_count);

    while !ready.is_empty() {
        let current = ready.remove(0);
        order.push(current);
        for &next in &graph.outgoing[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(next);
            }
        }
        ready.sort_unstable();
    }

    (order.len() == node_count).then_some(order)
}

/// Plans the ordered, maximal, conflict-free batches of one stage.
///
/// Repeatedly packs a batch by scanning the ready set in name order and
/// admitting each system that conflicts with none already admitted; emits
/// the batch, releases its successors, and goes again. Dependency edges
/// always separate batches because a successor only becomes ready once its
/// predecessors have been emitted.
fn compute_batches<W>(graph: &DependencyGraph<W>) -> Vec<Vec<Arc<System<W>>>> {
    let node_count = graph.nodes.len();
    // -1 marks emitted nodes.
    let mut in_degree: Vec<i64> = graph.in_degree.iter().map(|&d| d as i64).collect();
    let mut remaining = node_count;
    let mut batches = Vec::new();

    let mut ready: Vec<usize> = (0..node_count).filter(|&i| in_degree[i] == 0).collect();

    while remaining > 0 {
        if ready.is_empty() {
            // Cannot happen after a successful build; break the stall by
            // force-admitting the first blocked system instead of hanging.
            let Some(stuck) = (0..node_count).find(|&i| in_degree[i] > 0) else {
                break;
            };
            warn!(
                system = graph.nodes[stuck].name(),
                "stalled batch planning; forcing a blocked system"
            );
            ready.push(stuck);
        }

        let mut current = ready.clone();
        let mut used = vec![false; current.len()];

        loop {
            let mut batch: Vec<usize> = Vec::new();
            for (slot, &candidate) in current.iter().enumerate() {
                if used[slot] {
                    continue;
                }
                let admissible = batch
                    .iter()
                    .all(|&admitted| !graph.nodes[candidate].conflicts_with(&graph.nodes[admitted]));
                if admissible {
                    batch.push(candidate);
                    used[slot] = true;
                }
            }

            if batch.is_empty() {
                break;
            }

            batches.push(batch.iter().map(|&i| Arc::clone(&graph.nodes[i])).collect());

            // Carry over the unadmitted ready systems and release the
            // successors of everything just emitted.
            let mut next_ready: Vec<usize> = current
                .iter()
                .enumerate()
                .filter(|&(slot, _)| !used[slot])
                .map(|(_, &index)| index)
                .collect();
            for &emitted in &batch {
                for &successor in &graph.outgoing[emitted] {
                    in_degree[successor] -= 1;
                    if in_degree[successor] == 0 {
                        next_ready.push(successor);
                    }
                }
                in_degree[emitted] = -1;
                remaining -= 1;
            }

            next_ready.sort_unstable();
            next_ready.dedup();
            next_ready.retain(|&i| in_degree[i] == 0);

            ready = next_ready;
            current = ready.clone();
            used = vec![false; current.len()];
        }
    }

    batches
}

#[cfg(test)]
mod tests {
    use std::panic::AssertUnwindSafe;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::access::Access;
    use crate::diag::NopDiagnostics;

    use super::*;

    struct IntCell;
    struct StrCell;

    fn noop_diag() -> Arc<dyn Diagnostics> {
        Arc::new(NopDiagnostics)
    }

    fn add_marker_system(
        scheduler: &Scheduler<()>,
        name: &str,
        meta: SystemMeta,
        log: &Arc<Mutex<Vec<String>>>,
    ) {
        let log = Arc::clone(log);
        let marker = name.to_string();
        scheduler.add_system(Stage::Update, name, meta, move |_, _| {
            log.lock().unwrap().push(marker.clone());
        });
    }

    #[test]
    fn test_build_empty_scheduler() {
        let scheduler: Scheduler<()> = Scheduler::new();
        assert!(scheduler.build().is_ok());
        assert_eq!(scheduler.system_count(), 0);
    }

    #[test]
    fn test_chain_yields_sequential_batches() {
        let scheduler: Scheduler<()> = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        add_marker_system(&scheduler, "a", SystemMeta::new(), &log);
        add_marker_system(&scheduler, "b", SystemMeta::new().after("a"), &log);
        add_marker_system(&scheduler, "c", SystemMeta::new().after("b"), &log);
        add_marker_system(&scheduler, "d", SystemMeta::new().after("c"), &log);
        scheduler.build().unwrap();

        assert_eq!(
            scheduler.batch_names(Stage::Update),
            vec![vec!["a"], vec!["b"], vec!["c"], vec!["d"]]
        );

        let cancel = CancelToken::new();
        scheduler.run_stage(Stage::Update, &cancel, &Arc::new(()), &noop_diag());
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c", "d"]);
        scheduler.shutdown();
    }

    #[test]
    fn test_before_constraint_orders_batches() {
        let scheduler: Scheduler<()> = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        // "z" sorts last by name but must run first.
        add_marker_system(&scheduler, "z", SystemMeta::new().before("a"), &log);
        add_marker_system(&scheduler, "a", SystemMeta::new(), &log);
        scheduler.build().unwrap();
        assert_eq!(
            scheduler.batch_names(Stage::Update),
            vec![vec!["z"], vec!["a"]]
        );
    }

    #[test]
    fn test_set_constraints_expand_to_members() {
        let scheduler: Scheduler<()> = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        add_marker_system(&scheduler, "m1", SystemMeta::new().in_set("movement"), &log);
        add_marker_system(&scheduler, "m2", SystemMeta::new().in_set("movement"), &log);
        add_marker_system(&scheduler, "render", SystemMeta::new().after("movement"), &log);
        scheduler.build().unwrap();

        let batches = scheduler.batch_names(Stage::Update);
        assert_eq!(batches, vec![vec!["m1", "m2"], vec!["render"]]);
    }

    #[test]
    fn test_unknown_dependency_target_is_ignored() {
        let scheduler: Scheduler<()> = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        add_marker_system(
            &scheduler,
            "only",
            SystemMeta::new().after("not-registered").before("also-missing"),
            &log,
        );
        scheduler.build().unwrap();
        assert_eq!(scheduler.batch_names(Stage::Update), vec![vec!["only"]]);
    }

    #[test]
    fn test_cycle_is_reported_with_stage() {
        let scheduler: Scheduler<()> = Scheduler::new();
        scheduler.add_system(
            Stage::Update,
            "a",
            SystemMeta::new().after("b"),
            |_, _| {},
        );
        scheduler.add_system(
            Stage::Update,
            "b",
            SystemMeta::new().after("a"),
            |_, _| {},
        );
        assert_eq!(
            scheduler.build(),
            Err(BuildError::CyclicDependency {
                stage: Stage::Update
            })
        );
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let scheduler: Scheduler<()> = Scheduler::new();
        scheduler.add_system(
            Stage::Update,
            "selfish",
            SystemMeta::new().after("selfish"),
            |_, _| {},
        );
        assert!(scheduler.build().is_err());
    }

    #[test]
    fn test_conflicting_access_splits_batches() {
        let scheduler: Scheduler<()> = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        add_marker_system(
            &scheduler,
            "reader",
            SystemMeta::new().with_access(Access::new().read::<IntCell>()),
            &log,
        );
        add_marker_system(
            &scheduler,
            "writer",
            SystemMeta::new().with_access(Access::new().write::<IntCell>()),
            &log,
        );
        scheduler.build().unwrap();
        // Name order decides which goes first; each gets its own batch.
        assert_eq!(
            scheduler.batch_names(Stage::Update),
            vec![vec!["reader"], vec!["writer"]]
        );
    }

    #[test]
    fn test_non_conflicting_systems_share_a_batch() {
        let scheduler: Scheduler<()> = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        add_marker_system(
            &scheduler,
            "ints",
            SystemMeta::new().with_access(Access::new().read::<IntCell>()),
            &log,
        );
        add_marker_system(
            &scheduler,
            "strs",
            SystemMeta::new().with_access(Access::new().read::<StrCell>()),
            &log,
        );
        scheduler.build().unwrap();
        assert_eq!(
            scheduler.batch_names(Stage::Update),
            vec![vec!["ints", "strs"]]
        );
    }

    #[test]
    fn test_greedy_packing_is_maximal_and_ordered() {
        // "a" and "b" conflict; "c" conflicts with neither. The first batch
        // greedily admits "a" then skips "b" but still admits "c".
        let scheduler: Scheduler<()> = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        add_marker_system(
            &scheduler,
            "a",
            SystemMeta::new().with_access(Access::new().write::<IntCell>()),
            &log,
        );
        add_marker_system(
            &scheduler,
            "b",
            SystemMeta::new().with_access(Access::new().write::<IntCell>()),
            &log,
        );
        add_marker_system(
            &scheduler,
            "c",
            SystemMeta::new().with_access(Access::new().read::<StrCell>()),
            &log,
        );
        scheduler.build().unwrap();
        assert_eq!(
            scheduler.batch_names(Stage::Update),
            vec![vec!["a", "c"], vec!["b"]]
        );
    }

    #[test]
    fn test_batches_are_pairwise_conflict_free() {
        struct ResA;

        let scheduler: Scheduler<()> = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mixes = [
            Access::new().write::<IntCell>(),
            Access::new().read::<IntCell>().write::<StrCell>(),
            Access::new().read::<IntCell>(),
            Access::new().read::<StrCell>(),
            Access::new().resource_write::<ResA>(),
            Access::new().resource_read::<ResA>().read::<IntCell>(),
            Access::new().event_write::<IntCell>(),
            Access::new().event_read::<IntCell>(),
        ];
        for (i, access) in mixes.into_iter().enumerate() {
            add_marker_system(
                &scheduler,
                &format!("sys-{i}"),
                SystemMeta::new().with_access(access),
                &log,
            );
        }
        scheduler.build().unwrap();

        let plan = scheduler.plan.read();
        let batches = plan.batches.get(&Stage::Update).unwrap();
        assert!(!batches.is_empty());
        for batch in batches {
            for (i, a) in batch.iter().enumerate() {
                for b in &batch[i + 1..] {
                    assert!(
                        !a.conflicts_with(b),
                        "{} and {} conflict within one batch",
                        a.name(),
                        b.name()
                    );
                }
            }
        }
    }

    #[test]
    fn test_plan_is_deterministic_across_rebuilds() {
        let build_names = || {
            let scheduler: Scheduler<()> = Scheduler::new();
            let log = Arc::new(Mutex::new(Vec::new()));
            for name in ["delta", "alpha", "charlie", "bravo"] {
                add_marker_system(
                    &scheduler,
                    name,
                    SystemMeta::new().with_access(Access::new().write::<IntCell>()),
                    &log,
                );
            }
            add_marker_system(&scheduler, "echo", SystemMeta::new().after("alpha"), &log);
            scheduler.build().unwrap();
            scheduler.batch_names(Stage::Update)
        };
        let first = build_names();
        for _ in 0..5 {
            assert_eq!(build_names(), first);
        }
    }

    #[test]
    fn test_dependency_preservation_across_batches() {
        let scheduler: Scheduler<()> = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        add_marker_system(
            &scheduler,
            "gather",
            SystemMeta::new().with_access(Access::new().write::<IntCell>()),
            &log,
        );
        add_marker_system(
            &scheduler,
            "apply",
            SystemMeta::new()
                .after("gather")
                .with_access(Access::new().write::<StrCell>()),
            &log,
        );
        add_marker_system(
            &scheduler,
            "audit",
            SystemMeta::new().after("apply"),
            &log,
        );
        scheduler.build().unwrap();

        let batches = scheduler.batch_names(Stage::Update);
        let batch_of = |name: &str| {
            batches
                .iter()
                .position(|batch| batch.iter().any(|n| n == name))
                .unwrap()
        };
        assert!(batch_of("gather") < batch_of("apply"));
        assert!(batch_of("apply") < batch_of("audit"));
    }

    #[test]
    fn test_cancelled_token_skips_all_batches() {
        let scheduler: Scheduler<()> = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        add_marker_system(&scheduler, "never", SystemMeta::new(), &log);
        scheduler.build().unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        scheduler.run_stage(Stage::Update, &cancel, &Arc::new(()), &noop_diag());
        assert!(log.lock().unwrap().is_empty());
        scheduler.shutdown();
    }

    #[test]
    fn test_periodic_system_is_gated() {
        let scheduler: Scheduler<()> = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        scheduler.add_system(
            Stage::Update,
            "throttled",
            SystemMeta::new().every(Duration::from_secs(3600)),
            move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        scheduler.build().unwrap();

        let cancel = CancelToken::new();
        let world = Arc::new(());
        for _ in 0..10 {
            scheduler.run_stage(Stage::Update, &cancel, &world, &noop_diag());
        }
        // First run is immediate; the hour-long period gates the rest.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        scheduler.shutdown();
    }

    #[test]
    fn test_panic_is_reraised_after_the_batch() {
        let scheduler: Scheduler<()> = Scheduler::new();
        let survivor_ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&survivor_ran);
        scheduler.add_system(Stage::Update, "faulty", SystemMeta::new(), |_, _| {
            panic!("boom");
        });
        scheduler.add_system(Stage::Update, "survivor", SystemMeta::new(), move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.build().unwrap();

        let cancel = CancelToken::new();
        let world = Arc::new(());
        let diag = noop_diag();
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            scheduler.run_stage(Stage::Update, &cancel, &world, &diag);
        }));
        assert!(result.is_err(), "the panic must propagate to the caller");
        // The non-faulty system of the same batch still ran to completion.
        assert_eq!(survivor_ran.load(Ordering::SeqCst), 1);
        scheduler.shutdown();
    }
}
