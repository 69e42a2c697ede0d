//! Runs component resolution on a pool of worker threads.
//!
//! A component (partition) is dispatched only once every partition it
//! depends on has published. A worker owns its partition's verdicts until it
//! commits them, all at once, under the store's write lock. Cancellation is
//! observed between partitions only: a fixed point that has started always
//! finishes, and its result is still committed.

use crate::checker::graph::{Graph, NodeId};
use crate::checker::lattice::PurityVerdict;
use crate::checker::resolver::{resolve_partition, PartitionResult, Strictness};
use crossbeam_channel::unbounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// Cooperative cancellation flag, cheap to clone and share across threads.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-declaration resolution state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclState {
    Unvisited,
    InProgress,
    Resolved(PurityVerdict),
}

/// Published verdicts, shared between the coordinator and workers.
#[derive(Debug)]
struct VerdictStore {
    states: RwLock<Vec<DeclState>>,
}

impl VerdictStore {
    fn new(len: usize) -> Self {
        VerdictStore {
            states: RwLock::new(vec![DeclState::Unvisited; len]),
        }
    }

    fn verdict(&self, node: NodeId) -> PurityVerdict {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        let state = states.get(node);
        // Members of the running partition are answered by the partition
        // itself, never by the store.
        debug_assert!(
            !matches!(state, Some(DeclState::InProgress)),
            "declaration {} read while its partition runs",
            node
        );
        match state {
            Some(DeclState::Resolved(verdict)) => verdict.clone(),
            // Dependencies always publish first; anything else cannot be
            // trusted.
            _ => PurityVerdict::Unresolvable,
        }
    }

    fn begin(&self, members: &[NodeId]) {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        for &m in members {
            states[m] = DeclState::InProgress;
        }
    }

    fn commit(&self, result: &PartitionResult) {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        for (node, verdict) in &result.verdicts {
            states[*node] = DeclState::Resolved(verdict.clone());
        }
    }
}

/// Resolve every partition of `graph` with up to `workers` threads.
///
/// The result is indexed by component. `None` marks a partition that was
/// never started because `cancel` fired.
pub(crate) fn run(
    graph: &Graph,
    strictness: Strictness,
    workers: usize,
    cancel: &CancellationToken,
) -> Vec<Option<PartitionResult>> {
    let total = graph.components().len();
    let store = VerdictStore::new(graph.len());
    let workers = workers.clamp(1, total.max(1));

    let results = if workers == 1 {
        run_sequential(graph, strictness, &store, cancel)
    } else {
        run_parallel(graph, strictness, &store, workers, cancel)
    };

    let resolved = results.iter().filter(|r| r.is_some()).count();
    if resolved < total {
        warn!(resolved, total, "resolution cancelled");
    }
    results
}

fn run_sequential(
    graph: &Graph,
    strictness: Strictness,
    store: &VerdictStore,
    cancel: &CancellationToken,
) -> Vec<Option<PartitionResult>> {
    let components = graph.components();
    let mut results: Vec<Option<PartitionResult>> = (0..components.len()).map(|_| None).collect();

    for (index, component) in components.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        store.begin(&component.members);
        let result = resolve_partition(graph, index, strictness, &|n| store.verdict(n));
        store.commit(&result);
        results[index] = Some(result);
    }
    results
}

fn run_parallel(
    graph: &Graph,
    strictness: Strictness,
    store: &VerdictStore,
    workers: usize,
    cancel: &CancellationToken,
) -> Vec<Option<PartitionResult>> {
    let components = graph.components();
    let total = components.len();
    let mut results: Vec<Option<PartitionResult>> = (0..total).map(|_| None).collect();

    let mut waiting: Vec<usize> = components.iter().map(|c| c.deps.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); total];
    for (index, component) in components.iter().enumerate() {
        for &dep in &component.deps {
            dependents[dep].push(index);
        }
    }

    let (work_tx, work_rx) = unbounded::<usize>();
    let (done_tx, done_rx) = unbounded::<(usize, PartitionResult)>();

    std::thread::scope(|scope| {
        for worker in 0..workers {
            let work_rx = work_rx.clone();
            let done_tx = done_tx.clone();
            scope.spawn(move || {
                let mut handled = 0usize;
                for index in work_rx.iter() {
                    let result = resolve_partition(graph, index, strictness, &|n| store.verdict(n));
                    store.commit(&result);
                    handled += 1;
                    if done_tx.send((index, result)).is_err() {
                        break;
                    }
                }
                debug!(worker, partitions = handled, "worker finished");
            });
        }
        drop(work_rx);
        drop(done_tx);

        let dispatch = |index: usize| {
            store.begin(&components[index].members);
            work_tx.send(index).is_ok()
        };

        let mut in_flight = 0usize;
        if !cancel.is_cancelled() {
            for index in (0..total).filter(|&i| waiting[i] == 0) {
                if dispatch(index) {
                    in_flight += 1;
                }
            }
        }

        while in_flight > 0 {
            let Ok((index, result)) = done_rx.recv() else {
                break;
            };
            in_flight -= 1;
            results[index] = Some(result);

            // Drain what is already running, start nothing new.
            if cancel.is_cancelled() {
                continue;
            }
            for &next in &dependents[index] {
                waiting[next] -= 1;
                if waiting[next] == 0 && dispatch(next) {
                    in_flight += 1;
                }
            }
        }

        // Closing the work channel lets idle workers exit before the scope joins.
        drop(work_tx);
    });

    results
}
