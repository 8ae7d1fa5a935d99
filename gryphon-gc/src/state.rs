// Shared state between the producer (scanner) and the consumer pool
// (§4.8). The DAG's internal lock referenced by the spec is the
// `parking_lot::Mutex` wrapping it here; everything else is plain
// crossbeam queues.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::dag::Dag;
use crate::task::{TaskKind, TaskRef};

/// A batch of same-kind tasks ready to push to the consumer pool: the
/// accumulated cost has crossed that kind's threshold.
pub struct Job {
    pub kind: TaskKind,
    pub tasks: Vec<TaskRef>,
    pub cost: u64,
}

#[derive(Clone)]
pub struct GcConfig {
    pub cost_threshold: u64,
    pub prop_row_defrag_threshold: usize,
    pub topo_row_defrag_threshold: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            cost_threshold: 64,
            prop_row_defrag_threshold: 32,
            topo_row_defrag_threshold: 32,
        }
    }
}

#[derive(Default)]
struct PendingBatch {
    tasks: Vec<TaskRef>,
    cost: u64,
}

/// All of the mutable state a running GC needs, grouped behind one
/// handle and threaded explicitly into the producer and consumer
/// threads (§9 "global singletons become a handle struct").
pub struct GcState {
    pub dag: Mutex<Dag>,
    pub config: GcConfig,
    pub global_min_bt: Arc<AtomicU64>,
    pending: Mutex<HashMap<TaskKind, PendingBatch>>,
    job_tx: Sender<Job>,
    job_rx: Receiver<Job>,
    finished_tx: Sender<TaskRef>,
    finished_rx: Receiver<TaskRef>,
    returned_eid_tx: Sender<u64>,
    returned_eid_rx: Receiver<u64>,
}

impl GcState {
    pub fn new(config: GcConfig, global_min_bt: Arc<AtomicU64>) -> Arc<Self> {
        let (job_tx, job_rx) = crossbeam_channel::unbounded();
        let (finished_tx, finished_rx) = crossbeam_channel::unbounded();
        let (returned_eid_tx, returned_eid_rx) = crossbeam_channel::unbounded();
        Arc::new(GcState {
            dag: Mutex::new(Dag::new()),
            config,
            global_min_bt,
            pending: Mutex::new(HashMap::new()),
            job_tx,
            job_rx,
            finished_tx,
            finished_rx,
            returned_eid_tx,
            returned_eid_rx,
        })
    }

    pub fn job_receiver(&self) -> Receiver<Job> {
        self.job_rx.clone()
    }

    pub fn finished_sender(&self) -> Sender<TaskRef> {
        self.finished_tx.clone()
    }

    pub fn finished_receiver(&self) -> Receiver<TaskRef> {
        self.finished_rx.clone()
    }

    pub fn returned_eid_sender(&self) -> Sender<u64> {
        self.returned_eid_tx.clone()
    }

    pub fn returned_eid_receiver(&self) -> Receiver<u64> {
        self.returned_eid_rx.clone()
    }

    pub fn threshold_for(&self, kind: TaskKind) -> u64 {
        match kind {
            TaskKind::VPRowListDefrag | TaskKind::TopoRowListDefrag | TaskKind::EPRowListDefrag => {
                self.config.prop_row_defrag_threshold.max(self.config.topo_row_defrag_threshold) as u64
            }
            _ => self.config.cost_threshold,
        }
    }

    /// Marks a freshly-ACTIVE task ready; accumulates it into its kind's
    /// batch and, once the batch's cost crosses the threshold, marks
    /// every task in the batch PUSHED and sends the job (§4.8 "Cost
    /// model").
    pub fn offer_ready(&self, task_ref: TaskRef, kind: TaskKind, cost: u64) {
        let mut pending = self.pending.lock();
        let batch = pending.entry(kind).or_default();
        batch.tasks.push(task_ref);
        batch.cost += cost;
        if batch.cost >= self.threshold_for(kind) {
            let batch = pending.remove(&kind).unwrap();
            drop(pending);
            {
                let mut dag = self.dag.lock();
                for t in &batch.tasks {
                    dag.mark_pushed(*t);
                }
            }
            let _ = self.job_tx.send(Job { kind, tasks: batch.tasks, cost: batch.cost });
        }
    }

    pub fn global_min_bt(&self) -> u64 {
        self.global_min_bt.load(Ordering::Acquire)
    }

    pub fn target_of(&self, task_ref: TaskRef) -> Option<u64> {
        let dag = self.dag.lock();
        match task_ref {
            TaskRef::Upstream(idx) => dag.get_upstream(idx).map(|t| t.key.target),
            TaskRef::Downstream(idx) => dag.get_downstream(idx).map(|t| t.key.target),
        }
    }
}
