// GC scanner thread (§4.8 "Scanning pass (Producer)"). Runs on every
// worker, never on master; sleeps a fixed period, then performs the
// four-step pass.

use std::sync::Arc;
use std::time::Duration;

use gryphon_base::ShutdownSignal;
use tracing::debug;

use crate::layout::LayoutScan;
use crate::state::GcState;
use crate::task::{TaskKey, TaskKind, TaskRef};

pub struct Producer {
    state: Arc<GcState>,
    layout: Arc<dyn LayoutScan>,
    scan_period: Duration,
}

impl Producer {
    pub fn new(state: Arc<GcState>, layout: Arc<dyn LayoutScan>, scan_period: Duration) -> Self {
        Producer { state, layout, scan_period }
    }

    pub fn spawn(self, shutdown: ShutdownSignal) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || loop {
            self.scan_once();
            if shutdown.is_triggered() {
                break;
            }
            std::thread::sleep(self.scan_period);
            if shutdown.is_triggered() {
                break;
            }
        })
    }

    /// The four steps of one scanning pass.
    pub fn scan_once(&self) {
        self.scan_reclaimable_vertices();
        self.scan_rows_for_defrag();
        self.drain_finished();
        self.drain_returned_eids();
    }

    fn stand_up_and_push(&self, kind: TaskKind, target: u64, cost: u64) {
        let key = TaskKey { kind, target };
        let task_ref = {
            let mut dag = self.state.dag.lock();
            dag.create_upstream(key, cost)
        };
        if let TaskRef::Upstream(_) = task_ref {
            self.state.offer_ready(task_ref, kind, cost);
        }
    }

    /// Step 1: vertices whose MVCC head end_time is stale are fully
    /// reclaimable — one EraseV, one VMVCC-gc, one VPRowList-gc, and one
    /// TopoRowList-gc task apiece.
    fn scan_reclaimable_vertices(&self) {
        let horizon = self.state.global_min_bt();
        for (vid, end_time) in self.layout.scan_vertices() {
            if end_time >= horizon {
                continue;
            }
            debug!(target: "gryphon::gc", vertex = vid.0, end_time, horizon, "vertex reclaimable");
            self.stand_up_and_push(TaskKind::EraseVertex, vid.0, 1);
            self.stand_up_and_push(TaskKind::VMvccGc, vid.0, 1);
            self.stand_up_and_push(TaskKind::VPRowListGc, vid.0, 1);
            self.stand_up_and_push(TaskKind::TopoRowListGc, vid.0, 1);
        }
    }

    /// Step 2: rows past their invisible-cell threshold get a
    /// defragmentation task, linked downstream of their row's GC task.
    fn scan_rows_for_defrag(&self) {
        for row in self.layout.scan_prop_rows() {
            if row.invisible_cells < self.state.config.prop_row_defrag_threshold {
                continue;
            }
            let gc_key = TaskKey { kind: TaskKind::VPRowListGc, target: row.id };
            let defrag_key = TaskKey { kind: TaskKind::VPRowListDefrag, target: row.id };
            let cost = row.invisible_cells as u64;
            let task_ref = {
                let mut dag = self.state.dag.lock();
                dag.create_downstream(defrag_key, gc_key, cost)
            };
            if let Some(task_ref) = task_ref {
                self.state.offer_ready(task_ref, TaskKind::VPRowListDefrag, cost);
            }
        }
        for row in self.layout.scan_topo_rows() {
            if row.invisible_cells < self.state.config.topo_row_defrag_threshold {
                continue;
            }
            let gc_key = TaskKey { kind: TaskKind::TopoRowListGc, target: row.id };
            let defrag_key = TaskKey { kind: TaskKind::TopoRowListDefrag, target: row.id };
            let cost = row.invisible_cells as u64;
            let task_ref = {
                let mut dag = self.state.dag.lock();
                dag.create_downstream(defrag_key, gc_key, cost)
            };
            if let Some(task_ref) = task_ref {
                self.state.offer_ready(task_ref, TaskKind::TopoRowListDefrag, cost);
            }
        }
    }

    /// Step 3: drains the finished-job queue, detaching finished tasks
    /// and re-offering any upstream that just became unblocked.
    fn drain_finished(&self) {
        let rx = self.state.finished_receiver();
        while let Ok(task_ref) = rx.try_recv() {
            let unblocked_cost = {
                let mut dag = self.state.dag.lock();
                dag.complete(task_ref)
            };
            if let Some(cost) = unblocked_cost {
                if let TaskRef::Upstream(idx) = task_ref {
                    let dag = self.state.dag.lock();
                    if let Some(up) = dag.get_upstream(idx) {
                        let kind = up.key.kind;
                        drop(dag);
                        self.state.offer_ready(task_ref, kind, cost);
                    }
                }
            }
        }
    }

    /// Step 4: drains the returned-eid queue (produced by TopoRowList GC
    /// consumers) and emits EraseOutE/EraseInE tasks.
    fn drain_returned_eids(&self) {
        let rx = self.state.returned_eid_receiver();
        while let Ok(eid) = rx.try_recv() {
            self.stand_up_and_push(TaskKind::EraseOutE, eid, 1);
            self.stand_up_and_push(TaskKind::EraseInE, eid, 1);
        }
    }
}
