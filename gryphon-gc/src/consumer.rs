// GC consumer pool (§4.8 "Consumer execution"): K worker threads
// popping jobs, dispatching by task kind to a layout handler.

use std::sync::Arc;
use std::time::Duration;

use gryphon_base::ShutdownSignal;
use tracing::error;

use crate::layout::{LayoutErase, VertexId};
use crate::state::{GcState, Job};
use crate::task::{TaskKind, TaskRef};

pub const DEFAULT_CONSUMER_COUNT: usize = 2;

pub struct ConsumerPool {
    state: Arc<GcState>,
    layout: Arc<dyn LayoutErase>,
}

impl ConsumerPool {
    pub fn new(state: Arc<GcState>, layout: Arc<dyn LayoutErase>) -> Self {
        ConsumerPool { state, layout }
    }

    pub fn spawn(&self, count: usize, shutdown: ShutdownSignal) -> Vec<std::thread::JoinHandle<()>> {
        (0..count)
            .map(|_| {
                let state = self.state.clone();
                let layout = self.layout.clone();
                let shutdown = shutdown.clone();
                std::thread::spawn(move || run_consumer(state, layout, shutdown))
            })
            .collect()
    }
}

fn run_consumer(state: Arc<GcState>, layout: Arc<dyn LayoutErase>, shutdown: ShutdownSignal) {
    let jobs = state.job_receiver();
    let finished = state.finished_sender();
    let returned_eids = state.returned_eid_sender();
    loop {
        match jobs.recv_timeout(Duration::from_millis(100)) {
            Ok(job) => execute_job(&state, &layout, job, &finished, &returned_eids),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if shutdown.is_triggered() {
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn execute_job(
    state: &Arc<GcState>,
    layout: &Arc<dyn LayoutErase>,
    job: Job,
    finished: &crossbeam_channel::Sender<TaskRef>,
    returned_eids: &crossbeam_channel::Sender<u64>,
) {
    for task_ref in job.tasks {
        let Some(target) = state.target_of(task_ref) else { continue };
        match job.kind {
            TaskKind::EraseVertex => layout.erase_vertex(VertexId(target)),
            TaskKind::VMvccGc => layout.free_mvcc_chain(VertexId(target)),
            TaskKind::VPRowListGc | TaskKind::VPRowListDefrag => layout.defrag_prop_row(target),
            TaskKind::TopoRowListGc | TaskKind::TopoRowListDefrag => {
                for eid in layout.defrag_topo_row(target) {
                    let _ = returned_eids.send(eid);
                }
            }
            TaskKind::EPRowListGc | TaskKind::EPRowListDefrag => layout.defrag_prop_row(target),
            TaskKind::EraseOutE => layout.erase_edge(target, true),
            TaskKind::EraseInE => layout.erase_edge(target, false),
        }
        if let Err(e) = finished.send(task_ref) {
            error!(target: "gryphon::gc", error = %e, "finished-job queue closed, GC consumer exiting");
            return;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state::GcConfig;
    use crate::task::TaskKey;
    use crate::test_support::FakeLayout;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn consumer_erases_a_pushed_vertex_task() {
        let state = GcState::new(GcConfig::default(), Arc::new(AtomicU64::new(0)));
        let layout = Arc::new(FakeLayout::new());
        layout.add_vertex(7, 0);
        let pool = ConsumerPool::new(state.clone(), layout.clone());
        let shutdown = ShutdownSignal::new();
        let handles = pool.spawn(1, shutdown.clone());

        let task_ref = {
            let mut dag = state.dag.lock();
            dag.create_upstream(TaskKey { kind: TaskKind::EraseVertex, target: 7 }, 1)
        };
        {
            let mut dag = state.dag.lock();
            dag.mark_pushed(task_ref);
        }

        // Directly exercise the dispatch path rather than relying on the
        // batching thresholds in GcConfig::default().
        execute_job(
            &state,
            &layout,
            Job { kind: TaskKind::EraseVertex, tasks: vec![task_ref], cost: 1 },
            &state.finished_sender(),
            &state.returned_eid_sender(),
        );

        assert!(layout.erased_vertices().contains(&7));

        shutdown.trigger(&gryphon_base::Fatal::Config("test teardown".into()));
        for h in handles {
            let _ = h.join();
        }
    }
}
