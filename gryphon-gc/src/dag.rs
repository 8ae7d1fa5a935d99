// The GC task DAG (§4.8, §9). Two independent dependency DAGs exist in
// the real system (VPRowListGC -> VPRowListDefrag; TopoRowListGC ->
// {TopoRowListDefrag, EPRowListDefrag}; EPRowListGC -> EPRowListDefrag)
// but they share one creation/completion rule set, so one `Dag` type
// serves both — callers just use distinct `TaskKind`s.

use std::collections::HashMap;

use crate::task::{Arena, DownstreamTask, TaskKey, TaskRef, TaskState, UpstreamTask};

#[derive(Default)]
pub struct Dag {
    upstream: Arena<UpstreamTask>,
    downstream: Arena<DownstreamTask>,
    index: HashMap<TaskKey, TaskRef>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_upstream(&self, idx: usize) -> Option<&UpstreamTask> {
        self.upstream.get(idx)
    }

    pub fn get_downstream(&self, idx: usize) -> Option<&DownstreamTask> {
        self.downstream.get(idx)
    }

    pub fn lookup(&self, key: TaskKey) -> Option<TaskRef> {
        self.index.get(&key).copied()
    }

    /// Creating a downstream task (§4.8 "Creation rules"): if an
    /// identical-id task exists, drop. If the potential upstream exists
    /// and is EMPTY, attach; if it exists and is not EMPTY, drop. If no
    /// upstream exists, synthesize an EMPTY holder and attach.
    pub fn create_downstream(&mut self, key: TaskKey, upstream_key: TaskKey, cost: u64) -> Option<TaskRef> {
        if self.index.contains_key(&key) {
            return None;
        }
        let uidx = match self.index.get(&upstream_key).copied() {
            Some(TaskRef::Upstream(uidx)) => {
                if self.upstream.get(uidx).map(|u| u.state) != Some(TaskState::Empty) {
                    return None;
                }
                uidx
            }
            Some(TaskRef::Downstream(_)) => return None,
            None => {
                let uidx = self.upstream.insert(UpstreamTask {
                    key: upstream_key,
                    cost: 0,
                    state: TaskState::Empty,
                    downstream: Vec::new(),
                    blocked_count: 0,
                });
                self.index.insert(upstream_key, TaskRef::Upstream(uidx));
                uidx
            }
        };
        let didx = self.downstream.insert(DownstreamTask {
            key,
            cost,
            state: TaskState::Active,
            upstream: Some(uidx),
        });
        if let Some(up) = self.upstream.get_mut(uidx) {
            up.downstream.push(didx);
        }
        self.index.insert(key, TaskRef::Downstream(didx));
        Some(TaskRef::Downstream(didx))
    }

    /// Creating an upstream task (§4.8 "Creation rules"): if an
    /// identical-id task exists, substantiate it (EMPTY -> ACTIVE); mark
    /// every ACTIVE downstream INVALID and detach it; if any downstream
    /// is PUSHED, mark BLOCKED with `blocked_count` set to that count;
    /// otherwise ACTIVE.
    pub fn create_upstream(&mut self, key: TaskKey, cost: u64) -> TaskRef {
        if let Some(TaskRef::Upstream(uidx)) = self.index.get(&key).copied() {
            let downstream_ids = self
                .upstream
                .get(uidx)
                .map(|u| u.downstream.clone())
                .unwrap_or_default();
            let mut pushed_count = 0usize;
            for didx in downstream_ids {
                if let Some(dt) = self.downstream.get_mut(didx) {
                    match dt.state {
                        TaskState::Active => {
                            dt.state = TaskState::Invalid;
                            dt.upstream = None;
                        }
                        TaskState::Pushed => pushed_count += 1,
                        _ => {}
                    }
                }
            }
            if let Some(up) = self.upstream.get_mut(uidx) {
                up.cost = cost;
                if pushed_count > 0 {
                    up.state = TaskState::Blocked;
                    up.blocked_count = pushed_count;
                } else {
                    up.state = TaskState::Active;
                    up.blocked_count = 0;
                }
            }
            return TaskRef::Upstream(uidx);
        }
        let uidx = self.upstream.insert(UpstreamTask {
            key,
            cost,
            state: TaskState::Active,
            downstream: Vec::new(),
            blocked_count: 0,
        });
        self.index.insert(key, TaskRef::Upstream(uidx));
        TaskRef::Upstream(uidx)
    }

    pub fn mark_pushed(&mut self, task_ref: TaskRef) {
        match task_ref {
            TaskRef::Upstream(idx) => {
                if let Some(t) = self.upstream.get_mut(idx) {
                    t.state = TaskState::Pushed;
                }
            }
            TaskRef::Downstream(idx) => {
                if let Some(t) = self.downstream.get_mut(idx) {
                    t.state = TaskState::Pushed;
                }
            }
        }
    }

    /// Completion of a PUSHED task (§4.8 "Completion rules"). Returns
    /// the upstream task's cost if this completion unblocked it (the
    /// caller adds that cost back into the job's accumulated cost).
    pub fn complete(&mut self, task_ref: TaskRef) -> Option<u64> {
        match task_ref {
            TaskRef::Downstream(didx) => {
                let task = self.downstream.remove(didx)?;
                self.index.remove(&task.key);
                if let Some(uidx) = task.upstream {
                    return self.on_downstream_detached(uidx);
                }
                None
            }
            TaskRef::Upstream(uidx) => {
                if let Some(task) = self.upstream.remove(uidx) {
                    self.index.remove(&task.key);
                }
                None
            }
        }
    }

    /// INVALID downstream tasks are skipped by the consumer but still
    /// removed from the DAG on completion (§4.8 "Failure semantics").
    pub fn remove_invalid(&mut self, task_ref: TaskRef) {
        self.complete(task_ref);
    }

    fn on_downstream_detached(&mut self, uidx: usize) -> Option<u64> {
        let mut unblocked_cost = None;
        if let Some(up) = self.upstream.get_mut(uidx) {
            if up.state == TaskState::Blocked {
                up.blocked_count = up.blocked_count.saturating_sub(1);
                if up.blocked_count == 0 {
                    up.state = TaskState::Active;
                    unblocked_cost = Some(up.cost);
                }
            }
        }
        let orphaned_empty = self
            .upstream
            .get(uidx)
            .map(|up| up.state == TaskState::Empty && up.downstream.iter().all(|d| self.downstream.get(*d).is_none()))
            .unwrap_or(false);
        if orphaned_empty {
            if let Some(task) = self.upstream.remove(uidx) {
                self.index.remove(&task.key);
            }
        }
        unblocked_cost
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::task::TaskKind;

    fn gc_key(target: u64) -> TaskKey {
        TaskKey { kind: TaskKind::VPRowListGc, target }
    }

    fn defrag_key(target: u64) -> TaskKey {
        TaskKey { kind: TaskKind::VPRowListDefrag, target }
    }

    #[test]
    fn downstream_created_before_upstream_synthesizes_empty_holder() {
        let mut dag = Dag::new();
        let d = dag.create_downstream(defrag_key(1), gc_key(1), 10).unwrap();
        assert!(matches!(d, TaskRef::Downstream(_)));
        let upstream_ref = dag.lookup(gc_key(1)).unwrap();
        let TaskRef::Upstream(uidx) = upstream_ref else { panic!("expected upstream") };
        assert_eq!(dag.get_upstream(uidx).unwrap().state, TaskState::Empty);
    }

    #[test]
    fn creating_upstream_over_empty_holder_substantiates_it() {
        let mut dag = Dag::new();
        dag.create_downstream(defrag_key(1), gc_key(1), 10).unwrap();
        let up = dag.create_upstream(gc_key(1), 50);
        let TaskRef::Upstream(uidx) = up else { panic!() };
        assert_eq!(dag.get_upstream(uidx).unwrap().state, TaskState::Active);
        assert_eq!(dag.get_upstream(uidx).unwrap().downstream.len(), 1);
    }

    #[test]
    fn creating_upstream_invalidates_active_downstream() {
        let mut dag = Dag::new();
        let d = dag.create_downstream(defrag_key(1), gc_key(1), 10).unwrap();
        dag.create_upstream(gc_key(1), 50);
        let TaskRef::Downstream(didx) = d else { panic!() };
        assert_eq!(dag.get_downstream(didx).unwrap().state, TaskState::Invalid);
    }

    #[test]
    fn creating_upstream_blocks_on_pushed_downstream() {
        let mut dag = Dag::new();
        let d = dag.create_downstream(defrag_key(1), gc_key(1), 10).unwrap();
        dag.mark_pushed(d);
        let up = dag.create_upstream(gc_key(1), 50);
        let TaskRef::Upstream(uidx) = up else { panic!() };
        assert_eq!(dag.get_upstream(uidx).unwrap().state, TaskState::Blocked);
        assert_eq!(dag.get_upstream(uidx).unwrap().blocked_count, 1);

        let unblocked_cost = dag.complete(d);
        assert_eq!(unblocked_cost, Some(50));
        assert_eq!(dag.get_upstream(uidx).unwrap().state, TaskState::Active);
    }

    #[test]
    fn second_downstream_dropped_once_upstream_is_active() {
        let mut dag = Dag::new();
        dag.create_upstream(gc_key(1), 50);
        let result = dag.create_downstream(defrag_key(1), gc_key(1), 10);
        assert!(result.is_none());
    }

    #[test]
    fn empty_upstream_is_deleted_once_its_only_downstream_completes() {
        let mut dag = Dag::new();
        let d = dag.create_downstream(defrag_key(1), gc_key(1), 10).unwrap();
        let uidx = match dag.lookup(gc_key(1)).unwrap() {
            TaskRef::Upstream(i) => i,
            _ => panic!(),
        };
        dag.mark_pushed(d);
        dag.complete(d);
        assert!(dag.get_upstream(uidx).is_none());
        assert!(dag.lookup(gc_key(1)).is_none());
    }
}
