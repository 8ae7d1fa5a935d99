// TransactionPlan (§3, opaque to the core): the worker's own bookkeeping
// for an in-flight transaction. The query steps themselves belong to
// the out-of-scope parser/execution-plan subsystem (§1); the core only
// needs enough of the shape to route results and know when to advance
// the state machine (§4.7).

use gryphon_net::NodeId;

use crate::id::TrxId;

#[derive(Clone, Debug)]
pub struct QueryStep {
    pub index: usize,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct StepResult {
    pub index: usize,
    pub payload: Vec<u8>,
    pub aborted: bool,
}

#[derive(Clone, Debug)]
pub struct TransactionPlan {
    pub trx_id: TrxId,
    pub client: NodeId,
    pub start: u64,
    pub steps: Vec<QueryStep>,
    pub results: Vec<StepResult>,
}

impl TransactionPlan {
    pub fn new(trx_id: TrxId, client: NodeId, steps: Vec<QueryStep>) -> Self {
        TransactionPlan {
            trx_id,
            client,
            start: 0,
            steps,
            results: Vec::new(),
        }
    }

    pub fn record_result(&mut self, result: StepResult) {
        self.results.push(result);
    }

    pub fn all_steps_answered(&self) -> bool {
        self.results.len() >= self.steps.len()
    }

    pub fn any_aborted(&self) -> bool {
        self.results.iter().any(|r| r.aborted)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plan_tracks_completion() {
        let trx_id = TrxId::new(1, 0, 1, false);
        let mut plan = TransactionPlan::new(trx_id, NodeId(0), vec![QueryStep { index: 0, payload: vec![] }]);
        assert!(!plan.all_steps_answered());
        plan.record_result(StepResult {
            index: 0,
            payload: vec![],
            aborted: false,
        });
        assert!(plan.all_steps_answered());
        assert!(!plan.any_aborted());
    }
}
