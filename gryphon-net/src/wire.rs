// Wire formats (§6 of the spec): the query message carried over the
// per-thread mailbox, and the three notification payloads carried over
// the separate control-plane (UD) channel.

use serde::{Deserialize, Serialize};

/// Identifies a worker process. Rank 0 is always the master (§6 "Node
/// descriptor file").
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Identifies one of a worker's local executor-thread slots. Also used,
/// shifted into the reserved RDMA-helper-thread range (§5), for the
/// coordinator's internal threads.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Tid(pub u32);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StepType {
    Init = 0,
    QueryResult = 1,
    ValidationResult = 2,
    Abort = 3,
}

/// `[sender_nid, recver_nid, recver_tid, step_type, qid, payload...]`
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct QueryMsg {
    pub sender_nid: NodeId,
    pub recver_nid: NodeId,
    pub recver_tid: Tid,
    pub step_type: StepType,
    pub qid: u64,
    pub payload: Vec<u8>,
}

impl QueryMsg {
    pub fn to_bytes(&self) -> gryphon_base::Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(buf: &[u8]) -> gryphon_base::Result<Self> {
        Ok(rmp_serde::from_slice(buf)?)
    }
}

/// `type ∈ {RCT_TIDS=0, UPDATE_STATUS=1, QUERY_RCT=2}`
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    /// `(trx_id, [trx_ids])`
    RctTids { trx_id: u64, trx_ids: Vec<u64> },
    /// `(sender_nid, trx_id, phase_i, is_readonly)`
    UpdateStatus {
        sender_nid: NodeId,
        trx_id: u64,
        phase: i32,
        is_readonly: bool,
    },
    /// `(sender_nid, trx_id, bt, ct)`
    QueryRct {
        sender_nid: NodeId,
        trx_id: u64,
        bt: u64,
        ct: u64,
    },
}

impl Notification {
    pub fn type_tag(&self) -> i32 {
        match self {
            Notification::RctTids { .. } => 0,
            Notification::UpdateStatus { .. } => 1,
            Notification::QueryRct { .. } => 2,
        }
    }

    pub fn to_bytes(&self) -> gryphon_base::Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(buf: &[u8]) -> gryphon_base::Result<Self> {
        Ok(rmp_serde::from_slice(buf)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn query_msg_round_trips() {
        let m = QueryMsg {
            sender_nid: NodeId(1),
            recver_nid: NodeId(2),
            recver_tid: Tid(3),
            step_type: StepType::Init,
            qid: 42,
            payload: vec![1, 2, 3, 4, 5],
        };
        let bytes = m.to_bytes().unwrap();
        let back = QueryMsg::from_bytes(&bytes).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn notification_type_tags_match_spec() {
        assert_eq!(
            Notification::RctTids {
                trx_id: 1,
                trx_ids: vec![]
            }
            .type_tag(),
            0
        );
        assert_eq!(
            Notification::UpdateStatus {
                sender_nid: NodeId(0),
                trx_id: 1,
                phase: 0,
                is_readonly: false
            }
            .type_tag(),
            1
        );
        assert_eq!(
            Notification::QueryRct {
                sender_nid: NodeId(0),
                trx_id: 1,
                bt: 0,
                ct: 0
            }
            .type_tag(),
            2
        );
    }

    #[test]
    fn notification_round_trips() {
        let n = Notification::QueryRct {
            sender_nid: NodeId(5),
            trx_id: 99,
            bt: 100,
            ct: 200,
        };
        let bytes = n.to_bytes().unwrap();
        let back = Notification::from_bytes(&bytes).unwrap();
        assert_eq!(n, back);
    }
}
