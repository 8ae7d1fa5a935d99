mod clock;
mod coordinator;
mod id;
mod plan;
mod rct;
mod running_trx_list;
mod tst;
mod worker;

pub use clock::{best_skew_estimate, decode_timestamp, encode_timestamp, estimate_skew_ns, Clock, TIMESTAMP_MACHINE_ID_BITS};
pub use coordinator::{Coordinator, RctQueryRequest, TimestampRequest, TstWriteRequest};
pub use id::{TrxId, QID_BITS, TRX_MASK};
pub use plan::{QueryStep, StepResult, TransactionPlan};
pub use rct::RecentlyCommittedTable;
pub use running_trx_list::{MinBtAdvert, RunningTrxList};
pub use tst::{Phase, TransactionStatusTable, DEFAULT_ASSOCIATIVITY};
pub use worker::{IsolationLevel, NullExecutor, NullPeerFanout, Outcome, PeerRctFanout, QueryExecutor, Worker};
