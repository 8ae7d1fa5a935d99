// Coordinator (§4.6). Owns timestamp allocation, trx-id assignment, and
// the dedicated threads that keep the TST and RCT in sync with remote
// peers over the mailbox's notification channel. Each queue in §4.6 is
// a `crossbeam_channel`, matching the teacher's `WaitAndPop`-over-a-
// condvar idiom (§5.1) with a blocking `recv`/non-blocking `try_recv`
// pair rather than a hand-rolled condition variable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use gryphon_base::{Result, ShutdownSignal};
use gryphon_net::{Mailbox, Notification, NodeId};
use tracing::{debug, warn};

use crate::clock::{self, Clock};
use crate::id::TrxId;
use crate::rct::RecentlyCommittedTable;
use crate::tst::{Phase, TransactionStatusTable};

pub struct TimestampRequest {
    pub reply: Sender<u64>,
}

pub struct TstWriteRequest {
    pub trx_id: TrxId,
    pub phase: Phase,
    pub commit_time: Option<u64>,
}

pub struct RctQueryRequest {
    pub bt: u64,
    pub ct: u64,
    pub reply: Sender<Vec<TrxId>>,
}

pub struct Coordinator {
    pub rank: u32,
    pub comm_size: u32,
    pub clock: Arc<Clock>,
    pub tst: Arc<TransactionStatusTable>,
    pub rct: Arc<RecentlyCommittedTable>,
    mailbox: Arc<dyn Mailbox>,
    counter: AtomicU64,
    ts_requests: (Sender<TimestampRequest>, Receiver<TimestampRequest>),
    tst_write_requests: (Sender<TstWriteRequest>, Receiver<TstWriteRequest>),
    rct_query_requests: (Sender<RctQueryRequest>, Receiver<RctQueryRequest>),
}

impl Coordinator {
    pub fn new(
        rank: u32,
        comm_size: u32,
        clock: Arc<Clock>,
        tst: Arc<TransactionStatusTable>,
        rct: Arc<RecentlyCommittedTable>,
        mailbox: Arc<dyn Mailbox>,
    ) -> Self {
        Coordinator {
            rank,
            comm_size,
            clock,
            tst,
            rct,
            mailbox,
            counter: AtomicU64::new(0),
            ts_requests: crossbeam_channel::unbounded(),
            tst_write_requests: crossbeam_channel::unbounded(),
            rct_query_requests: crossbeam_channel::unbounded(),
        }
    }

    /// `trx_id = TRX_MASK | ((next_counter++) * comm_size + my_rank) << QID_BITS` (§4.6).
    pub fn next_trx_id(&self, readonly: bool) -> TrxId {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        TrxId::new(counter, self.rank, self.comm_size, readonly)
    }

    pub fn request_timestamp(&self) -> u64 {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.ts_requests
            .0
            .send(TimestampRequest { reply: tx })
            .expect("timestamp thread channel closed");
        rx.recv().expect("timestamp thread dropped reply sender")
    }

    pub fn request_tst_write(&self, trx_id: TrxId, phase: Phase, commit_time: Option<u64>) {
        let _ = self.tst_write_requests.0.send(TstWriteRequest {
            trx_id,
            phase,
            commit_time,
        });
    }

    pub fn request_rct_query(&self, bt: u64, ct: u64) -> Vec<TrxId> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let _ = self.rct_query_requests.0.send(RctQueryRequest { bt, ct, reply: tx });
        rx.recv().unwrap_or_default()
    }

    /// Single-threaded consumer of the request queue; calls
    /// `Clock::now()` and replies (§4.6 "Timestamp thread").
    pub fn spawn_timestamp_thread(self: &Arc<Self>, shutdown: ShutdownSignal) -> std::thread::JoinHandle<()> {
        let this = self.clone();
        std::thread::spawn(move || {
            let rx = this.ts_requests.1.clone();
            loop {
                match rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(req) => {
                        let ts = this.clock.now();
                        let _ = req.reply.send(ts);
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        if shutdown.is_triggered() {
                            break;
                        }
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                }
            }
        })
    }

    /// Applies `modify_status` requests, local or remote-originated
    /// (§4.6 "TST-write thread").
    pub fn spawn_tst_write_thread(self: &Arc<Self>, shutdown: ShutdownSignal) -> std::thread::JoinHandle<()> {
        let this = self.clone();
        std::thread::spawn(move || {
            let rx = this.tst_write_requests.1.clone();
            loop {
                match rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(req) => {
                        if !this.tst.modify_status(req.trx_id, req.phase, req.commit_time) {
                            debug!(target: "gryphon::coordinator", trx_id = req.trx_id.raw(), "tst write missed slot (raced with GC)");
                        }
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        if shutdown.is_triggered() {
                            break;
                        }
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                }
            }
        })
    }

    /// Pops an RCTQuery and replies with `(type=RCT_TIDS, trx_id, [trx_ids])`
    /// (§4.6 "RCT-query server thread").
    pub fn spawn_rct_query_server_thread(self: &Arc<Self>, shutdown: ShutdownSignal) -> std::thread::JoinHandle<()> {
        let this = self.clone();
        std::thread::spawn(move || loop {
            match this.rct_query_requests.1.recv_timeout(Duration::from_millis(100)) {
                Ok(req) => {
                    let ids = this.rct.query(req.bt, req.ct);
                    let _ = req.reply.send(ids);
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    if shutdown.is_triggered() {
                        break;
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        })
    }

    /// Notification-channel loop answering remote `QueryRct` requests
    /// and applying remote `UpdateStatus` requests, the cross-worker
    /// counterparts of the two threads above.
    pub fn spawn_notification_loop(self: &Arc<Self>, self_nid: NodeId, shutdown: ShutdownSignal) -> std::thread::JoinHandle<()> {
        let this = self.clone();
        std::thread::spawn(move || loop {
            if shutdown.is_triggered() {
                break;
            }
            match this.mailbox.try_recv_notification() {
                Ok(Some(Notification::QueryRct { sender_nid, trx_id, bt, ct })) => {
                    let ids = this.rct.query(bt, ct);
                    let reply = Notification::RctTids { trx_id, trx_ids: ids.iter().map(|id| id.raw()).collect() };
                    if let Err(e) = this.mailbox.send_notification(sender_nid, &reply) {
                        warn!(target: "gryphon::coordinator", error = %format!("{e:?}"), "failed to reply to RCT query");
                    }
                }
                Ok(Some(Notification::UpdateStatus { trx_id, phase, .. })) => {
                    let phase = match phase {
                        0 => Phase::Processing,
                        1 => Phase::Validating,
                        2 => Phase::Committed,
                        _ => Phase::Abort,
                    };
                    this.request_tst_write(TrxId(trx_id), phase, None);
                }
                Ok(Some(Notification::RctTids { .. })) | Ok(None) => {
                    std::thread::sleep(Duration::from_micros(200));
                }
                Err(e) => {
                    warn!(target: "gryphon::coordinator", error = %format!("{e:?}"), "notification loop error");
                }
            }
            let _ = self_nid;
        })
    }

    /// Calibration round against one peer (§4.1 step 2, §4.6 "Calibration
    /// thread"): reserved Tid carries an 8-byte raw-ns ping; the peer's
    /// own calibration loop answers on the same Tid with its own raw-ns
    /// reading.
    pub fn calibrate_against(&self, samples: &[(u64, u64, u64)]) {
        // samples are (send_ns, peer_echo_ns, recv_ns) triples already
        // collected by the transport-specific ping-pong; this method
        // performs the quantile-selection and offset-bump arithmetic
        // that is identical regardless of transport.
        let estimates: Vec<(u64, i64)> = samples
            .iter()
            .map(|&(send, echo, recv)| clock::estimate_skew_ns(send, echo, recv))
            .collect();
        if let Some(best) = clock::best_skew_estimate(&estimates, 0.05) {
            let target = self.clock.offset_ns() + best;
            self.clock.bump_offset_to_at_least(target);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use gryphon_net::RdmaCluster;
    use std::time::Duration as StdDuration;

    fn make_coordinator(rank: u32) -> Arc<Coordinator> {
        let cluster = RdmaCluster::new(1, 4);
        let mailbox = Arc::new(cluster.mailbox_for(NodeId(0), ShutdownSignal::new()));
        Arc::new(Coordinator::new(
            rank,
            1,
            Arc::new(Clock::new(rank as u16)),
            Arc::new(TransactionStatusTable::new(256, 8)),
            Arc::new(RecentlyCommittedTable::new()),
            mailbox,
        ))
    }

    #[test]
    fn trx_ids_are_unique_per_worker_counter() {
        let coordinator = make_coordinator(0);
        let a = coordinator.next_trx_id(false);
        let b = coordinator.next_trx_id(false);
        assert_ne!(a, b);
    }

    #[test]
    fn timestamp_thread_serves_requests() {
        let coordinator = make_coordinator(0);
        let shutdown = ShutdownSignal::new();
        let handle = coordinator.spawn_timestamp_thread(shutdown.clone());
        let ts = coordinator.request_timestamp();
        assert!(ts > 0);
        shutdown.trigger(&gryphon_base::Fatal::Config("test teardown".into()));
        handle.join().unwrap();
    }

    #[test]
    fn tst_write_thread_applies_remote_requests() {
        let coordinator = make_coordinator(0);
        let trx_id = coordinator.next_trx_id(false);
        coordinator.tst.insert(trx_id, 10, false).unwrap();
        let shutdown = ShutdownSignal::new();
        let handle = coordinator.spawn_tst_write_thread(shutdown.clone());
        coordinator.request_tst_write(trx_id, Phase::Validating, Some(20));
        std::thread::sleep(StdDuration::from_millis(50));
        assert_eq!(coordinator.tst.query_ct(trx_id), Some(20));
        shutdown.trigger(&gryphon_base::Fatal::Config("test teardown".into()));
        handle.join().unwrap();
    }

    #[test]
    fn calibrate_against_moves_offset_toward_estimated_skew() {
        let coordinator = make_coordinator(0);
        let before = coordinator.clock.offset_ns();
        coordinator.calibrate_against(&[(1000, 6000, 2000)]);
        assert!(coordinator.clock.offset_ns() > before);
    }
}
