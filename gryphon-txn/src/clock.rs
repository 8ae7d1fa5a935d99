// Distributed clock (§4.1). `now()` issues 64-bit timestamps: high bits
// are nanoseconds since a shared origin, low `TIMESTAMP_MACHINE_ID_BITS`
// bits are the allocating worker's id, giving total order across
// workers once calibration has converged. Calibration only ever moves
// the local offset upward, so timestamps already issued never become
// reachable again by a later, smaller one (§4.1's monotonic-adjustment
// rule).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub const TIMESTAMP_MACHINE_ID_BITS: u32 = 10;
const MACHINE_ID_MASK: u64 = (1 << TIMESTAMP_MACHINE_ID_BITS) - 1;

pub fn encode_timestamp(ns: u64, worker_id: u16) -> u64 {
    (ns << TIMESTAMP_MACHINE_ID_BITS) | (worker_id as u64 & MACHINE_ID_MASK)
}

pub fn decode_timestamp(ts: u64) -> (u64, u16) {
    (ts >> TIMESTAMP_MACHINE_ID_BITS, (ts & MACHINE_ID_MASK) as u16)
}

pub struct Clock {
    worker_id: u16,
    epoch: Instant,
    epoch_wall_ns: u64,
    /// Only ever increased (§4.1); enforced with a `fetch_max`-style CAS
    /// loop rather than a lock.
    offset_ns: AtomicI64,
    /// Last raw (pre-worker-tag) timestamp issued, so repeated calls in
    /// the same nanosecond still return strictly increasing values.
    last_issued: AtomicU64,
}

impl Clock {
    pub fn new(worker_id: u16) -> Self {
        let epoch = Instant::now();
        let epoch_wall_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_nanos() as u64;
        Clock {
            worker_id,
            epoch,
            epoch_wall_ns,
            offset_ns: AtomicI64::new(0),
            last_issued: AtomicU64::new(0),
        }
    }

    fn local_wall_ns(&self) -> u64 {
        self.epoch_wall_ns + self.epoch.elapsed().as_nanos() as u64
    }

    /// Raw nanosecond reading after the calibration offset, before the
    /// worker-id tag and monotonicity enforcement are applied. Exposed
    /// for the calibration protocol, which samples this directly rather
    /// than going through `now()`'s monotonic counter.
    pub fn raw_ns(&self) -> u64 {
        let offset = self.offset_ns.load(Ordering::Relaxed);
        (self.local_wall_ns() as i64 + offset) as u64
    }

    /// Invariant: successive calls on the same worker return strictly
    /// increasing values (§4.1, invariant 1 in §8).
    pub fn now(&self) -> u64 {
        let candidate = encode_timestamp(self.raw_ns(), self.worker_id);
        let mut prev = self.last_issued.load(Ordering::Relaxed);
        loop {
            let next = candidate.max(prev + 1);
            match self
                .last_issued
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    /// Moves the offset up to at least `target_offset_ns`, never down.
    pub fn bump_offset_to_at_least(&self, target_offset_ns: i64) {
        let mut cur = self.offset_ns.load(Ordering::Relaxed);
        while target_offset_ns > cur {
            match self.offset_ns.compare_exchange_weak(
                cur,
                target_offset_ns,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn offset_ns(&self) -> i64 {
        self.offset_ns.load(Ordering::Relaxed)
    }
}

/// One ping-pong sample of the calibration protocol (§4.1 step 2): the
/// coordinator's send time, the peer's echoed local raw-ns reading, and
/// the coordinator's receive time, all pre-worker-tag nanoseconds.
/// Returns `(round_trip_ns, peer_skew_estimate_ns)` assuming symmetric
/// network latency.
pub fn estimate_skew_ns(send_ns: u64, peer_echo_ns: u64, recv_ns: u64) -> (u64, i64) {
    let rtt = recv_ns.saturating_sub(send_ns);
    let midpoint = send_ns + rtt / 2;
    (rtt, peer_echo_ns as i64 - midpoint as i64)
}

/// Selects the best (lowest round-trip) fraction of a calibration batch
/// and averages their skew estimates (§4.1 "select the lowest-latency
/// sample quantile, default top 5%").
pub fn best_skew_estimate(samples: &[(u64, i64)], quantile: f64) -> Option<i64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by_key(|(rtt, _)| *rtt);
    let keep = ((sorted.len() as f64 * quantile).ceil() as usize).clamp(1, sorted.len());
    let sum: i64 = sorted[..keep].iter().map(|(_, skew)| *skew).sum();
    Some(sum / keep as i64)
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn now_is_strictly_increasing() {
        let clock = Clock::new(1);
        let mut last = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn encode_decode_round_trips() {
        let ts = encode_timestamp(123_456_789, 42);
        let (ns, worker) = decode_timestamp(ts);
        assert_eq!(ns, 123_456_789);
        assert_eq!(worker, 42);
    }

    #[test]
    fn decoding_preserves_order_for_increasing_ns_same_worker() {
        let a = encode_timestamp(100, 5);
        let b = encode_timestamp(200, 5);
        assert!(a < b);
    }

    #[test]
    fn offset_only_moves_up() {
        let clock = Clock::new(0);
        clock.bump_offset_to_at_least(500);
        assert_eq!(clock.offset_ns(), 500);
        clock.bump_offset_to_at_least(100);
        assert_eq!(clock.offset_ns(), 500);
        clock.bump_offset_to_at_least(900);
        assert_eq!(clock.offset_ns(), 900);
    }

    #[test]
    fn skew_estimate_is_zero_for_symmetric_synchronized_clocks() {
        let (rtt, skew) = estimate_skew_ns(1000, 1050, 1100);
        assert_eq!(rtt, 100);
        assert_eq!(skew, 0);
    }

    #[test]
    fn best_skew_estimate_prefers_low_latency_samples() {
        let samples = vec![(1000, 40), (10, 5), (20, 7), (5000, -100)];
        let best = best_skew_estimate(&samples, 0.5).unwrap();
        // Top 50% by rtt are (5,10) and (7,20); average of 5 and 7 is 6.
        assert_eq!(best, 6);
    }
}
