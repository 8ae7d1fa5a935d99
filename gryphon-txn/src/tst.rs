// Transaction Status Table (§4.2, §4.2.1). A fixed-size, open-addressed
// hash table: the first 80% of buckets are the main region, addressed
// directly by `home_bucket(trx_id)`; the remaining 20% is an overflow
// region reached by chaining off a bucket's last slot. Slots are never
// moved, only marked erased and reused by GC.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use gryphon_base::{Fatal, Result};
use parking_lot::Mutex;

use crate::id::{TrxId, QID_BITS};

pub const DEFAULT_ASSOCIATIVITY: usize = 8;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(u8)]
pub enum Phase {
    Processing = 0,
    Validating = 1,
    Committed = 2,
    Abort = 3,
}

impl Phase {
    fn from_u8(v: u8) -> Option<Phase> {
        match v {
            0 => Some(Phase::Processing),
            1 => Some(Phase::Validating),
            2 => Some(Phase::Committed),
            3 => Some(Phase::Abort),
            _ => None,
        }
    }
}

/// One slot's state, packed so phase transitions are visible to lockless
/// readers without tearing: `occupied`/`erased`/`phase` live in a single
/// atomic word, `commit_time` in a second. Readers never need a lock
/// because phase only moves forward and `commit_time` is only read once
/// `phase >= Validating` has been observed (§4.2 "readers take no locks").
struct Slot {
    trx_id: AtomicU64,
    /// bits 0-1: phase; bit 2: occupied; bit 3: erased.
    state: AtomicU64,
    commit_time: AtomicU64,
    /// 0 means "no overflow bucket yet"; otherwise the index (1-based)
    /// of this bucket's overflow chain continuation, only meaningful on
    /// a bucket's last slot.
    overflow_next: AtomicU64,
}

impl Slot {
    fn new() -> Self {
        Slot {
            trx_id: AtomicU64::new(0),
            state: AtomicU64::new(0),
            commit_time: AtomicU64::new(0),
            overflow_next: AtomicU64::new(0),
        }
    }

    fn occupied(&self) -> bool {
        self.state.load(Ordering::Acquire) & 0b100 != 0
    }

    fn erased(&self) -> bool {
        self.state.load(Ordering::Acquire) & 0b1000 != 0
    }

    fn phase(&self) -> Phase {
        Phase::from_u8((self.state.load(Ordering::Acquire) & 0b11) as u8).unwrap_or(Phase::Processing)
    }
}

struct GcEntry {
    trx_id: TrxId,
    bt_or_et: u64,
}

/// One of the two lock-free GC candidate lists kept per TST (§3.1):
/// readonly transactions are keyed by begin-time, non-readonly ones are
/// recorded on commit/abort keyed by end-time. Modeled here as a
/// mutex-guarded `VecDeque` rather than a real lock-free singly linked
/// list, since the spec's correctness contract (stop after < 3 nodes
/// remain, pop only strictly-less-than entries) does not depend on the
/// specific concurrent data structure.
#[derive(Default)]
struct GcCandidateList {
    entries: Mutex<std::collections::VecDeque<GcEntry>>,
}

impl GcCandidateList {
    fn push(&self, trx_id: TrxId, bt_or_et: u64) {
        self.entries.lock().push_back(GcEntry { trx_id, bt_or_et });
    }

    /// Pops entries with `bt_or_et < horizon`, stopping once fewer than 3
    /// nodes remain (§4.2 "the walk stops when fewer than 3 nodes
    /// remain").
    fn erase_below(&self, horizon: u64, out: &mut Vec<TrxId>) {
        let mut entries = self.entries.lock();
        while entries.len() >= 3 {
            let Some(front) = entries.front() else { break };
            if front.bt_or_et >= horizon {
                break;
            }
            let entry = entries.pop_front().unwrap();
            out.push(entry.trx_id);
        }
    }
}

pub struct TransactionStatusTable {
    main_buckets: usize,
    overflow_buckets: usize,
    associativity: usize,
    slots: Vec<Slot>,
    overflow_bump: AtomicUsize,
    readonly_gc: GcCandidateList,
    non_readonly_gc: GcCandidateList,
}

impl TransactionStatusTable {
    /// `total_slots` is the configured table size (bytes / slot-size in
    /// a real deployment); 80% main, 20% overflow per §3.
    pub fn new(total_slots: usize, associativity: usize) -> Self {
        let main_buckets = ((total_slots * 8 / 10) / associativity).max(1);
        let overflow_buckets = ((total_slots * 2 / 10) / associativity).max(1);
        let total_buckets = main_buckets + overflow_buckets;
        let slots = (0..total_buckets * associativity).map(|_| Slot::new()).collect();
        TransactionStatusTable {
            main_buckets,
            overflow_buckets,
            associativity,
            slots,
            overflow_bump: AtomicUsize::new(0),
            readonly_gc: GcCandidateList::default(),
            non_readonly_gc: GcCandidateList::default(),
        }
    }

    fn home_bucket(&self, trx_id: TrxId) -> usize {
        (trx_id.bucket_key() as usize) % self.main_buckets
    }

    fn bucket_slots(&self, bucket: usize) -> &[Slot] {
        let start = bucket * self.associativity;
        &self.slots[start..start + self.associativity]
    }

    /// `insert(trx_id, bt, readonly)` (§4.2). Returns `Fatal::TstOutOfSpace`
    /// once the overflow region itself is exhausted (§4.2.1, §7 item 4).
    pub fn insert(&self, trx_id: TrxId, bt: u64, readonly: bool) -> Result<()> {
        let mut bucket = self.home_bucket(trx_id);
        loop {
            let slots = self.bucket_slots(bucket);
            for (i, slot) in slots.iter().enumerate() {
                if !slot.occupied() || slot.erased() {
                    slot.trx_id.store(trx_id.raw(), Ordering::Relaxed);
                    slot.commit_time.store(0, Ordering::Relaxed);
                    slot.state.store(0b100, Ordering::Release); // occupied, Processing
                    if readonly {
                        self.readonly_gc.push(trx_id, bt);
                    }
                    let _ = i;
                    return Ok(());
                }
            }
            let overflow_slot = &slots[self.associativity - 1];
            let next = overflow_slot.overflow_next.load(Ordering::Acquire);
            if next != 0 {
                bucket = self.main_buckets + (next as usize - 1);
                continue;
            }
            if self.overflow_bump.load(Ordering::Relaxed) >= self.overflow_buckets {
                return Err(gryphon_base::err(format!("{:?}", Fatal::TstOutOfSpace)));
            }
            let new_overflow = self.overflow_bump.fetch_add(1, Ordering::AcqRel);
            if new_overflow >= self.overflow_buckets {
                return Err(gryphon_base::err(format!("{:?}", Fatal::TstOutOfSpace)));
            }
            // First writer wins; a loser's freshly bumped bucket is simply
            // never linked-to (§4.2.1) and stays unused.
            let _ = overflow_slot.overflow_next.compare_exchange(
                0,
                (new_overflow + 1) as u64,
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
            bucket = self.main_buckets + new_overflow;
        }
    }

    fn find_slot(&self, trx_id: TrxId) -> Option<&Slot> {
        let mut bucket = self.home_bucket(trx_id);
        loop {
            let slots = self.bucket_slots(bucket);
            for slot in slots {
                if slot.occupied() && !slot.erased() && slot.trx_id.load(Ordering::Acquire) == trx_id.raw() {
                    return Some(slot);
                }
            }
            let overflow_slot = &slots[self.associativity - 1];
            let next = overflow_slot.overflow_next.load(Ordering::Acquire);
            if next == 0 {
                return None;
            }
            bucket = self.main_buckets + (next as usize - 1);
        }
    }

    /// Legal transitions only (§3): Processing -> Validating (sets
    /// commit_time atomically), {Processing,Validating} -> {Committed,
    /// Abort}. Returns `false` (not an error) if the slot is missing —
    /// the caller must tolerate races with GC (§4.2).
    pub fn modify_status(&self, trx_id: TrxId, new_phase: Phase, commit_time: Option<u64>) -> bool {
        let Some(slot) = self.find_slot(trx_id) else {
            return false;
        };
        // Publish commit_time before the phase CAS below, not after: a
        // lockless query_ct reader only ever loads commit_time once it
        // has observed Validating, so the store must happen-before the
        // CAS's Release, not race against it.
        if new_phase == Phase::Validating {
            if let Some(ct) = commit_time {
                slot.commit_time.store(ct, Ordering::Release);
            }
        }
        let mut cur = slot.state.load(Ordering::Acquire);
        loop {
            let cur_phase = Phase::from_u8((cur & 0b11) as u8).unwrap_or(Phase::Processing);
            let legal = matches!(
                (cur_phase, new_phase),
                (Phase::Processing, Phase::Validating)
                    | (Phase::Processing, Phase::Abort)
                    | (Phase::Validating, Phase::Committed)
                    | (Phase::Validating, Phase::Abort)
            );
            if !legal {
                return false;
            }
            let next = (cur & !0b11) | (new_phase as u64);
            match slot
                .state
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn query_status(&self, trx_id: TrxId) -> Option<Phase> {
        self.find_slot(trx_id).map(|s| s.phase())
    }

    pub fn query_ct(&self, trx_id: TrxId) -> Option<u64> {
        let slot = self.find_slot(trx_id)?;
        let phase = slot.phase();
        if phase == Phase::Validating || phase == Phase::Committed {
            Some(slot.commit_time.load(Ordering::Acquire))
        } else {
            None
        }
    }

    /// Records a non-readonly transaction's end-time on its own GC list
    /// (§3.1); called once the transaction reaches Committed or Abort.
    pub fn record_end_time(&self, trx_id: TrxId, end_time: u64) {
        self.non_readonly_gc.push(trx_id, end_time);
    }

    /// `erase_trx_via_min_bt` (§4.2): erases GC-list entries strictly
    /// below `global_min_bt`, marking their slots erased and returning
    /// the non-readonly trx_ids for secondary-index cleanup.
    pub fn erase_trx_via_min_bt(&self, global_min_bt: u64) -> Vec<TrxId> {
        let mut erased = Vec::new();
        let mut readonly_erased = Vec::new();
        self.readonly_gc.erase_below(global_min_bt, &mut readonly_erased);
        self.non_readonly_gc.erase_below(global_min_bt, &mut erased);
        for trx_id in readonly_erased.iter().chain(erased.iter()) {
            if let Some(slot) = self.find_slot(*trx_id) {
                slot.state.fetch_or(0b1000, Ordering::AcqRel);
            }
        }
        erased
    }
}

#[allow(dead_code)]
fn assert_qid_bits_not_zero() {
    debug_assert!(QID_BITS > 0);
}

#[cfg(test)]
mod test {
    use super::*;

    fn rw(counter: u64) -> TrxId {
        TrxId::new(counter, 0, 1, false)
    }

    fn ro(counter: u64) -> TrxId {
        TrxId::new(counter, 0, 1, true)
    }

    #[test]
    fn insert_then_query_status_returns_processing() {
        let tst = TransactionStatusTable::new(256, DEFAULT_ASSOCIATIVITY);
        let id = rw(1);
        tst.insert(id, 100, false).unwrap();
        assert_eq!(tst.query_status(id), Some(Phase::Processing));
    }

    #[test]
    fn legal_transition_sequence_succeeds() {
        let tst = TransactionStatusTable::new(256, DEFAULT_ASSOCIATIVITY);
        let id = rw(2);
        tst.insert(id, 100, false).unwrap();
        assert!(tst.modify_status(id, Phase::Validating, Some(200)));
        assert_eq!(tst.query_ct(id), Some(200));
        assert!(tst.modify_status(id, Phase::Committed, None));
        assert_eq!(tst.query_status(id), Some(Phase::Committed));
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let tst = TransactionStatusTable::new(256, DEFAULT_ASSOCIATIVITY);
        let id = rw(3);
        tst.insert(id, 100, false).unwrap();
        assert!(!tst.modify_status(id, Phase::Committed, None));
        assert_eq!(tst.query_status(id), Some(Phase::Processing));
    }

    #[test]
    fn modify_missing_slot_returns_false() {
        let tst = TransactionStatusTable::new(256, DEFAULT_ASSOCIATIVITY);
        assert!(!tst.modify_status(rw(999), Phase::Validating, Some(1)));
    }

    #[test]
    fn overflow_chain_handles_more_inserts_than_one_bucket_holds() {
        let tst = TransactionStatusTable::new(16, 2);
        // main_buckets ~ (16*8/10)/2 = 6; force collisions into bucket 0
        // by using ids that all hash to the same bucket.
        let mut ids = Vec::new();
        for i in 0..20u64 {
            let id = TrxId((i << QID_BITS) | TRX_MASK_FOR_TEST);
            tst.insert(id, i, false).unwrap();
            ids.push(id);
        }
        for id in ids {
            assert_eq!(tst.query_status(id), Some(Phase::Processing));
        }
    }

    const TRX_MASK_FOR_TEST: u64 = 1 << 63;

    #[test]
    fn erase_below_horizon_marks_slots_erased() {
        let tst = TransactionStatusTable::new(256, DEFAULT_ASSOCIATIVITY);
        let ids: Vec<TrxId> = (0..5).map(rw).collect();
        for (i, id) in ids.iter().enumerate() {
            tst.insert(*id, 0, false).unwrap();
            tst.modify_status(*id, Phase::Validating, Some(10));
            tst.record_end_time(*id, 100 + i as u64);
        }
        let erased = tst.erase_trx_via_min_bt(102);
        assert!(!erased.is_empty());
        for id in &erased {
            assert_eq!(tst.query_status(*id), None);
        }
    }

    #[test]
    fn readonly_transactions_use_the_readonly_gc_list() {
        let tst = TransactionStatusTable::new(256, DEFAULT_ASSOCIATIVITY);
        let ids: Vec<TrxId> = (0..5).map(ro).collect();
        for (i, id) in ids.iter().enumerate() {
            tst.insert(*id, i as u64, true).unwrap();
        }
        let erased = tst.erase_trx_via_min_bt(3);
        // non_readonly list stays empty, so erase_trx_via_min_bt's return
        // value (only non-readonly ids) is empty even though readonly
        // slots were erased.
        assert!(erased.is_empty());
        assert_eq!(tst.query_status(ids[0]), None);
    }
}
