// Recently-Committed Table (§4.4). An ordered commit-time index used to
// validate serializability: a validating transaction must learn every
// trx_id that committed in `[bt, ct)` so it can check for conflicts
// against its own read/write footprint (the footprint check itself is
// the out-of-scope validation expert, §1; this table only answers the
// range query).

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::id::TrxId;

/// `parking_lot::RwLock` is writer-prioritized by default, matching
/// §4.4's "writer-prioritized rw-lock" requirement directly.
#[derive(Default)]
pub struct RecentlyCommittedTable {
    by_ct: RwLock<BTreeMap<u64, TrxId>>,
}

impl RecentlyCommittedTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ct: u64, trx_id: TrxId) {
        self.by_ct.write().insert(ct, trx_id);
    }

    /// Half-open range `[bt, ct)` (§9's resolution of the source's
    /// ambiguous `[bt, ct-1]` expression).
    pub fn query(&self, bt: u64, ct: u64) -> Vec<TrxId> {
        self.by_ct
            .read()
            .range(bt..ct)
            .map(|(_, trx_id)| *trx_id)
            .collect()
    }

    /// Removes entries with `ct < min_bt` (§4.4).
    pub fn erase(&self, min_bt: u64) {
        self.by_ct.write().retain(|&ct, _| ct >= min_bt);
    }

    pub fn len(&self) -> usize {
        self.by_ct.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
