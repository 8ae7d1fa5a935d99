// The boundary between GC and the graph layout (vertex/edge maps, MVCC
// lists, property/topology rows) is out of scope here, so it is crossed
// only through these two small traits (§4.8.1).

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct VertexId(pub u64);

/// One row surfaced by a scan pass, with enough context to decide
/// whether it crosses its type's defrag threshold.
pub struct RowScanEntry {
    pub id: u64,
    pub invisible_cells: usize,
}

pub trait LayoutScan: Send + Sync {
    /// `(vertex id, mvcc-list head end_time)` for every vertex currently
    /// present; the scanner reclaims any whose end_time is strictly less
    /// than GLOBAL_MIN_BT.
    fn scan_vertices(&self) -> Vec<(VertexId, u64)>;
    fn scan_prop_rows(&self) -> Vec<RowScanEntry>;
    fn scan_topo_rows(&self) -> Vec<RowScanEntry>;
}

pub trait LayoutErase: Send + Sync {
    fn erase_vertex(&self, id: VertexId);
    fn defrag_prop_row(&self, id: u64);
    /// Returns the out/in-edge ids this defrag pass severed; these feed
    /// the EraseOutE/EraseInE tasks of the next scan pass.
    fn defrag_topo_row(&self, id: u64) -> Vec<u64>;
    fn free_mvcc_chain(&self, id: VertexId);
    /// Frees the edge-direction map entry for `eid` (§4.8 edge
    /// reclamation); `out` selects the out-edge map, else the in-edge map.
    fn erase_edge(&self, eid: u64, out: bool);
}
