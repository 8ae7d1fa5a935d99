// In-memory fake graph layout (§4.8.1) sufficient to drive the min-bt
// pinning and two-node scan-cycle seed scenarios end to end against a
// real task DAG and a real consumer thread pool.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::layout::{LayoutErase, LayoutScan, RowScanEntry, VertexId};

pub struct FakeLayout {
    vertices: Mutex<HashMap<u64, u64>>,
    prop_rows: Mutex<HashMap<u64, usize>>,
    topo_rows: Mutex<HashMap<u64, (usize, Vec<u64>)>>,
    erased_vertices: Mutex<HashSet<u64>>,
    defragged_prop_rows: Mutex<HashSet<u64>>,
    defragged_topo_rows: Mutex<HashSet<u64>>,
    freed_mvcc: Mutex<HashSet<u64>>,
    erased_out_edges: Mutex<HashSet<u64>>,
    erased_in_edges: Mutex<HashSet<u64>>,
}

impl Default for FakeLayout {
    fn default() -> Self {
        FakeLayout {
            vertices: Mutex::new(HashMap::new()),
            prop_rows: Mutex::new(HashMap::new()),
            topo_rows: Mutex::new(HashMap::new()),
            erased_vertices: Mutex::new(HashSet::new()),
            defragged_prop_rows: Mutex::new(HashSet::new()),
            defragged_topo_rows: Mutex::new(HashSet::new()),
            freed_mvcc: Mutex::new(HashSet::new()),
            erased_out_edges: Mutex::new(HashSet::new()),
            erased_in_edges: Mutex::new(HashSet::new()),
        }
    }
}

impl FakeLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&self, id: u64, mvcc_head_end_time: u64) {
        self.vertices.lock().insert(id, mvcc_head_end_time);
    }

    pub fn add_prop_row(&self, id: u64, invisible_cells: usize) {
        self.prop_rows.lock().insert(id, invisible_cells);
    }

    pub fn add_topo_row(&self, id: u64, invisible_cells: usize, severed_eids: Vec<u64>) {
        self.topo_rows.lock().insert(id, (invisible_cells, severed_eids));
    }

    pub fn erased_vertices(&self) -> HashSet<u64> {
        self.erased_vertices.lock().clone()
    }

    pub fn freed_mvcc(&self) -> HashSet<u64> {
        self.freed_mvcc.lock().clone()
    }

    pub fn defragged_prop_rows(&self) -> HashSet<u64> {
        self.defragged_prop_rows.lock().clone()
    }

    pub fn defragged_topo_rows(&self) -> HashSet<u64> {
        self.defragged_topo_rows.lock().clone()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.lock().len()
    }

    pub fn erased_out_edges(&self) -> HashSet<u64> {
        self.erased_out_edges.lock().clone()
    }

    pub fn erased_in_edges(&self) -> HashSet<u64> {
        self.erased_in_edges.lock().clone()
    }
}

impl LayoutScan for FakeLayout {
    fn scan_vertices(&self) -> Vec<(VertexId, u64)> {
        self.vertices.lock().iter().map(|(&id, &end_time)| (VertexId(id), end_time)).collect()
    }

    fn scan_prop_rows(&self) -> Vec<RowScanEntry> {
        self.prop_rows
            .lock()
            .iter()
            .map(|(&id, &invisible_cells)| RowScanEntry { id, invisible_cells })
            .collect()
    }

    fn scan_topo_rows(&self) -> Vec<RowScanEntry> {
        self.topo_rows
            .lock()
            .iter()
            .map(|(&id, &(invisible_cells, _))| RowScanEntry { id, invisible_cells })
            .collect()
    }
}

impl LayoutErase for FakeLayout {
    fn erase_vertex(&self, id: VertexId) {
        self.vertices.lock().remove(&id.0);
        self.erased_vertices.lock().insert(id.0);
    }

    fn defrag_prop_row(&self, id: u64) {
        self.defragged_prop_rows.lock().insert(id);
        self.prop_rows.lock().remove(&id);
    }

    fn defrag_topo_row(&self, id: u64) -> Vec<u64> {
        self.defragged_topo_rows.lock().insert(id);
        self.topo_rows.lock().remove(&id).map(|(_, eids)| eids).unwrap_or_default()
    }

    fn free_mvcc_chain(&self, id: VertexId) {
        self.freed_mvcc.lock().insert(id.0);
    }

    fn erase_edge(&self, eid: u64, out: bool) {
        if out {
            self.erased_out_edges.lock().insert(eid);
        } else {
            self.erased_in_edges.lock().insert(eid);
        }
    }
}
