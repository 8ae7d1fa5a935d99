// Node descriptor file (§6): a line-oriented text file, each line
// `world_rank hostname ib_hostname tcp_port rdma_port`. Rank 0 is
// master; ports must be unique across the fleet.

use std::collections::HashSet;
use std::path::Path;

use gryphon_base::{err, Result};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeDescriptor {
    pub world_rank: u32,
    pub hostname: String,
    pub ib_hostname: String,
    pub tcp_port: u16,
    pub rdma_port: u16,
}

impl NodeDescriptor {
    pub fn is_master(&self) -> bool {
        self.world_rank == 0
    }

    fn parse_line(line: &str, line_no: usize) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [world_rank, hostname, ib_hostname, tcp_port, rdma_port] = fields.as_slice() else {
            return Err(err(format!("node file line {line_no}: expected 5 fields, got {}", fields.len())));
        };
        let world_rank: u32 = world_rank
            .parse()
            .map_err(|_| err(format!("node file line {line_no}: invalid world_rank {world_rank:?}")))?;
        let tcp_port: u16 = tcp_port
            .parse()
            .map_err(|_| err(format!("node file line {line_no}: invalid tcp_port {tcp_port:?}")))?;
        let rdma_port: u16 = rdma_port
            .parse()
            .map_err(|_| err(format!("node file line {line_no}: invalid rdma_port {rdma_port:?}")))?;
        Ok(NodeDescriptor {
            world_rank,
            hostname: (*hostname).to_owned(),
            ib_hostname: (*ib_hostname).to_owned(),
            tcp_port,
            rdma_port,
        })
    }
}

/// The whole fleet's node file, parsed and rank-sorted. §6's uniqueness
/// requirement on ports is checked once at load time rather than left
/// as a runtime bind-failure surprise.
pub struct NodeFile {
    pub nodes: Vec<NodeDescriptor>,
}

impl NodeFile {
    pub fn parse(text: &str) -> Result<Self> {
        let mut nodes = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            nodes.push(NodeDescriptor::parse_line(line, idx + 1)?);
        }
        if nodes.is_empty() {
            return Err(err("node file contains no entries"));
        }
        let mut ports = HashSet::new();
        for node in &nodes {
            if !ports.insert((node.hostname.clone(), node.tcp_port)) || !ports.insert((node.ib_hostname.clone(), node.rdma_port)) {
                return Err(err(format!("node file: duplicate port for rank {}", node.world_rank)));
            }
        }
        if !nodes.iter().any(|n| n.world_rank == 0) {
            return Err(err("node file: no rank 0 (master) entry"));
        }
        nodes.sort_by_key(|n| n.world_rank);
        Ok(NodeFile { nodes })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn master(&self) -> &NodeDescriptor {
        &self.nodes[0]
    }

    pub fn by_rank(&self, rank: u32) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|n| n.world_rank == rank)
    }

    pub fn comm_size(&self) -> u32 {
        self.nodes.len() as u32
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE: &str = "\
        0 master.internal master-ib.internal 7000 7100\n\
        1 worker1.internal worker1-ib.internal 7001 7101\n\
        2 worker2.internal worker2-ib.internal 7002 7102\n";

    #[test]
    fn parses_well_formed_file_and_sorts_by_rank() {
        let file = NodeFile::parse(SAMPLE).unwrap();
        assert_eq!(file.comm_size(), 3);
        assert!(file.master().is_master());
        assert_eq!(file.by_rank(2).unwrap().hostname, "worker2.internal");
    }

    #[test]
    fn rejects_duplicate_ports() {
        let text = "0 a a-ib 7000 7100\n1 b b-ib 7000 7101\n";
        assert!(NodeFile::parse(text).is_err());
    }

    #[test]
    fn rejects_missing_master() {
        let text = "1 a a-ib 7000 7100\n2 b b-ib 7001 7101\n";
        assert!(NodeFile::parse(text).is_err());
    }

    #[test]
    fn ignores_blank_lines_and_comments() {
        let text = "# fleet\n0 a a-ib 7000 7100\n\n1 b b-ib 7001 7101\n";
        let file = NodeFile::parse(text).unwrap();
        assert_eq!(file.comm_size(), 2);
    }
}
