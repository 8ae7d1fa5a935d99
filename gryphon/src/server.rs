// Server bootstrap (§6 "CLI"). Master and workers share this binary and
// dispatch by rank; rank is supplied via `--rank`/`GRYPHON_RANK` rather
// than read from an MPI communicator (the launcher itself is out of
// scope here).

use std::collections::HashMap;
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use gryphon_admin::{GryphonConfig, NodeFile};
use gryphon_base::{err, Result, ShutdownSignal};
use gryphon_gc::{ConsumerPool, GcConfig, GcState, Producer};
use gryphon_net::{Mailbox, NodeId, TcpMailbox};
use gryphon_txn::{Clock, Coordinator, RecentlyCommittedTable, TransactionStatusTable};
use tracing::info;

pub struct ServerArgs {
    pub config_path: PathBuf,
    pub node_file_path: PathBuf,
    pub rank: u32,
}

/// `--rank` wins over `GRYPHON_RANK`; the real launcher always supplies
/// one of the two.
pub fn resolve_rank(cli_rank: Option<u32>) -> Result<u32> {
    if let Some(rank) = cli_rank {
        return Ok(rank);
    }
    std::env::var("GRYPHON_RANK")
        .map_err(|_| err("no --rank given and GRYPHON_RANK is not set"))?
        .parse()
        .map_err(|_| err("GRYPHON_RANK is not a valid u32"))
}

/// Every long-lived handle a running process owns; dropping it (after
/// triggering `shutdown`) unwinds every background thread.
pub struct Server {
    pub shutdown: ShutdownSignal,
    pub coordinator: Arc<Coordinator>,
    pub gc_state: Option<Arc<GcState>>,
    threads: Vec<std::thread::JoinHandle<()>>,
}

impl Server {
    pub fn join(mut self) {
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
    }
}

/// Dials every lower-ranked peer and accepts from every higher-ranked
/// peer, the same "lower listens, higher dials" convention
/// `connect_pair_for_test` documents for loopback tests. Each dialer
/// writes its own rank as a 4-byte little-endian handshake so the
/// listener can match incoming sockets back to a rank.
fn establish_tcp_peers(node_file: &NodeFile, my_rank: u32) -> Result<HashMap<u32, TcpStream>> {
    use std::io::{Read, Write};

    let me = node_file.by_rank(my_rank).ok_or_else(|| err("own rank missing from node file"))?;
    let listener = TcpListener::bind(("0.0.0.0", me.tcp_port))?;
    let mut peers = HashMap::new();

    for other in &node_file.nodes {
        if other.world_rank >= my_rank {
            continue;
        }
        let mut stream = loop {
            match TcpStream::connect((other.hostname.as_str(), other.tcp_port)) {
                Ok(s) => break s,
                Err(_) => std::thread::sleep(Duration::from_millis(200)),
            }
        };
        stream.write_all(&my_rank.to_le_bytes())?;
        peers.insert(other.world_rank, stream);
    }

    let expected_incoming = node_file.nodes.iter().filter(|n| n.world_rank > my_rank).count();
    for _ in 0..expected_incoming {
        let (mut stream, _addr) = listener.accept()?;
        let mut rank_buf = [0u8; 4];
        stream.read_exact(&mut rank_buf)?;
        peers.insert(u32::from_le_bytes(rank_buf), stream);
    }

    Ok(peers)
}

impl Server {
    pub fn bootstrap(args: &ServerArgs) -> Result<Self> {
        let config = GryphonConfig::load(&args.config_path)?;
        let node_file = NodeFile::load(&args.node_file_path)?;
        let node = node_file
            .by_rank(args.rank)
            .ok_or_else(|| err(format!("rank {} is not in the node file", args.rank)))?
            .clone();

        info!(target: "gryphon::server", rank = args.rank, is_master = node.is_master(), comm_size = node_file.comm_size(), "bootstrapping");

        let shutdown = ShutdownSignal::new();
        let clock = Arc::new(Clock::new(args.rank as u16));
        let total_slots = (config.transaction_table_size_mib * 8192).max(64);
        let tst = Arc::new(TransactionStatusTable::new(total_slots, 8));
        let rct = Arc::new(RecentlyCommittedTable::new());

        let streams = establish_tcp_peers(&node_file, args.rank)?;
        let mailbox: Arc<dyn Mailbox> = TcpMailbox::new(NodeId(args.rank), config.worker_thread_count, streams)?;

        let coordinator = Arc::new(Coordinator::new(args.rank, node_file.comm_size(), clock, tst.clone(), rct.clone(), mailbox));

        let threads = vec![
            coordinator.spawn_timestamp_thread(shutdown.clone()),
            coordinator.spawn_tst_write_thread(shutdown.clone()),
            coordinator.spawn_rct_query_server_thread(shutdown.clone()),
            coordinator.spawn_notification_loop(NodeId(args.rank), shutdown.clone()),
        ];

        let gc_state = if node.is_master() || !config.features.enable_garbage_collect {
            None
        } else {
            let gc_config = GcConfig {
                cost_threshold: config.gc_thresholds.cost_threshold,
                prop_row_defrag_threshold: config.gc_thresholds.prop_row_defrag_threshold as usize,
                topo_row_defrag_threshold: config.gc_thresholds.topo_row_defrag_threshold as usize,
            };
            Some(GcState::new(gc_config, Arc::new(AtomicU64::new(0))))
        };

        if args.rank == 0 {
            write_init_finished_signal(&args.node_file_path, node_file.comm_size())?;
        }

        Ok(Server {
            shutdown,
            coordinator,
            gc_state,
            threads,
        })
    }
}

/// On bootstrap of worker 0, writes `INIT_FINISHED.SIGNAL` containing
/// the local worker count so external orchestration can proceed (§6
/// "Signals").
fn write_init_finished_signal(node_file_path: &Path, worker_count: u32) -> Result<()> {
    let dir = node_file_path.parent().unwrap_or_else(|| Path::new("."));
    let path = dir.join("INIT_FINISHED.SIGNAL");
    std::fs::write(path, worker_count.to_string())?;
    Ok(())
}

/// Spawns the GC producer/consumer threads once a real `LayoutScan`/
/// `LayoutErase` implementation is available; kept separate from
/// `bootstrap` because the graph layout itself is out of scope here.
pub fn spawn_gc(
    gc_state: &Arc<GcState>,
    layout_scan: Arc<dyn gryphon_gc::LayoutScan>,
    layout_erase: Arc<dyn gryphon_gc::LayoutErase>,
    consumer_count: usize,
    scan_period: Duration,
    shutdown: ShutdownSignal,
) -> Vec<std::thread::JoinHandle<()>> {
    let producer = Producer::new(gc_state.clone(), layout_scan, scan_period);
    let consumer_pool = ConsumerPool::new(gc_state.clone(), layout_erase);
    let mut handles = consumer_pool.spawn(consumer_count, shutdown.clone());
    handles.push(producer.spawn(shutdown));
    handles
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolve_rank_prefers_cli_flag_over_env() {
        std::env::set_var("GRYPHON_RANK", "9");
        assert_eq!(resolve_rank(Some(3)).unwrap(), 3);
        std::env::remove_var("GRYPHON_RANK");
    }

    #[test]
    fn resolve_rank_falls_back_to_env() {
        std::env::set_var("GRYPHON_RANK", "5");
        assert_eq!(resolve_rank(None).unwrap(), 5);
        std::env::remove_var("GRYPHON_RANK");
    }

    #[test]
    fn resolve_rank_errors_without_either_source() {
        std::env::remove_var("GRYPHON_RANK");
        assert!(resolve_rank(None).is_err());
    }
}
