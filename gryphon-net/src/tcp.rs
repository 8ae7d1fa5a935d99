// The TCP-only Mailbox variant. §4.5 reserves TCP for control-plane
// traffic the master always speaks (status-read threads, §4.7) and as
// the transport substituted for every data-plane message when no RDMA
// fabric is present; the `Mailbox` trait makes that substitution
// invisible to callers. One connection per ordered (reader, writer)
// node pair carries every thread's traffic, length-prefixed and
// demultiplexed by a single reader thread per connection into the same
// per-tid `crossbeam_channel` queues `RdmaMailbox` uses for local
// delivery.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use gryphon_base::Result;
use parking_lot::Mutex;

use crate::mailbox::Mailbox;
use crate::wire::{NodeId, Notification, QueryMsg, Tid};

fn write_frame(stream: &mut TcpStream, bytes: &[u8]) -> std::io::Result<()> {
    stream.write_all(&(bytes.len() as u64).to_le_bytes())?;
    stream.write_all(bytes)?;
    stream.flush()
}

fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 8];
    stream.read_exact(&mut len_buf)?;
    let len = u64::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf)?;
    Ok(buf)
}

enum Frame {
    Query(QueryMsg),
    Notification(Notification),
}

impl Frame {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Frame::Query(m) => {
                let mut out = vec![0u8];
                out.extend(m.to_bytes()?);
                Ok(out)
            }
            Frame::Notification(n) => {
                let mut out = vec![1u8];
                out.extend(n.to_bytes()?);
                Ok(out)
            }
        }
    }

    fn from_bytes(buf: &[u8]) -> Result<Self> {
        match buf.first() {
            Some(0) => Ok(Frame::Query(QueryMsg::from_bytes(&buf[1..])?)),
            Some(1) => Ok(Frame::Notification(Notification::from_bytes(&buf[1..])?)),
            _ => Err(gryphon_base::err("unknown TCP frame tag")),
        }
    }
}

/// One outbound connection per peer node, shared by every local thread.
pub struct TcpMailbox {
    node: NodeId,
    peers: HashMap<u32, Mutex<TcpStream>>,
    local_query: Vec<(Sender<QueryMsg>, Receiver<QueryMsg>)>,
    notif_rx: Receiver<Notification>,
}

impl TcpMailbox {
    /// `streams` must contain one connected, bidirectional `TcpStream`
    /// per peer node id (not including `node` itself), already
    /// established via the node descriptor file's `tcp_port` column
    /// (§6). A background reader thread is spawned per peer.
    pub fn new(node: NodeId, thread_count: usize, streams: HashMap<u32, TcpStream>) -> Result<Arc<Self>> {
        let local_query = (0..thread_count).map(|_| crossbeam_channel::unbounded()).collect();
        let (notif_tx, notif_rx) = crossbeam_channel::unbounded();

        let mut peers = HashMap::new();
        let local_senders: Vec<Sender<QueryMsg>> =
            local_query.iter().map(|(tx, _)| tx.clone()).collect();

        for (peer_id, stream) in streams {
            let read_stream = stream.try_clone()?;
            peers.insert(peer_id, Mutex::new(stream));

            let notif_tx = notif_tx.clone();
            let local_senders = local_senders.clone();
            std::thread::spawn(move || {
                let mut stream = read_stream;
                loop {
                    let bytes = match read_frame(&mut stream) {
                        Ok(b) => b,
                        Err(_) => break,
                    };
                    match Frame::from_bytes(&bytes) {
                        Ok(Frame::Query(msg)) => {
                            let tid = msg.recver_tid.0 as usize;
                            if let Some(tx) = local_senders.get(tid) {
                                let _ = tx.send(msg);
                            }
                        }
                        Ok(Frame::Notification(n)) => {
                            let _ = notif_tx.send(n);
                        }
                        Err(_) => break,
                    }
                }
            });
        }

        Ok(Arc::new(TcpMailbox {
            node,
            peers,
            local_query,
            notif_rx,
        }))
    }

    fn send_frame_to(&self, peer: NodeId, frame: &Frame) -> Result<()> {
        let bytes = frame.to_bytes()?;
        let mut stream = self.peers[&peer.0]
            .try_lock()
            .ok_or_else(|| gryphon_base::err("peer connection busy"))?;
        Ok(write_frame(&mut stream, &bytes)?)
    }
}

impl Mailbox for TcpMailbox {
    fn send(&self, _from_tid: Tid, msg: QueryMsg) -> Result<()> {
        if msg.recver_nid == self.node {
            let tid = msg.recver_tid.0 as usize;
            self.local_query[tid]
                .0
                .send(msg)
                .map_err(|_| gryphon_base::err("local queue closed"))?;
            return Ok(());
        }
        self.send_frame_to(msg.recver_nid, &Frame::Query(msg))
    }

    /// TCP delivery is synchronous in `send`; nothing to flush.
    fn sweep(&self, _from_tid: Tid) -> Result<()> {
        Ok(())
    }

    fn recv(&self, tid: Tid) -> Result<QueryMsg> {
        self.local_query[tid.0 as usize]
            .1
            .recv()
            .map_err(|_| gryphon_base::err("local queue closed"))
    }

    fn try_recv(&self, tid: Tid) -> Result<Option<QueryMsg>> {
        match self.local_query[tid.0 as usize].1.try_recv() {
            Ok(m) => Ok(Some(m)),
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(None),
            Err(_) => Err(gryphon_base::err("local queue closed")),
        }
    }

    fn send_notification(&self, dst_nid: NodeId, notification: &Notification) -> Result<()> {
        if dst_nid == self.node {
            return Err(gryphon_base::err("cannot notify self over TCP"));
        }
        self.send_frame_to(dst_nid, &Frame::Notification(notification.clone()))
    }

    fn recv_notification(&self) -> Result<Notification> {
        self.notif_rx.recv().map_err(|_| gryphon_base::err("notification channel closed"))
    }

    fn try_recv_notification(&self) -> Result<Option<Notification>> {
        match self.notif_rx.try_recv() {
            Ok(n) => Ok(Some(n)),
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(None),
            Err(_) => Err(gryphon_base::err("notification channel closed")),
        }
    }
}

/// Test/bootstrap helper: given a listener already bound on this node's
/// `tcp_port` and the peer's address, perform the higher-rank-dials
/// convention (lower world_rank listens, higher dials) used when
/// bringing the cluster up from the node descriptor file (§6).
pub fn connect_pair_for_test() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let addr = listener.local_addr().unwrap();
    let client = std::thread::spawn(move || TcpStream::connect(addr).unwrap());
    let (server, _) = listener.accept().unwrap();
    let client = client.join().unwrap();
    (server, client)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::StepType;

    #[test]
    fn frame_tag_round_trips_query_and_notification() {
        let q = QueryMsg {
            sender_nid: NodeId(0),
            recver_nid: NodeId(1),
            recver_tid: Tid(0),
            step_type: StepType::Init,
            qid: 1,
            payload: vec![9, 9],
        };
        let bytes = Frame::Query(q.clone()).to_bytes().unwrap();
        match Frame::from_bytes(&bytes).unwrap() {
            Frame::Query(got) => assert_eq!(got, q),
            _ => panic!("expected query frame"),
        }

        let n = Notification::QueryRct {
            sender_nid: NodeId(0),
            trx_id: 5,
            bt: 1,
            ct: 2,
        };
        let bytes = Frame::Notification(n.clone()).to_bytes().unwrap();
        match Frame::from_bytes(&bytes).unwrap() {
            Frame::Notification(got) => assert_eq!(got, n),
            _ => panic!("expected notification frame"),
        }
    }

    #[test]
    fn query_message_delivers_end_to_end_over_loopback() {
        let (s0, s1) = connect_pair_for_test();
        let mut peers0 = HashMap::new();
        peers0.insert(1u32, s0);
        let mut peers1 = HashMap::new();
        peers1.insert(0u32, s1);

        let mb0 = TcpMailbox::new(NodeId(0), 2, peers0).unwrap();
        let mb1 = TcpMailbox::new(NodeId(1), 2, peers1).unwrap();

        let msg = QueryMsg {
            sender_nid: NodeId(0),
            recver_nid: NodeId(1),
            recver_tid: Tid(1),
            step_type: StepType::QueryResult,
            qid: 77,
            payload: vec![1, 2, 3],
        };
        mb0.send(Tid(0), msg.clone()).unwrap();
        let got = mb1.recv(Tid(1)).unwrap();
        assert_eq!(got, msg);
    }

    #[test]
    fn notification_delivers_end_to_end_over_loopback() {
        let (s0, s1) = connect_pair_for_test();
        let mut peers0 = HashMap::new();
        peers0.insert(1u32, s0);
        let mut peers1 = HashMap::new();
        peers1.insert(0u32, s1);

        let mb0 = TcpMailbox::new(NodeId(0), 1, peers0).unwrap();
        let mb1 = TcpMailbox::new(NodeId(1), 1, peers1).unwrap();

        let n = Notification::UpdateStatus {
            sender_nid: NodeId(0),
            trx_id: 3,
            phase: 1,
            is_readonly: true,
        };
        mb0.send_notification(NodeId(1), &n).unwrap();
        let got = mb1.recv_notification().unwrap();
        assert_eq!(got, n);
    }
}
