// Two-sided UD notifications (§4.5): messages larger than the MTU are
// split into packets and reassembled per-source, de-duplicating on
// packet_id. Reassembly-slot occupancy is tracked with `Bitmap256`
// (packet counts beyond 256 per message are not expected at
// notification size and are rejected rather than silently truncated).

use gryphon_base::{err, Bitmap256, Result};
use std::collections::HashMap;

use crate::wire::NodeId;

/// `4096 - 40` (Global Routing Header overhead), per §4.5.
pub const UD_MTU: usize = 4096 - 40;
const UD_PACKET_HEADER_LEN: usize = 20;
pub const UD_PACKET_DATA_LEN: usize = UD_MTU - UD_PACKET_HEADER_LEN;

/// `struct{src_nid:i32, packet_count:i32, packet_id:i32, total_len:i32, data_len:i32}`
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UdPacketHeader {
    pub src_nid: i32,
    pub packet_count: i32,
    pub packet_id: i32,
    pub total_len: i32,
    pub data_len: i32,
}

impl UdPacketHeader {
    fn to_bytes(self) -> [u8; UD_PACKET_HEADER_LEN] {
        let mut out = [0u8; UD_PACKET_HEADER_LEN];
        out[0..4].copy_from_slice(&self.src_nid.to_le_bytes());
        out[4..8].copy_from_slice(&self.packet_count.to_le_bytes());
        out[8..12].copy_from_slice(&self.packet_id.to_le_bytes());
        out[12..16].copy_from_slice(&self.total_len.to_le_bytes());
        out[16..20].copy_from_slice(&self.data_len.to_le_bytes());
        out
    }

    fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < UD_PACKET_HEADER_LEN {
            return Err(err("UD packet shorter than header"));
        }
        let rd = |r: std::ops::Range<usize>| i32::from_le_bytes(buf[r].try_into().unwrap());
        Ok(UdPacketHeader {
            src_nid: rd(0..4),
            packet_count: rd(4..8),
            packet_id: rd(8..12),
            total_len: rd(12..16),
            data_len: rd(16..20),
        })
    }
}

/// Splits `payload` (already-serialized notification bytes) into UD
/// packets addressed from `src`.
pub fn fragment(src: NodeId, payload: &[u8]) -> Vec<Vec<u8>> {
    if payload.is_empty() {
        let header = UdPacketHeader {
            src_nid: src.0 as i32,
            packet_count: 1,
            packet_id: 0,
            total_len: 0,
            data_len: 0,
        };
        return vec![header.to_bytes().to_vec()];
    }
    let total_len = payload.len();
    let packet_count = total_len.div_ceil(UD_PACKET_DATA_LEN) as i32;
    let mut out = Vec::with_capacity(packet_count as usize);
    for (packet_id, chunk) in payload.chunks(UD_PACKET_DATA_LEN).enumerate() {
        let header = UdPacketHeader {
            src_nid: src.0 as i32,
            packet_count,
            packet_id: packet_id as i32,
            total_len: total_len as i32,
            data_len: chunk.len() as i32,
        };
        let mut packet = header.to_bytes().to_vec();
        packet.extend_from_slice(chunk);
        out.push(packet);
    }
    out
}

struct PartialMessage {
    total_len: usize,
    packet_count: usize,
    seen: Bitmap256,
    data: Vec<u8>,
}

/// Per-source reassembly state for a UD receiver. One instance lives
/// on whichever thread calls `recv_notification`.
#[derive(Default)]
pub struct Reassembler {
    partials: HashMap<i32, PartialMessage>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one received UD packet. Returns `Some(complete_payload)`
    /// once every packet for that source's in-flight message has
    /// arrived; dedupes retransmitted packet_ids via `seen`.
    pub fn accept(&mut self, packet: &[u8]) -> Result<Option<Vec<u8>>> {
        let header = UdPacketHeader::from_bytes(packet)?;
        if header.packet_count > 256 {
            return Err(err("UD message exceeds 256-packet reassembly window"));
        }
        let data = &packet[UD_PACKET_HEADER_LEN..UD_PACKET_HEADER_LEN + header.data_len as usize];

        if header.packet_count == 1 && header.total_len == 0 {
            return Ok(Some(Vec::new()));
        }

        let partial = self.partials.entry(header.src_nid).or_insert_with(|| PartialMessage {
            total_len: header.total_len as usize,
            packet_count: header.packet_count as usize,
            seen: Bitmap256::new(),
            data: vec![0u8; header.total_len as usize],
        });

        if partial.seen.get(header.packet_id as u8) {
            // Duplicate/retransmitted packet; nothing new to do.
            return Ok(None);
        }
        let offset = header.packet_id as usize * UD_PACKET_DATA_LEN;
        partial.data[offset..offset + data.len()].copy_from_slice(data);
        partial.seen.set(header.packet_id as u8, true);

        if partial.seen.rank((partial.packet_count - 1) as u8) == partial.packet_count {
            let finished = self.partials.remove(&header.src_nid).unwrap();
            Ok(Some(finished.data))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_packet_message_round_trips() {
        let payload = b"small notification".to_vec();
        let packets = fragment(NodeId(3), &payload);
        assert_eq!(packets.len(), 1);
        let mut r = Reassembler::new();
        let got = r.accept(&packets[0]).unwrap().unwrap();
        assert_eq!(got, payload);
    }

    #[test]
    fn multi_packet_message_reassembles_in_order() {
        let payload: Vec<u8> = (0..(UD_PACKET_DATA_LEN * 3 + 123)).map(|i| (i % 251) as u8).collect();
        let packets = fragment(NodeId(1), &payload);
        assert!(packets.len() > 1);
        let mut r = Reassembler::new();
        let mut result = None;
        for p in &packets {
            result = r.accept(p).unwrap();
        }
        assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn out_of_order_and_duplicate_packets_still_reassemble() {
        let payload: Vec<u8> = (0..(UD_PACKET_DATA_LEN * 2 + 50)).map(|i| (i % 200) as u8).collect();
        let mut packets = fragment(NodeId(2), &payload);
        packets.swap(0, 2);
        let dup = packets[0].clone();
        let mut r = Reassembler::new();
        assert!(r.accept(&dup).unwrap().is_none());
        let mut result = None;
        for p in &packets {
            let out = r.accept(p).unwrap();
            if out.is_some() {
                result = out;
            }
        }
        assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn interleaved_sources_do_not_cross_contaminate() {
        let a: Vec<u8> = (0..(UD_PACKET_DATA_LEN + 10)).map(|i| i as u8).collect();
        let b: Vec<u8> = (0..(UD_PACKET_DATA_LEN + 20)).map(|i| (i * 3) as u8).collect();
        let pa = fragment(NodeId(10), &a);
        let pb = fragment(NodeId(20), &b);
        let mut r = Reassembler::new();
        assert!(r.accept(&pa[0]).unwrap().is_none());
        assert!(r.accept(&pb[0]).unwrap().is_none());
        let got_a = r.accept(&pa[1]).unwrap().unwrap();
        let got_b = r.accept(&pb[1]).unwrap().unwrap();
        assert_eq!(got_a, a);
        assert_eq!(got_b, b);
    }
}
