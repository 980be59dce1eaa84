use crate::model::{EdgeId, NodeId};

/// Every file starts with a single 4-byte counter.
pub(crate) const FILE_HEADER_SIZE: u64 = 4;

/// First free byte of a fresh properties file, just past its own header.
pub(crate) const INITIAL_PROP_ADDR: u32 = 4;

pub(crate) const NODE_SLOT_SIZE: u64 = 12;
pub(crate) const EDGE_RECORD_SIZE: u64 = 28;

/// Largest id representable by the signed on-disk counters.
pub(crate) const MAX_ID: u32 = i32::MAX as u32;

pub(crate) fn node_slot_offset(id: NodeId) -> u64 {
    FILE_HEADER_SIZE + NODE_SLOT_SIZE * (id as u64 - 1)
}

pub(crate) fn edge_record_offset(id: EdgeId) -> u64 {
    FILE_HEADER_SIZE + EDGE_RECORD_SIZE * (id as u64 - 1)
}

/// Fixed 12-byte node-id table entry. `addr == 0` marks a tombstone;
/// `edge_from`/`edge_to` head the outgoing and incoming adjacency lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct NodeSlot {
    pub addr: u32,
    pub edge_from: EdgeId,
    pub edge_to: EdgeId,
}

impl NodeSlot {
    pub(crate) fn to_bytes(self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[0..4].copy_from_slice(&self.addr.to_be_bytes());
        buf[4..8].copy_from_slice(&self.edge_from.to_be_bytes());
        buf[8..12].copy_from_slice(&self.edge_to.to_be_bytes());
        buf
    }

    pub(crate) fn from_bytes(buf: &[u8; 12]) -> Self {
        Self {
            addr: u32::from_be_bytes(buf[0..4].try_into().expect("4-byte field")),
            edge_from: u32::from_be_bytes(buf[4..8].try_into().expect("4-byte field")),
            edge_to: u32::from_be_bytes(buf[8..12].try_into().expect("4-byte field")),
        }
    }
}

/// Fixed 28-byte edge table entry. `from_nid == 0` marks a tombstone.
/// `prev_1`/`next_1` thread the list of edges sharing this source node,
/// `prev_2`/`next_2` the list sharing this destination node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct EdgeRecord {
    pub from_nid: NodeId,
    pub to_nid: NodeId,
    pub prev_1: EdgeId,
    pub next_1: EdgeId,
    pub prev_2: EdgeId,
    pub next_2: EdgeId,
    pub props_addr: u32,
}

impl EdgeRecord {
    pub(crate) fn to_bytes(self) -> [u8; 28] {
        let mut buf = [0u8; 28];
        for (i, field) in [
            self.from_nid,
            self.to_nid,
            self.prev_1,
            self.next_1,
            self.prev_2,
            self.next_2,
            self.props_addr,
        ]
        .into_iter()
        .enumerate()
        {
            buf[i * 4..i * 4 + 4].copy_from_slice(&field.to_be_bytes());
        }
        buf
    }

    pub(crate) fn from_bytes(buf: &[u8; 28]) -> Self {
        let field = |i: usize| u32::from_be_bytes(buf[i * 4..i * 4 + 4].try_into().expect("4-byte field"));
        Self {
            from_nid: field(0),
            to_nid: field(1),
            prev_1: field(2),
            next_1: field(3),
            prev_2: field(4),
            next_2: field(5),
            props_addr: field(6),
        }
    }
}
