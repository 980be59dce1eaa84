use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::Path;

use lru::LruCache;
use tracing::debug;

use crate::db::Config;
use crate::error::{GraphError, Result};
use crate::model::{Edge, EdgeId, Node, NodeId, PropertyMap, NULL_EDGE_ID, NULL_NODE_ID};

use super::codec;
use super::io::StoreFile;
use super::layout::{
    edge_record_offset, node_slot_offset, EdgeRecord, NodeSlot, INITIAL_PROP_ADDR, MAX_ID,
};

#[derive(Debug, Clone, Copy)]
enum Direction {
    Outgoing,
    Incoming,
}

/// The three-file storage engine.
///
/// Owns the properties heap, the node-id table, and the edge table. The
/// three header counters are cached in memory and written through on every
/// mutation; node slots and edge records sit behind small write-through
/// LRU caches so pointer fix-ups see their own earlier writes.
pub struct GraphStore {
    properties: StoreFile,
    node_ids: StoreFile,
    edges: StoreFile,
    cur_node_addr: u32,
    cur_node_id: NodeId,
    cur_eid: EdgeId,
    node_cache: LruCache<NodeId, NodeSlot>,
    edge_cache: LruCache<EdgeId, EdgeRecord>,
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("cur_node_addr", &self.cur_node_addr)
            .field("cur_node_id", &self.cur_node_id)
            .field("cur_eid", &self.cur_eid)
            .finish()
    }
}

impl GraphStore {
    /// Opens (creating if absent) the three database files inside `dir`,
    /// named by the config's `db_name` stem.
    pub fn open(dir: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let dir = dir.as_ref();
        let properties = StoreFile::open(dir.join(format!("{}.properties", config.db_name)))?;
        let node_ids = StoreFile::open(dir.join(format!("{}.node_ids", config.db_name)))?;
        let edges = StoreFile::open(dir.join(format!("{}.edges", config.db_name)))?;

        let cur_node_addr = read_or_init_addr_header(&properties)?;
        let cur_node_id = read_or_init_id_header(&node_ids, "node_ids")?;
        let cur_eid = read_or_init_id_header(&edges, "edges")?;

        debug!(
            dir = %dir.display(),
            db = %config.db_name,
            next_node = cur_node_id,
            next_edge = cur_eid,
            "store.open"
        );

        Ok(Self {
            properties,
            node_ids,
            edges,
            cur_node_addr,
            cur_node_id,
            cur_eid,
            node_cache: LruCache::new(cache_capacity(config.node_cache_size)),
            edge_cache: LruCache::new(cache_capacity(config.edge_cache_size)),
        })
    }

    /// Next node id to be allocated; strictly exceeds every live id.
    pub fn next_node_id(&self) -> NodeId {
        self.cur_node_id
    }

    /// Next edge id to be allocated.
    pub fn next_edge_id(&self) -> EdgeId {
        self.cur_eid
    }

    /// Best-effort durability: pushes all three files to stable storage.
    pub fn flush(&mut self) -> Result<()> {
        self.properties.sync()?;
        self.node_ids.sync()?;
        self.edges.sync()
    }

    pub fn create_node(&mut self, props: PropertyMap) -> Result<NodeId> {
        reject_internal_values(&props)?;
        let record = codec::encode_record(&props)?;

        let id = self.cur_node_id;
        let next_id = bump_id(id, "node")?;

        let addr = self.append_props(&record)?;
        self.node_ids.write_all_at(0, &(next_id as i32).to_be_bytes())?;
        self.cur_node_id = next_id;
        self.store_node_slot(
            id,
            NodeSlot {
                addr,
                edge_from: NULL_EDGE_ID,
                edge_to: NULL_EDGE_ID,
            },
        )?;
        Ok(id)
    }

    pub fn get_node(&mut self, id: NodeId) -> Result<Node> {
        let slot = self.live_node_slot(id)?;
        let props = self.read_props(slot.addr)?;
        Ok(Node { id, props })
    }

    /// Replaces a node's properties. The new record is always appended and
    /// the slot repointed; the node id never changes and the old record
    /// becomes garbage.
    pub fn update_node(&mut self, id: NodeId, props: PropertyMap) -> Result<()> {
        reject_internal_values(&props)?;
        let record = codec::encode_record(&props)?;
        let mut slot = self.live_node_slot(id)?;

        slot.addr = self.append_props(&record)?;
        self.store_node_slot(id, slot)
    }

    /// Deletes a node and every incident edge. Deleting an already
    /// tombstoned node succeeds; a never-allocated id is `NotFound`.
    pub fn delete_node(&mut self, id: NodeId) -> Result<()> {
        self.check_node_id(id)?;
        let slot = self.load_node_slot(id)?;
        if slot.addr == 0 {
            return Ok(());
        }

        let outgoing = self.collect_list(slot.edge_from, Direction::Outgoing)?;
        let incoming = self.collect_list(slot.edge_to, Direction::Incoming)?;

        // A self-loop sits in both lists but must be deleted once.
        let mut seen = HashSet::new();
        for eid in outgoing.into_iter().chain(incoming) {
            if seen.insert(eid) {
                self.delete_edge(eid)?;
            }
        }

        self.store_node_slot(id, NodeSlot::default())
    }

    /// Creates an edge and splices it at the head of both adjacency lists.
    pub fn create_edge(&mut self, from: NodeId, props: PropertyMap, to: NodeId) -> Result<EdgeId> {
        reject_internal_values(&props)?;
        let record = if props.is_empty() {
            None
        } else {
            Some(codec::encode_record(&props)?)
        };

        let from_slot = self.live_node_slot(from)?;
        let to_slot = self.live_node_slot(to)?;

        let id = self.cur_eid;
        let next_id = bump_id(id, "edge")?;

        let old_out = from_slot.edge_from;
        let old_in = to_slot.edge_to;
        // Surface structural problems before the first write.
        if old_out != NULL_EDGE_ID {
            self.load_edge_record(old_out)?;
        }
        if old_in != NULL_EDGE_ID {
            self.load_edge_record(old_in)?;
        }

        let props_addr = match record {
            Some(bytes) => self.append_props(&bytes)?,
            None => 0,
        };

        self.store_edge_record(
            id,
            EdgeRecord {
                from_nid: from,
                to_nid: to,
                prev_1: NULL_EDGE_ID,
                next_1: old_out,
                prev_2: NULL_EDGE_ID,
                next_2: old_in,
                props_addr,
            },
        )?;

        if old_out != NULL_EDGE_ID {
            let mut head = self.load_edge_record(old_out)?;
            head.prev_1 = id;
            self.store_edge_record(old_out, head)?;
        }
        let mut from_slot = self.load_node_slot(from)?;
        from_slot.edge_from = id;
        self.store_node_slot(from, from_slot)?;

        if old_in != NULL_EDGE_ID {
            let mut head = self.load_edge_record(old_in)?;
            head.prev_2 = id;
            self.store_edge_record(old_in, head)?;
        }
        // Loaded fresh so a self-loop links against the updated slot.
        let mut to_slot = self.load_node_slot(to)?;
        to_slot.edge_to = id;
        self.store_node_slot(to, to_slot)?;

        self.edges.write_all_at(0, &(next_id as i32).to_be_bytes())?;
        self.cur_eid = next_id;
        Ok(id)
    }

    pub fn get_edge(&mut self, id: EdgeId) -> Result<Edge> {
        let rec = self.live_edge_record(id)?;
        let props = if rec.props_addr == 0 {
            PropertyMap::new()
        } else {
            self.read_props(rec.props_addr)?
        };
        Ok(Edge {
            id,
            from: rec.from_nid,
            to: rec.to_nid,
            props,
        })
    }

    /// Replaces an edge's properties by appending a fresh record and
    /// rewriting `props_addr` (0 for an empty map).
    pub fn update_edge(&mut self, id: EdgeId, props: PropertyMap) -> Result<()> {
        reject_internal_values(&props)?;
        let mut rec = self.live_edge_record(id)?;

        rec.props_addr = if props.is_empty() {
            0
        } else {
            let bytes = codec::encode_record(&props)?;
            self.append_props(&bytes)?
        };
        self.store_edge_record(id, rec)
    }

    /// Unlinks an edge from both adjacency lists in O(1) and tombstones it.
    /// Deleting a tombstoned edge succeeds.
    pub fn delete_edge(&mut self, id: EdgeId) -> Result<()> {
        self.check_edge_id(id)?;
        let rec = self.load_edge_record(id)?;
        if rec.from_nid == NULL_NODE_ID {
            return Ok(());
        }

        // Pull every record the unlink touches so corruption aborts the
        // operation before any mutation.
        for eid in [rec.prev_1, rec.next_1, rec.prev_2, rec.next_2] {
            if eid != NULL_EDGE_ID {
                self.load_edge_record(eid)?;
            }
        }
        self.load_node_slot(rec.from_nid)?;
        self.load_node_slot(rec.to_nid)?;

        // Source side.
        if rec.prev_1 != NULL_EDGE_ID {
            let mut prev = self.load_edge_record(rec.prev_1)?;
            prev.next_1 = rec.next_1;
            self.store_edge_record(rec.prev_1, prev)?;
        } else {
            let mut slot = self.load_node_slot(rec.from_nid)?;
            slot.edge_from = rec.next_1;
            self.store_node_slot(rec.from_nid, slot)?;
        }
        if rec.next_1 != NULL_EDGE_ID {
            let mut next = self.load_edge_record(rec.next_1)?;
            next.prev_1 = rec.prev_1;
            self.store_edge_record(rec.next_1, next)?;
        }

        // Destination side.
        if rec.prev_2 != NULL_EDGE_ID {
            let mut prev = self.load_edge_record(rec.prev_2)?;
            prev.next_2 = rec.next_2;
            self.store_edge_record(rec.prev_2, prev)?;
        } else {
            let mut slot = self.load_node_slot(rec.to_nid)?;
            slot.edge_to = rec.next_2;
            self.store_node_slot(rec.to_nid, slot)?;
        }
        if rec.next_2 != NULL_EDGE_ID {
            let mut next = self.load_edge_record(rec.next_2)?;
            next.prev_2 = rec.prev_2;
            self.store_edge_record(rec.next_2, next)?;
        }

        let mut dead = self.load_edge_record(id)?;
        dead.from_nid = NULL_NODE_ID;
        self.store_edge_record(id, dead)
    }

    /// Lazily walks the outgoing adjacency list, newest edge first.
    pub fn edges_from(&mut self, node: NodeId) -> Result<AdjacencyIter<'_>> {
        let slot = self.live_node_slot(node)?;
        Ok(AdjacencyIter {
            store: self,
            next: slot.edge_from,
            dir: Direction::Outgoing,
        })
    }

    /// Lazily walks the incoming adjacency list, newest edge first.
    pub fn edges_to(&mut self, node: NodeId) -> Result<AdjacencyIter<'_>> {
        let slot = self.live_node_slot(node)?;
        Ok(AdjacencyIter {
            store: self,
            next: slot.edge_to,
            dir: Direction::Incoming,
        })
    }

    /// Ids of all live nodes, tombstones skipped.
    pub fn node_ids(&mut self) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        for id in 1..self.cur_node_id {
            if self.load_node_slot(id)?.addr != 0 {
                out.push(id);
            }
        }
        Ok(out)
    }

    /// Ids of all live edges, tombstones skipped.
    pub fn edge_ids(&mut self) -> Result<Vec<EdgeId>> {
        let mut out = Vec::new();
        for id in 1..self.cur_eid {
            if self.load_edge_record(id)?.from_nid != NULL_NODE_ID {
                out.push(id);
            }
        }
        Ok(out)
    }

    pub(crate) fn require_node(&mut self, id: NodeId) -> Result<()> {
        self.live_node_slot(id).map(|_| ())
    }

    fn check_node_id(&self, id: NodeId) -> Result<()> {
        if id == NULL_NODE_ID || id >= self.cur_node_id {
            return Err(GraphError::NotFound("node"));
        }
        Ok(())
    }

    fn check_edge_id(&self, id: EdgeId) -> Result<()> {
        if id == NULL_EDGE_ID || id >= self.cur_eid {
            return Err(GraphError::NotFound("edge"));
        }
        Ok(())
    }

    fn live_node_slot(&mut self, id: NodeId) -> Result<NodeSlot> {
        self.check_node_id(id)?;
        let slot = self.load_node_slot(id)?;
        if slot.addr == 0 {
            return Err(GraphError::NotFound("node"));
        }
        Ok(slot)
    }

    fn live_edge_record(&mut self, id: EdgeId) -> Result<EdgeRecord> {
        self.check_edge_id(id)?;
        let rec = self.load_edge_record(id)?;
        if rec.from_nid == NULL_NODE_ID {
            return Err(GraphError::NotFound("edge"));
        }
        Ok(rec)
    }

    fn load_node_slot(&mut self, id: NodeId) -> Result<NodeSlot> {
        if let Some(slot) = self.node_cache.get(&id) {
            return Ok(*slot);
        }
        let mut buf = [0u8; 12];
        self.node_ids.read_exact_at(node_slot_offset(id), &mut buf)?;
        let slot = NodeSlot::from_bytes(&buf);
        self.node_cache.put(id, slot);
        Ok(slot)
    }

    fn store_node_slot(&mut self, id: NodeId, slot: NodeSlot) -> Result<()> {
        self.node_ids
            .write_all_at(node_slot_offset(id), &slot.to_bytes())?;
        self.node_cache.put(id, slot);
        Ok(())
    }

    fn load_edge_record(&mut self, id: EdgeId) -> Result<EdgeRecord> {
        if let Some(rec) = self.edge_cache.get(&id) {
            return Ok(*rec);
        }
        let mut buf = [0u8; 28];
        self.edges.read_exact_at(edge_record_offset(id), &mut buf)?;
        let rec = EdgeRecord::from_bytes(&buf);
        self.edge_cache.put(id, rec);
        Ok(rec)
    }

    fn store_edge_record(&mut self, id: EdgeId, rec: EdgeRecord) -> Result<()> {
        self.edges
            .write_all_at(edge_record_offset(id), &rec.to_bytes())?;
        self.edge_cache.put(id, rec);
        Ok(())
    }

    /// Appends an encoded property record at the current free address,
    /// advancing and persisting `cur_node_addr`.
    fn append_props(&mut self, bytes: &[u8]) -> Result<u32> {
        let addr = self.cur_node_addr;
        let next = addr
            .checked_add(bytes.len() as u32)
            .ok_or_else(|| GraphError::InvalidArgument("properties file is full".into()))?;
        self.properties.write_all_at(addr as u64, bytes)?;
        self.properties.write_all_at(0, &next.to_be_bytes())?;
        self.cur_node_addr = next;
        Ok(addr)
    }

    fn read_props(&mut self, addr: u32) -> Result<PropertyMap> {
        let mut len_buf = [0u8; 4];
        self.properties.read_exact_at(addr as u64, &mut len_buf)?;
        let rec_len = u32::from_be_bytes(len_buf);
        if rec_len < codec::MIN_RECORD_LEN {
            return Err(GraphError::Corruption(format!(
                "property record at {addr} has implausible length {rec_len}"
            )));
        }
        let mut buf = vec![0u8; rec_len as usize];
        self.properties.read_exact_at(addr as u64, &mut buf)?;
        codec::decode_record(&buf)
    }

    fn collect_list(&mut self, head: EdgeId, dir: Direction) -> Result<Vec<EdgeId>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut cur = head;
        while cur != NULL_EDGE_ID {
            if !seen.insert(cur) {
                return Err(GraphError::Corruption("cycle in adjacency list".into()));
            }
            let rec = self.load_edge_record(cur)?;
            if rec.from_nid == NULL_NODE_ID {
                return Err(GraphError::Corruption(
                    "tombstoned edge linked in adjacency list".into(),
                ));
            }
            out.push(cur);
            cur = match dir {
                Direction::Outgoing => rec.next_1,
                Direction::Incoming => rec.next_2,
            };
        }
        Ok(out)
    }
}

/// Walks one adjacency list, yielding edge ids in LIFO insertion order.
/// Not restartable; a tombstoned edge reached while still linked is
/// reported as corruption.
pub struct AdjacencyIter<'a> {
    store: &'a mut GraphStore,
    next: EdgeId,
    dir: Direction,
}

impl Iterator for AdjacencyIter<'_> {
    type Item = Result<EdgeId>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == NULL_EDGE_ID {
            return None;
        }
        let cur = self.next;
        match self.store.load_edge_record(cur) {
            Ok(rec) => {
                if rec.from_nid == NULL_NODE_ID {
                    self.next = NULL_EDGE_ID;
                    return Some(Err(GraphError::Corruption(
                        "tombstoned edge linked in adjacency list".into(),
                    )));
                }
                self.next = match self.dir {
                    Direction::Outgoing => rec.next_1,
                    Direction::Incoming => rec.next_2,
                };
                Some(Ok(cur))
            }
            Err(err) => {
                self.next = NULL_EDGE_ID;
                Some(Err(err))
            }
        }
    }
}

fn cache_capacity(size: usize) -> NonZeroUsize {
    NonZeroUsize::new(size).unwrap_or(NonZeroUsize::new(1024).expect("nonzero literal"))
}

fn bump_id(id: u32, what: &str) -> Result<u32> {
    if id >= MAX_ID {
        return Err(GraphError::InvalidArgument(format!(
            "{what} id space exhausted"
        )));
    }
    Ok(id + 1)
}

fn reject_internal_values(props: &PropertyMap) -> Result<()> {
    for (key, value) in props.iter() {
        if value.is_internal() {
            return Err(GraphError::InvalidArgument(format!(
                "property {key:?} uses a value type reserved for internal fields"
            )));
        }
    }
    Ok(())
}

/// Reads the properties-file header, initialising a fresh file to the
/// first free address just past the header itself.
fn read_or_init_addr_header(file: &StoreFile) -> Result<u32> {
    if file.len()? == 0 {
        file.write_all_at(0, &INITIAL_PROP_ADDR.to_be_bytes())?;
        return Ok(INITIAL_PROP_ADDR);
    }
    let mut buf = [0u8; 4];
    file.read_exact_at(0, &mut buf)?;
    let addr = u32::from_be_bytes(buf);
    if addr < INITIAL_PROP_ADDR {
        return Err(GraphError::Corruption(format!(
            "properties header points inside itself ({addr})"
        )));
    }
    if addr as u64 > file.len()? {
        return Err(GraphError::Corruption(format!(
            "properties header points past end of file ({addr})"
        )));
    }
    Ok(addr)
}

/// Reads an id-table header (a signed counter), initialising a fresh file
/// to 1. Id 0 is reserved as the null id.
fn read_or_init_id_header(file: &StoreFile, what: &str) -> Result<u32> {
    if file.len()? == 0 {
        file.write_all_at(0, &1i32.to_be_bytes())?;
        return Ok(1);
    }
    let mut buf = [0u8; 4];
    file.read_exact_at(0, &mut buf)?;
    let id = i32::from_be_bytes(buf);
    if id < 1 {
        return Err(GraphError::Corruption(format!(
            "{what} header holds invalid counter {id}"
        )));
    }
    Ok(id as u32)
}
