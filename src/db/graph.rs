use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Instant;

use lru::LruCache;
use tracing::debug;

use crate::db::config::Config;
use crate::db::filter::PropertyFilter;
use crate::error::{GraphError, Result};
use crate::model::{Edge, EdgeId, EdgeWithEndpoints, Node, NodeId, PropertyMap};
use crate::storage::GraphStore;

/// Visited set for one logical traversal. Repeated `find_neighbours`
/// calls naming the same query id share it, so a cross-shard fan-out
/// deduplicates across calls.
struct QueryState {
    visited: HashSet<NodeId>,
    touched: Instant,
}

impl QueryState {
    fn new() -> Self {
        Self {
            visited: HashSet::new(),
            touched: Instant::now(),
        }
    }
}

/// Graph operations over one storage engine: CRUD passthrough,
/// property-predicate scans, and the bounded-depth neighbourhood search.
pub struct GraphDB {
    store: GraphStore,
    config: Config,
    query_states: LruCache<String, QueryState>,
}

impl std::fmt::Debug for GraphDB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphDB")
            .field("store", &self.store)
            .field("config", &self.config)
            .field("live_queries", &self.query_states.len())
            .finish()
    }
}

impl GraphDB {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(dir, Config::default())
    }

    pub fn open_with_config(dir: impl AsRef<Path>, config: Config) -> Result<Self> {
        let store = GraphStore::open(dir, &config)?;
        let capacity = NonZeroUsize::new(config.query_state_capacity)
            .unwrap_or(NonZeroUsize::new(128).expect("nonzero literal"));
        Ok(Self {
            store,
            config,
            query_states: LruCache::new(capacity),
        })
    }

    pub fn create_node(&mut self, props: PropertyMap) -> Result<NodeId> {
        self.store.create_node(props)
    }

    pub fn get_node(&mut self, id: NodeId) -> Result<Node> {
        self.store.get_node(id)
    }

    pub fn update_node(&mut self, id: NodeId, props: PropertyMap) -> Result<()> {
        self.store.update_node(id, props)
    }

    pub fn delete_node(&mut self, id: NodeId) -> Result<()> {
        self.store.delete_node(id)
    }

    pub fn create_edge(&mut self, from: NodeId, props: PropertyMap, to: NodeId) -> Result<EdgeId> {
        self.store.create_edge(from, props, to)
    }

    pub fn get_edge(&mut self, id: EdgeId) -> Result<Edge> {
        self.store.get_edge(id)
    }

    /// Fetches an edge, optionally inlining its endpoint node records.
    pub fn get_edge_with(
        &mut self,
        id: EdgeId,
        want_from: bool,
        want_to: bool,
    ) -> Result<EdgeWithEndpoints> {
        let edge = self.store.get_edge(id)?;
        let from_node = if want_from {
            Some(self.store.get_node(edge.from)?)
        } else {
            None
        };
        let to_node = if want_to {
            Some(self.store.get_node(edge.to)?)
        } else {
            None
        };
        Ok(EdgeWithEndpoints {
            edge,
            from_node,
            to_node,
        })
    }

    pub fn update_edge(&mut self, id: EdgeId, props: PropertyMap) -> Result<()> {
        self.store.update_edge(id, props)
    }

    pub fn delete_edge(&mut self, id: EdgeId) -> Result<()> {
        self.store.delete_edge(id)
    }

    /// Outgoing edges of a node, newest first, optionally filtered by a
    /// property superset query.
    pub fn get_edges_from(
        &mut self,
        node: NodeId,
        filter: Option<&PropertyMap>,
    ) -> Result<Vec<Edge>> {
        let ids: Vec<EdgeId> = self.store.edges_from(node)?.collect::<Result<_>>()?;
        self.materialize_edges(ids, filter)
    }

    /// Incoming edges of a node, newest first.
    pub fn get_edges_to(
        &mut self,
        node: NodeId,
        filter: Option<&PropertyMap>,
    ) -> Result<Vec<Edge>> {
        let ids: Vec<EdgeId> = self.store.edges_to(node)?.collect::<Result<_>>()?;
        self.materialize_edges(ids, filter)
    }

    /// All live nodes whose property map is a superset of `query`.
    pub fn get_nodes_by_properties(&mut self, query: &PropertyMap) -> Result<Vec<Node>> {
        let mut out = Vec::new();
        for id in self.store.node_ids()? {
            let node = self.store.get_node(id)?;
            if node.props.contains_all(query) {
                out.push(node);
            }
        }
        Ok(out)
    }

    /// All live edges whose property map is a superset of `query`.
    pub fn get_edges_by_properties(&mut self, query: &PropertyMap) -> Result<Vec<Edge>> {
        let mut out = Vec::new();
        for id in self.store.edge_ids()? {
            let edge = self.store.get_edge(id)?;
            if edge.props.contains_all(query) {
                out.push(edge);
            }
        }
        Ok(out)
    }

    /// Scan with the richer predicate: exact pairs, forbidden keys, range
    /// bounds.
    pub fn get_nodes_by_filter(&mut self, filter: &PropertyFilter) -> Result<Vec<Node>> {
        let mut out = Vec::new();
        for id in self.store.node_ids()? {
            let node = self.store.get_node(id)?;
            if filter.matches(&node.props) {
                out.push(node);
            }
        }
        Ok(out)
    }

    pub fn get_edges_by_filter(&mut self, filter: &PropertyFilter) -> Result<Vec<Edge>> {
        let mut out = Vec::new();
        for id in self.store.edge_ids()? {
            let edge = self.store.get_edge(id)?;
            if filter.matches(&edge.props) {
                out.push(edge);
            }
        }
        Ok(out)
    }

    /// Breadth-first neighbourhood search over both edge directions,
    /// bounded by `hops`. The start node is never part of the result;
    /// `hops == 0` yields an empty set. Nodes failing `node_props` are
    /// neither returned nor expanded; edges failing `edge_props` are not
    /// crossed.
    pub fn find_neighbours(
        &mut self,
        start: NodeId,
        hops: u32,
        query_id: &str,
        node_props: Option<&PropertyMap>,
        edge_props: Option<&PropertyMap>,
    ) -> Result<Vec<Node>> {
        if query_id.is_empty() {
            return Err(GraphError::InvalidArgument(
                "query id must be non-empty".into(),
            ));
        }
        self.store.require_node(start)?;
        self.sweep_query_states();

        let mut state = self
            .query_states
            .pop(query_id)
            .unwrap_or_else(QueryState::new);
        state.touched = Instant::now();
        debug!(
            query = query_id,
            start,
            hops,
            visited = state.visited.len(),
            "graph.find_neighbours"
        );

        let result = self.traverse(start, hops, &mut state.visited, node_props, edge_props);
        self.query_states.put(query_id.to_string(), state);
        result
    }

    /// Drops the visited set of a finished traversal.
    pub fn finish_query(&mut self, query_id: &str) {
        self.query_states.pop(query_id);
    }

    pub fn next_node_id(&self) -> NodeId {
        self.store.next_node_id()
    }

    pub fn next_edge_id(&self) -> EdgeId {
        self.store.next_edge_id()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }

    fn traverse(
        &mut self,
        start: NodeId,
        hops: u32,
        visited: &mut HashSet<NodeId>,
        node_props: Option<&PropertyMap>,
        edge_props: Option<&PropertyMap>,
    ) -> Result<Vec<Node>> {
        visited.insert(start);
        let mut frontier = vec![start];
        let mut found = Vec::new();

        for _ in 0..hops {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for node in frontier {
                let out: Vec<EdgeId> = self.store.edges_from(node)?.collect::<Result<_>>()?;
                let inc: Vec<EdgeId> = self.store.edges_to(node)?.collect::<Result<_>>()?;
                for eid in out {
                    let edge = self.store.get_edge(eid)?;
                    if edge_allowed(&edge, edge_props) {
                        self.consider(edge.to, visited, node_props, &mut found, &mut next)?;
                    }
                }
                for eid in inc {
                    let edge = self.store.get_edge(eid)?;
                    if edge_allowed(&edge, edge_props) {
                        self.consider(edge.from, visited, node_props, &mut found, &mut next)?;
                    }
                }
            }
            frontier = next;
        }
        Ok(found)
    }

    fn consider(
        &mut self,
        candidate: NodeId,
        visited: &mut HashSet<NodeId>,
        node_props: Option<&PropertyMap>,
        found: &mut Vec<Node>,
        next: &mut Vec<NodeId>,
    ) -> Result<()> {
        if visited.contains(&candidate) {
            return Ok(());
        }
        let node = self.store.get_node(candidate)?;
        if let Some(query) = node_props {
            if !node.props.contains_all(query) {
                return Ok(());
            }
        }
        visited.insert(candidate);
        next.push(candidate);
        found.push(node);
        Ok(())
    }

    fn materialize_edges(
        &mut self,
        ids: Vec<EdgeId>,
        filter: Option<&PropertyMap>,
    ) -> Result<Vec<Edge>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let edge = self.store.get_edge(id)?;
            if filter.is_none_or(|query| edge.props.contains_all(query)) {
                out.push(edge);
            }
        }
        Ok(out)
    }

    fn sweep_query_states(&mut self) {
        let ttl = self.config.neighbour_query_ttl;
        let expired: Vec<String> = self
            .query_states
            .iter()
            .filter(|(_, state)| state.touched.elapsed() > ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            self.query_states.pop(&id);
        }
    }
}

fn edge_allowed(edge: &Edge, edge_props: Option<&PropertyMap>) -> bool {
    edge_props.is_none_or(|query| edge.props.contains_all(query))
}
