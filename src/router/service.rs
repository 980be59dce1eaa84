use parking_lot::Mutex;

use crate::db::GraphDB;
use crate::error::Result;
use crate::model::{Edge, EdgeId, EdgeWithEndpoints, Node, NodeId, PropertyMap};

/// The engine operation surface as seen by the router.
///
/// A transport exposing a remote engine implements this; errors reaching
/// the router through a transport may additionally be `Unreachable` when
/// the endpoint does not answer within its deadline.
pub trait GraphService: Send + Sync {
    fn create_node(&self, props: PropertyMap) -> Result<NodeId>;
    fn get_node(&self, id: NodeId) -> Result<Node>;
    fn update_node(&self, id: NodeId, props: PropertyMap) -> Result<()>;
    fn delete_node(&self, id: NodeId) -> Result<()>;
    fn create_edge(&self, from: NodeId, props: PropertyMap, to: NodeId) -> Result<EdgeId>;
    fn get_edge(&self, id: EdgeId, want_from: bool, want_to: bool) -> Result<EdgeWithEndpoints>;
    fn update_edge(&self, id: EdgeId, props: PropertyMap) -> Result<()>;
    fn delete_edge(&self, id: EdgeId) -> Result<()>;
    fn edges_from(&self, node: NodeId, filter: Option<PropertyMap>) -> Result<Vec<Edge>>;
    fn edges_to(&self, node: NodeId, filter: Option<PropertyMap>) -> Result<Vec<Edge>>;
    fn nodes_by_properties(&self, query: PropertyMap) -> Result<Vec<Node>>;
    fn edges_by_properties(&self, query: PropertyMap) -> Result<Vec<Edge>>;
    fn find_neighbours(
        &self,
        start: NodeId,
        hops: u32,
        query_id: &str,
        node_props: Option<PropertyMap>,
        edge_props: Option<PropertyMap>,
    ) -> Result<Vec<Node>>;
    fn finish_query(&self, query_id: &str) -> Result<()>;
}

/// An engine living in this process. The engine itself is single-writer,
/// so the whole database sits behind one mutex; the router may call from
/// several threads but each call runs alone.
pub struct LocalShard {
    db: Mutex<GraphDB>,
}

impl LocalShard {
    pub fn new(db: GraphDB) -> Self {
        Self { db: Mutex::new(db) }
    }
}

impl GraphService for LocalShard {
    fn create_node(&self, props: PropertyMap) -> Result<NodeId> {
        self.db.lock().create_node(props)
    }

    fn get_node(&self, id: NodeId) -> Result<Node> {
        self.db.lock().get_node(id)
    }

    fn update_node(&self, id: NodeId, props: PropertyMap) -> Result<()> {
        self.db.lock().update_node(id, props)
    }

    fn delete_node(&self, id: NodeId) -> Result<()> {
        self.db.lock().delete_node(id)
    }

    fn create_edge(&self, from: NodeId, props: PropertyMap, to: NodeId) -> Result<EdgeId> {
        self.db.lock().create_edge(from, props, to)
    }

    fn get_edge(&self, id: EdgeId, want_from: bool, want_to: bool) -> Result<EdgeWithEndpoints> {
        self.db.lock().get_edge_with(id, want_from, want_to)
    }

    fn update_edge(&self, id: EdgeId, props: PropertyMap) -> Result<()> {
        self.db.lock().update_edge(id, props)
    }

    fn delete_edge(&self, id: EdgeId) -> Result<()> {
        self.db.lock().delete_edge(id)
    }

    fn edges_from(&self, node: NodeId, filter: Option<PropertyMap>) -> Result<Vec<Edge>> {
        self.db.lock().get_edges_from(node, filter.as_ref())
    }

    fn edges_to(&self, node: NodeId, filter: Option<PropertyMap>) -> Result<Vec<Edge>> {
        self.db.lock().get_edges_to(node, filter.as_ref())
    }

    fn nodes_by_properties(&self, query: PropertyMap) -> Result<Vec<Node>> {
        self.db.lock().get_nodes_by_properties(&query)
    }

    fn edges_by_properties(&self, query: PropertyMap) -> Result<Vec<Edge>> {
        self.db.lock().get_edges_by_properties(&query)
    }

    fn find_neighbours(
        &self,
        start: NodeId,
        hops: u32,
        query_id: &str,
        node_props: Option<PropertyMap>,
        edge_props: Option<PropertyMap>,
    ) -> Result<Vec<Node>> {
        self.db
            .lock()
            .find_neighbours(start, hops, query_id, node_props.as_ref(), edge_props.as_ref())
    }

    fn finish_query(&self, query_id: &str) -> Result<()> {
        self.db.lock().finish_query(query_id);
        Ok(())
    }
}
