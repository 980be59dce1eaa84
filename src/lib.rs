pub mod db;
pub mod error;
pub mod model;
pub mod router;
pub mod storage;

pub use crate::db::{Config, GraphDB, PropertyFilter};
pub use crate::error::{GraphError, Result};
pub use crate::model::{
    Edge, EdgeId, EdgeWithEndpoints, Node, NodeId, PropertyMap, PropertyValue, NULL_EDGE_ID,
    NULL_NODE_ID,
};
pub use crate::router::{ExternalId, GraphService, LocalShard, RoutedEdge, RoutedNode, Router};
pub use crate::storage::GraphStore;
