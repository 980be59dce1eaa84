//! The sharded front-end.
//!
//! Routes graph operations across a fleet of engines. Entities get opaque
//! `"shard:local"` external ids; edges whose endpoints live on different
//! shards are materialized on both sides through per-edge proxy nodes, and
//! neighbourhood traversal fans out shard by shard, following proxies to
//! their home shards. Whatever transport the host uses implements
//! [`GraphService`]; [`LocalShard`] is the in-process case.

mod id;
mod service;
mod shard_router;

pub use id::ExternalId;
pub use service::{GraphService, LocalShard};
pub use shard_router::{RoutedEdge, RoutedNode, Router};
