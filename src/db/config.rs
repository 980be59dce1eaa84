use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base filename stem; the engine owns `<db_name>.properties`,
    /// `<db_name>.node_ids` and `<db_name>.edges`.
    pub db_name: String,
    pub node_cache_size: usize,
    pub edge_cache_size: usize,
    /// How long a traversal's visited set may sit idle before eviction.
    pub neighbour_query_ttl: Duration,
    /// Upper bound on concurrently remembered traversal states.
    pub query_state_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_name: "db".into(),
            node_cache_size: 1024,
            edge_cache_size: 4096,
            neighbour_query_ttl: Duration::from_secs(60),
            query_state_capacity: 128,
        }
    }
}

impl Config {
    pub fn named(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            ..Self::default()
        }
    }
}
