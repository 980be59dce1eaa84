use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::model::NodeId;

/// Fleet-wide identifier: which shard an entity lives on and its id there.
/// Rendered as `"shard:local"`; opaque to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalId {
    pub shard: usize,
    pub local: NodeId,
}

impl ExternalId {
    pub fn new(shard: usize, local: NodeId) -> Self {
        Self { shard, local }
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.shard, self.local)
    }
}

impl FromStr for ExternalId {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || GraphError::InvalidArgument(format!("malformed external id {s:?}"));
        let (shard, local) = s.split_once(':').ok_or_else(malformed)?;
        let shard: usize = shard.parse().map_err(|_| malformed())?;
        let local: NodeId = local.parse().map_err(|_| malformed())?;
        if local == 0 {
            return Err(GraphError::InvalidArgument(format!(
                "external id {s:?} uses the reserved null id"
            )));
        }
        Ok(Self { shard, local })
    }
}
