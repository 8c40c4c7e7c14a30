use derive_where::derive_where;
use serde::{Deserialize, Serialize};

use crate::bson::{Document, Timestamp};

/// Struct modeling a cluster time reported by the server.
///
/// Cluster times are totally ordered by their timestamp; the signature is carried along
/// untouched so it can be gossiped back to the cluster.
///
/// See [the MongoDB documentation](https://www.mongodb.com/docs/manual/core/read-isolation-consistency-recency/)
/// for more information.
#[derive(Debug, Deserialize, Clone, Serialize)]
#[derive_where(PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTime {
    pub(crate) cluster_time: Timestamp,

    #[derive_where(skip)]
    #[serde(default)]
    pub(crate) signature: Document,
}

impl ClusterTime {
    /// Constructs a cluster time from a timestamp and the signature the server attached to it.
    pub fn new(cluster_time: Timestamp, signature: Document) -> Self {
        Self {
            cluster_time,
            signature,
        }
    }

    /// The logical timestamp.
    pub fn timestamp(&self) -> Timestamp {
        self.cluster_time
    }
}

impl Eq for ClusterTime {}

impl std::cmp::Ord for ClusterTime {
    fn cmp(&self, other: &ClusterTime) -> std::cmp::Ordering {
        self.cluster_time.cmp(&other.cluster_time)
    }
}

impl std::cmp::PartialOrd for ClusterTime {
    fn partial_cmp(&self, other: &ClusterTime) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
