pub mod cluster;
pub mod replica_set;
pub mod router;

pub use cluster::{Cluster, ShardKey};
pub use replica_set::{Closeable, ReplicaSet};
pub use router::{shard_for_numeric, shard_for_text, ShardRouter, SHARD_BASE};
