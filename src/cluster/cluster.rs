use std::collections::HashMap;
use std::sync::Arc;

use log::{error, info};

use crate::cluster::replica_set::{Closeable, ReplicaSet};
use crate::cluster::router::ShardRouter;
use crate::error::{AppError, Result, ResultExt};

/// A routing key: numeric ids and text aliases are both accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardKey<'a> {
    Numeric(u64),
    Text(&'a str),
}

impl From<u64> for ShardKey<'_> {
    fn from(key: u64) -> Self {
        ShardKey::Numeric(key)
    }
}

impl<'a> From<&'a str> for ShardKey<'a> {
    fn from(key: &'a str) -> Self {
        ShardKey::Text(key)
    }
}

impl<'a> From<&'a String> for ShardKey<'a> {
    fn from(key: &'a String) -> Self {
        ShardKey::Text(key.as_str())
    }
}

/// Shard number -> replica set, resolved through a [`ShardRouter`].
pub struct Cluster<H> {
    router: ShardRouter,
    shards: HashMap<u32, ReplicaSet<H>>,
}

impl<H> Cluster<H> {
    /// Fails with `BadRequest` unless every shard number the router can produce has a replica set.
    pub fn new(router: ShardRouter, shards: HashMap<u32, ReplicaSet<H>>) -> Result<Self> {
        if let Some(missing) = router.shard_numbers().find(|n| !shards.contains_key(n)) {
            return Err(AppError::bad_request(format!(
                "no replica set for shard {} of {}",
                missing,
                router.shard_count()
            )));
        }
        Ok(Self { router, shards })
    }

    /// Builds a cluster from replica sets listed in shard order.
    pub fn from_replica_sets(replica_sets: Vec<ReplicaSet<H>>) -> Result<Self> {
        let router = ShardRouter::new(replica_sets.len() as u32)?;
        let shards = router.shard_numbers().zip(replica_sets).collect();
        Self::new(router, shards)
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    pub fn shard_number<'a>(&self, key: impl Into<ShardKey<'a>>) -> u32 {
        match key.into() {
            ShardKey::Numeric(k) => self.router.shard_number_numeric(k),
            ShardKey::Text(k) => self.router.shard_number_text(k),
        }
    }

    pub fn replica_set_for<'a>(&self, key: impl Into<ShardKey<'a>>) -> Result<&ReplicaSet<H>> {
        let number = self.shard_number(key);
        self.shards
            .get(&number)
            .ok_or_else(|| AppError::internal(format!("shard {} is not configured", number)))
    }

    pub fn write_for<'a>(&self, key: impl Into<ShardKey<'a>>) -> Result<&Arc<H>> {
        self.replica_set_for(key).map(ReplicaSet::write_repo)
    }

    pub fn read_for<'a>(&self, key: impl Into<ShardKey<'a>>) -> Result<&Arc<H>> {
        self.replica_set_for(key).map(ReplicaSet::read_repo)
    }

    pub fn replica_sets(&self) -> impl Iterator<Item = (u32, &ReplicaSet<H>)> {
        self.shards.iter().map(|(n, set)| (*n, set))
    }
}

impl<H: Closeable> Cluster<H> {
    /// Closes every shard, continuing past failures, and returns all of them joined.
    pub fn close(&self) -> Result<()> {
        let mut numbers: Vec<u32> = self.shards.keys().copied().collect();
        numbers.sort_unstable();

        let mut errors = Vec::new();
        for number in numbers {
            if let Err(e) = self.shards[&number].close().with_context(|| format!("shard {}", number)) {
                error!("Failed to close shard {}: {}", number, e);
                errors.push(e);
            }
        }

        match AppError::join(errors) {
            Some(err) => Err(err),
            None => {
                info!("Closed {} shards", self.shards.len());
                Ok(())
            },
        }
    }
}
