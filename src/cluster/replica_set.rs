use std::sync::Arc;

use crate::error::{AppError, Result, ResultExt};

/// Handles that hold releasable resources (connection pools).
pub trait Closeable {
    fn close(&self) -> Result<()>;
}

/// One write-capable handle plus one read-only handle for the same shard.
///
/// There is no promotion: if the write handle is down, writes fail.
pub struct ReplicaSet<H> {
    write: Arc<H>,
    read: Arc<H>,
}

impl<H> Clone for ReplicaSet<H> {
    fn clone(&self) -> Self {
        Self { write: self.write.clone(), read: self.read.clone() }
    }
}

impl<H> ReplicaSet<H> {
    pub fn new(write: Arc<H>, read: Arc<H>) -> Self {
        Self { write, read }
    }

    /// Both roles served by the same handle.
    pub fn single(handle: Arc<H>) -> Self {
        Self { write: handle.clone(), read: handle }
    }

    pub fn write_repo(&self) -> &Arc<H> {
        &self.write
    }

    pub fn read_repo(&self) -> &Arc<H> {
        &self.read
    }
}

impl<H: Closeable> ReplicaSet<H> {
    /// Closes both handles, reporting every failure.
    pub fn close(&self) -> Result<()> {
        let mut errors = Vec::new();
        if let Err(e) = self.write.close().context("close write handle") {
            errors.push(e);
        }
        if !Arc::ptr_eq(&self.write, &self.read) {
            if let Err(e) = self.read.close().context("close read handle") {
                errors.push(e);
            }
        }
        match AppError::join(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
