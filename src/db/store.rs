use async_trait::async_trait;

use crate::db::value::{SqlRow, SqlValue};
use crate::error::Result;

/// Runs parameterised statements. Implemented by pooled handles and open transactions alike.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Executes a statement and returns the number of affected rows.
    async fn execute(&self, statement: &str, params: &[SqlValue]) -> Result<u64>;

    async fn query(&self, statement: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>>;
}

/// An open transaction. Dropping it without `commit` discards its writes.
#[async_trait]
pub trait Transaction: Executor {
    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// A store handle that can open transactions.
#[async_trait]
pub trait Store: Executor {
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}
