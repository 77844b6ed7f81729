use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use log::{error, info, warn};
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

use crate::cluster::Closeable;
use crate::config::PostgresSettings;
use crate::db::store::{Executor, Store, Transaction};
use crate::db::value::{SqlRow, SqlValue};
use crate::error::{AppError, Result};

/// Split SQL into statements, respecting dollar-quoted strings.
/// This handles PostgreSQL function definitions that use $$ ... $$ blocks.
fn split_sql_statements(sql: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut start = 0;
    let mut in_dollar_quote = false;
    let bytes = sql.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if i + 1 < bytes.len() && bytes[i] == b'$' && bytes[i + 1] == b'$' {
            in_dollar_quote = !in_dollar_quote;
            i += 2;
            continue;
        }

        if bytes[i] == b';' && !in_dollar_quote {
            let stmt = &sql[start..i];
            if !stmt.trim().is_empty() {
                statements.push(stmt);
            }
            start = i + 1;
        }
        i += 1;
    }

    if start < sql.len() {
        let stmt = &sql[start..];
        if !stmt.trim().is_empty() {
            statements.push(stmt);
        }
    }

    statements
}

fn bind(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

fn to_sql_row(row: &tokio_postgres::Row) -> Result<SqlRow> {
    let columns = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values = (0..row.len())
        .map(|i| row.try_get::<_, SqlValue>(i).map_err(AppError::from))
        .collect::<Result<Vec<_>>>()?;
    Ok(SqlRow::new(columns, values))
}

/// Runs one statement under the handle's statement timeout.
async fn timed<T, F>(timeout: Duration, statement: &str, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, tokio_postgres::Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(|e| {
            error!("Statement failed: {:?} ({})", e, statement);
            AppError::from(e)
        }),
        Err(_) => {
            error!("Statement timed out after {:?} ({})", timeout, statement);
            Err(AppError::internal(format!("statement timed out after {:?}", timeout)))
        },
    }
}

async fn execute_on(
    client: &tokio_postgres::Client,
    timeout: Duration,
    statement: &str,
    params: &[SqlValue],
) -> Result<u64> {
    let bound = bind(params);
    timed(timeout, statement, client.execute(statement, &bound)).await
}

async fn query_on(
    client: &tokio_postgres::Client,
    timeout: Duration,
    statement: &str,
    params: &[SqlValue],
) -> Result<Vec<SqlRow>> {
    let bound = bind(params);
    let rows = timed(timeout, statement, client.query(statement, &bound)).await?;
    rows.iter().map(to_sql_row).collect()
}

/// PostgreSQL handle with connection pooling.
///
/// One of these backs each role (write or read) of a shard's replica set. Uses
/// `deadpool-postgres` for connection management.
#[derive(Clone)]
pub struct PostgresClient {
    pub pool: Pool,
    statement_timeout: Duration,
}

impl PostgresClient {
    pub async fn new(settings: PostgresSettings) -> anyhow::Result<Self> {
        info!("Connecting to PostgreSQL at {}:{}/{}", settings.host, settings.port, settings.database);

        let mut retries = 0;
        let max_retries = 3;
        #[allow(unused_assignments)]
        let mut last_error: Option<anyhow::Error> = None;

        loop {
            let mut pg_config = tokio_postgres::Config::new();
            pg_config
                .host(&settings.host)
                .port(settings.port)
                .user(&settings.user)
                .password(&settings.password)
                .dbname(&settings.database);

            let mgr_config = ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            };

            let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
            let pool = Pool::builder(mgr)
                .max_size(settings.pool_size)
                .build()
                .context("Failed to create PostgreSQL connection pool")?;

            match pool.get().await {
                Ok(_conn) => {
                    info!("Successfully connected to PostgreSQL at {}", settings.host);
                    return Ok(Self {
                        pool,
                        statement_timeout: settings.statement_timeout(),
                    });
                },
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("{}", e));
                    retries += 1;

                    if retries >= max_retries {
                        break;
                    }

                    let delay = Duration::from_millis(100 * 2_u64.pow(retries));
                    warn!(
                        "Failed to connect to PostgreSQL (attempt {}/{}), retrying in {:?}...",
                        retries, max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                },
            }
        }

        Err(anyhow::anyhow!(
            "Failed to connect to PostgreSQL after {} attempts: {}",
            max_retries,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string())
        ))
    }

    /// Applies `schema/postgres.sql`. Every statement in it is idempotent.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        info!("Running PostgreSQL migrations");
        let client = self.pool.get().await?;

        let schema = tokio::fs::read_to_string("schema/postgres.sql")
            .await
            .context("Failed to read schema/postgres.sql")?;

        for stmt in split_sql_statements(&schema) {
            let stmt = stmt.trim();
            if stmt.is_empty() {
                continue;
            }
            client
                .execute(stmt, &[])
                .await
                .with_context(|| format!("Failed to execute migration statement: {}", stmt))?;
        }

        info!("PostgreSQL migrations completed successfully");
        Ok(())
    }
}

#[async_trait]
impl Executor for PostgresClient {
    async fn execute(&self, statement: &str, params: &[SqlValue]) -> Result<u64> {
        let client = self.pool.get().await?;
        execute_on(&client, self.statement_timeout, statement, params).await
    }

    async fn query(&self, statement: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        let client = self.pool.get().await?;
        query_on(&client, self.statement_timeout, statement, params).await
    }
}

#[async_trait]
impl Store for PostgresClient {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let client = self.pool.get().await?;
        timed(self.statement_timeout, "BEGIN", client.batch_execute("BEGIN")).await?;
        Ok(Box::new(PostgresTransaction {
            client: Some(client),
            timeout: self.statement_timeout,
        }))
    }
}

impl Closeable for PostgresClient {
    fn close(&self) -> Result<()> {
        self.pool.close();
        Ok(())
    }
}

/// A transaction pinned to one pooled connection.
///
/// If dropped while still open (cancelled cycle), a `ROLLBACK` is issued in the background
/// before the connection goes back to the pool.
pub struct PostgresTransaction {
    client: Option<Object>,
    timeout: Duration,
}

impl PostgresTransaction {
    fn client(&self) -> Result<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::internal("transaction already finished"))
    }

    async fn finish(mut self: Box<Self>, statement: &'static str) -> Result<()> {
        let client = self
            .client
            .take()
            .ok_or_else(|| AppError::internal("transaction already finished"))?;
        timed(self.timeout, statement, client.batch_execute(statement)).await
    }
}

#[async_trait]
impl Executor for PostgresTransaction {
    async fn execute(&self, statement: &str, params: &[SqlValue]) -> Result<u64> {
        execute_on(self.client()?, self.timeout, statement, params).await
    }

    async fn query(&self, statement: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        query_on(self.client()?, self.timeout, statement, params).await
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Transaction dropped while open, rolling back");
                handle.spawn(async move {
                    if let Err(e) = client.batch_execute("ROLLBACK").await {
                        error!("Background rollback failed: {:?}", e);
                        // never hand a connection with an open transaction back to the pool
                        let _ = Object::take(client);
                    }
                });
            },
            Err(_) => {
                let _ = Object::take(client);
            },
        }
    }
}
