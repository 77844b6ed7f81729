use std::collections::HashMap;

use log::{debug, error};

use crate::db::store::Executor;
use crate::db::value::SqlValue;
use crate::error::{AppError, Result};

/// PostgreSQL's limit on bind parameters in a single statement.
pub const MAX_BIND_PARAMETERS: usize = 65_535;

/// Table and column layout an upsert writes into.
#[derive(Debug, Clone, Copy)]
pub struct UpsertTarget {
    pub table: &'static str,
    pub key_columns: &'static [&'static str],
    pub columns: &'static [&'static str],
    /// Keep existing rows untouched on conflict instead of overwriting them.
    pub on_conflict_do_nothing: bool,
}

impl UpsertTarget {
    fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(AppError::bad_request(format!("upsert into {}: no columns", self.table)));
        }
        if self.key_columns.is_empty() {
            return Err(AppError::bad_request(format!(
                "upsert into {}: no conflict key",
                self.table
            )));
        }
        if let Some(key) = self.key_columns.iter().find(|k| !self.columns.contains(k)) {
            return Err(AppError::bad_request(format!(
                "upsert into {}: key column {} is not written",
                self.table, key
            )));
        }
        Ok(())
    }

    fn conflict_clause(&self) -> String {
        let updates: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !self.key_columns.contains(c))
            .map(|c| format!("{} = EXCLUDED.{}", c, c))
            .collect();

        if self.on_conflict_do_nothing || updates.is_empty() {
            format!("ON CONFLICT ({}) DO NOTHING", self.key_columns.join(", "))
        } else {
            format!(
                "ON CONFLICT ({}) DO UPDATE SET {}",
                self.key_columns.join(", "),
                updates.join(", ")
            )
        }
    }
}

/// A record that can be flattened into one row of bind parameters, in target column order.
pub trait UpsertRecord {
    fn values(&self) -> Vec<SqlValue>;
}

/// Splits record sets into multi-row `INSERT ... ON CONFLICT` statements that stay under the
/// bind-parameter limit.
#[derive(Debug, Clone, Copy)]
pub struct UpsertWriter {
    max_bind_parameters: usize,
}

impl Default for UpsertWriter {
    fn default() -> Self {
        Self { max_bind_parameters: MAX_BIND_PARAMETERS }
    }
}

impl UpsertWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_bind_parameters(max_bind_parameters: usize) -> Self {
        Self { max_bind_parameters }
    }

    pub fn rows_per_batch(&self, column_count: usize) -> usize {
        if column_count == 0 {
            return 0;
        }
        self.max_bind_parameters / column_count
    }

    /// Builds the statement for `rows` rows: `($1, $2), ($3, $4), ...`
    pub fn build_statement(&self, target: &UpsertTarget, rows: usize) -> String {
        let cols = target.columns.len();
        let values_clauses: Vec<String> = (0..rows)
            .map(|i| {
                let start = i * cols + 1;
                let placeholders: Vec<String> =
                    (start..start + cols).map(|n| format!("${}", n)).collect();
                format!("({})", placeholders.join(", "))
            })
            .collect();

        format!(
            "INSERT INTO {} ({}) VALUES {} {}",
            target.table,
            target.columns.join(", "),
            values_clauses.join(", "),
            target.conflict_clause()
        )
    }

    /// Writes `records` in consecutive batches and returns the total affected row count.
    ///
    /// Each statement is atomic on its own; callers that need all-or-nothing across batches
    /// pass a transaction as `executor`.
    pub async fn upsert<E, R>(
        &self,
        executor: &E,
        target: &UpsertTarget,
        records: &[R],
    ) -> Result<u64>
    where
        E: Executor + ?Sized,
        R: UpsertRecord + Sync,
    {
        if records.is_empty() {
            return Ok(0);
        }
        target.validate()?;

        let cols = target.columns.len();
        let batch_size = self.rows_per_batch(cols);
        if batch_size == 0 {
            return Err(AppError::bad_request(format!(
                "upsert into {}: {} columns exceed {} bind parameters",
                target.table, cols, self.max_bind_parameters
            )));
        }

        let key_positions: Vec<usize> = target
            .key_columns
            .iter()
            .filter_map(|k| target.columns.iter().position(|c| c == k))
            .collect();

        // A statement may touch each key once; later records replace earlier ones in place.
        let mut rows: Vec<Vec<SqlValue>> = Vec::with_capacity(records.len());
        let mut seen: HashMap<String, usize> = HashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            let values = record.values();
            if values.len() != cols {
                return Err(AppError::bad_request(format!(
                    "upsert into {}: record {} has {} values, expected {}",
                    target.table,
                    i,
                    values.len(),
                    cols
                )));
            }
            let key_values: Vec<&SqlValue> = key_positions.iter().map(|p| &values[*p]).collect();
            let key = format!("{:?}", key_values);
            match seen.get(&key) {
                Some(&row) => rows[row] = values,
                None => {
                    seen.insert(key, rows.len());
                    rows.push(values);
                },
            }
        }
        if rows.len() < records.len() {
            debug!(
                "Collapsed {} duplicate keys before upserting into {}",
                records.len() - rows.len(),
                target.table
            );
        }

        let mut affected = 0;
        for chunk in rows.chunks(batch_size) {
            let statement = self.build_statement(target, chunk.len());
            let params: Vec<SqlValue> = chunk.iter().flatten().cloned().collect();

            affected += executor.execute(&statement, &params).await.map_err(|e| {
                error!("Failed to batch upsert {} rows into {}: {}", chunk.len(), target.table, e);
                e
            })?;
        }

        debug!("Upserted {} rows into {} ({} affected)", rows.len(), target.table, affected);
        Ok(affected)
    }
}
