pub mod models;
pub mod ops;
pub mod postgres;
pub mod store;
pub mod upsert;
pub mod value;

pub use postgres::PostgresClient;
pub use store::{Executor, Store, Transaction};
pub use upsert::{UpsertRecord, UpsertTarget, UpsertWriter, MAX_BIND_PARAMETERS};
pub use value::{SqlRow, SqlValue};
