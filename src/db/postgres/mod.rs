mod client;

pub use client::{PostgresClient, PostgresTransaction};
