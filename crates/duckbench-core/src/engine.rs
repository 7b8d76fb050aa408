//! The SQL engine seam.
//!
//! Everything the benchmark does to the database goes through [`Engine`]:
//! DuckDB/MotherDuck in production, DataFusion for local runs and tests.

use async_trait::async_trait;
use std::path::Path;

use crate::{quote_identifier, QueryResult, Result};

#[async_trait]
pub trait Engine: Send + Sync {
    /// Short engine name for log output
    fn name(&self) -> &'static str;

    /// Engine version string as reported by the engine itself
    async fn version(&self) -> Result<String>;

    /// Run a DDL/DML statement, discarding any result
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Run a query, timing execution only, then fetch up to `max_rows` rows
    async fn query(&self, sql: &str, max_rows: usize) -> Result<QueryResult>;

    /// `SELECT COUNT(*)` over an already-quoted relation name
    async fn count_rows(&self, relation: &str) -> Result<u64>;

    /// Create (or replace) `table` from a parquet file
    async fn load_parquet(&self, schema: &str, table: &str, path: &Path) -> Result<()>;

    /// Database whose catalog entries belong to this session, when the
    /// engine's information_schema spans several attached databases
    async fn current_catalog(&self) -> Result<Option<String>> {
        Ok(None)
    }

    /// Create the schema if it does not exist yet
    async fn ensure_schema(&self, schema: &str) -> Result<()> {
        self.execute(&format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_identifier(schema)
        ))
        .await
    }

    /// Textual execution plan; with `analyze` the statement is executed once.
    ///
    /// Both DuckDB and DataFusion return the plan text in the last column.
    async fn explain(&self, sql: &str, analyze: bool) -> Result<String> {
        let prefix = if analyze { "EXPLAIN ANALYZE" } else { "EXPLAIN" };
        let result = self.query(&format!("{} {}", prefix, sql), usize::MAX).await?;

        let output = result
            .rows
            .iter()
            .filter_map(|row| row.last().cloned())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(output)
    }
}
