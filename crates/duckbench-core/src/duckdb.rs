//! DuckDB / MotherDuck engine
//!
//! The DuckDB driver is synchronous; every call runs on the blocking pool
//! against a single mutex-guarded connection, so statements stay sequential.

use ::duckdb::types::Value;
use ::duckdb::{Config, Connection};
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::connect::{ConnectionSettings, EngineKind};
use crate::engine::Engine;
use crate::{quote_identifier, BenchError, QueryResult, Result};

/// Engine backed by a DuckDB connection (local file, in-memory, or `md:`)
pub struct DuckDbEngine {
    conn: Arc<Mutex<Connection>>,
    name: &'static str,
}

impl DuckDbEngine {
    /// Open a connection with the thread, memory and spill settings applied
    pub fn open(settings: &ConnectionSettings) -> Result<Self> {
        let extension_directory = settings.extension_directory();
        let config = Config::default()
            .threads(settings.threads as i64)?
            .max_memory(&format!("{}MB", settings.max_memory_mb))?
            .with(
                "temp_directory",
                settings.temp_directory.to_string_lossy().as_ref(),
            )?
            .with(
                "extension_directory",
                extension_directory.to_string_lossy().as_ref(),
            )?;

        let (conn, name) = match settings.engine {
            EngineKind::MotherDuck => {
                let token = settings.token.as_deref().ok_or_else(|| {
                    BenchError::Config(
                        "MotherDuck token not found. Set MOTHERDUCK_TOKEN in the environment or .env file."
                            .to_string(),
                    )
                })?;
                let conn = Connection::open_with_flags(format!("md:?motherduck_token={}", token), config)
                    // the connection string carries the token, keep it out of the message
                    .map_err(|e| BenchError::Connection(format!("Failed to connect to MotherDuck: {}", e)))?;
                (conn, "motherduck")
            }
            EngineKind::DuckDb => {
                let conn = match &settings.db_path {
                    Some(path) => Connection::open_with_flags(path, config),
                    None => Connection::open_in_memory_with_flags(config),
                }
                .map_err(|e| BenchError::Connection(format!("Failed to open DuckDB: {}", e)))?;
                (conn, "duckdb")
            }
            EngineKind::DataFusion => {
                return Err(BenchError::Config(
                    "DataFusion settings passed to the DuckDB engine".to_string(),
                ))
            }
        };

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            name,
        })
    }

    /// Create the MotherDuck database if needed and make it current
    pub async fn use_database(&self, database: &str) -> Result<()> {
        let quoted = quote_identifier(database);
        self.execute(&format!("CREATE DATABASE IF NOT EXISTS {}", quoted))
            .await?;
        self.execute(&format!("USE {}", quoted)).await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| BenchError::Connection("DuckDB connection lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| BenchError::Connection(format!("DuckDB task failed: {}", e)))?
    }
}

#[async_trait]
impl Engine for DuckDbEngine {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn version(&self) -> Result<String> {
        self.with_conn(|conn| {
            let version = conn.query_row("SELECT version()", [], |row| row.get::<_, String>(0))?;
            Ok(version)
        })
        .await
    }

    async fn current_catalog(&self) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let name = conn.query_row("SELECT current_database()", [], |row| row.get::<_, String>(0))?;
            Ok(Some(name))
        })
        .await
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await
    }

    async fn query(&self, sql: &str, max_rows: usize) -> Result<QueryResult> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            let start = Instant::now();
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let duration = start.elapsed();

            let columns = rows
                .as_ref()
                .map(|stmt| stmt.column_names())
                .unwrap_or_default();

            let mut preview = Vec::new();
            while preview.len() < max_rows {
                let Some(row) = rows.next()? else {
                    break;
                };
                let mut values = Vec::with_capacity(columns.len());
                for i in 0..columns.len() {
                    let value: Value = row.get(i)?;
                    values.push(format_value(&value));
                }
                preview.push(values);
            }

            Ok(QueryResult {
                duration,
                columns,
                rows: preview,
                row_count: None,
            })
        })
        .await
    }

    async fn count_rows(&self, relation: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", relation);
        self.with_conn(move |conn| {
            let count = conn.query_row(&sql, [], |row| row.get::<_, i64>(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn load_parquet(&self, schema: &str, table: &str, path: &Path) -> Result<()> {
        let sql = format!(
            "CREATE OR REPLACE TABLE {}.{} AS SELECT * FROM read_parquet('{}')",
            quote_identifier(schema),
            quote_identifier(table),
            path.to_string_lossy().replace('\'', "''")
        );
        self.execute(&sql).await
    }
}

/// Format a DuckDB value as a string
fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::TinyInt(i) => i.to_string(),
        Value::SmallInt(i) => i.to_string(),
        Value::Int(i) => i.to_string(),
        Value::BigInt(i) => i.to_string(),
        Value::HugeInt(i) => i.to_string(),
        Value::UTinyInt(u) => u.to_string(),
        Value::USmallInt(u) => u.to_string(),
        Value::UInt(u) => u.to_string(),
        Value::UBigInt(u) => u.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Double(d) => d.to_string(),
        Value::Decimal(d) => d.to_string(),
        Value::Text(s) | Value::Enum(s) => s.clone(),
        Value::Blob(b) => String::from_utf8_lossy(b).to_string(),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_engine(dir: &Path) -> DuckDbEngine {
        let settings = ConnectionSettings {
            engine: EngineKind::DuckDb,
            temp_directory: dir.to_path_buf(),
            ..ConnectionSettings::default()
        };
        DuckDbEngine::open(&settings).unwrap()
    }

    #[tokio::test]
    async fn test_query_preview_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let engine = memory_engine(dir.path());

        engine
            .execute("CREATE TABLE sales AS SELECT i AS id, i * 10 AS amount FROM range(25) t(i)")
            .await
            .unwrap();

        let result = engine
            .query("SELECT id, amount FROM sales ORDER BY id", 3)
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["id".to_string(), "amount".to_string()]);
        assert_eq!(result.rows.len(), 3);
        assert_eq!(result.rows[2], vec!["2".to_string(), "20".to_string()]);

        assert_eq!(engine.count_rows("sales").await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_explain_returns_plan_text() {
        let dir = tempfile::tempdir().unwrap();
        let engine = memory_engine(dir.path());
        engine
            .execute("CREATE TABLE t AS SELECT * FROM range(10) r(x)")
            .await
            .unwrap();

        let plan = engine
            .explain("SELECT SUM(x) FROM t", false)
            .await
            .unwrap();
        assert!(!plan.is_empty());
    }

    #[tokio::test]
    async fn test_version_reported() {
        let dir = tempfile::tempdir().unwrap();
        let engine = memory_engine(dir.path());
        let version = engine.version().await.unwrap();
        assert!(version.starts_with('v'));
    }

    #[tokio::test]
    async fn test_failed_statement_surfaces_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = memory_engine(dir.path());
        let err = engine.query("SELECT * FROM missing_table", 1).await;
        assert!(matches!(err, Err(BenchError::DuckDb(_))));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&Value::Null), "NULL");
        assert_eq!(format_value(&Value::BigInt(-42)), "-42");
        assert_eq!(format_value(&Value::Text("Contoso".to_string())), "Contoso");
    }
}
