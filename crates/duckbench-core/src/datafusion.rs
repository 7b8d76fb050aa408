//! DataFusion engine
//!
//! Local SQL execution using Apache DataFusion and Arrow. Tables live in
//! memory, so this engine is for offline runs and tests of the scaling and
//! query paths.

use async_trait::async_trait;
use datafusion::arrow::array::{Array, Int64Array};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::arrow::util::display::{ArrayFormatter, FormatOptions};
use datafusion::datasource::MemTable;
use datafusion::execution::runtime_env::RuntimeEnvBuilder;
use datafusion::prelude::*;
use datafusion::sql::TableReference;
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::connect::ConnectionSettings;
use crate::engine::Engine;
use crate::{BenchError, QueryResult, Result};

fn df_err(e: impl std::fmt::Display) -> BenchError {
    BenchError::DataFusion(e.to_string())
}

/// DataFusion engine with an in-memory catalog
pub struct DataFusionEngine {
    ctx: SessionContext,
}

impl DataFusionEngine {
    /// Create an engine with default settings
    pub fn new() -> Self {
        let config = SessionConfig::new().with_information_schema(true);
        Self {
            ctx: SessionContext::new_with_config(config),
        }
    }

    /// Create an engine honoring the thread, memory and spill settings
    pub fn with_settings(settings: &ConnectionSettings) -> Result<Self> {
        let config = SessionConfig::new()
            .with_information_schema(true)
            .with_target_partitions(settings.threads.max(1));

        let runtime = RuntimeEnvBuilder::new()
            .with_memory_limit(settings.max_memory_mb * 1024 * 1024, 1.0)
            .with_temp_file_path(&settings.temp_directory)
            .build_arc()
            .map_err(df_err)?;

        Ok(Self {
            ctx: SessionContext::new_with_config_rt(config, runtime),
        })
    }

    async fn collect(&self, sql: &str) -> Result<(Vec<String>, Vec<RecordBatch>)> {
        let df = self.ctx.sql(sql).await.map_err(df_err)?;
        let columns = df
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        let batches = df.collect().await.map_err(df_err)?;
        Ok((columns, batches))
    }
}

impl Default for DataFusionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for DataFusionEngine {
    fn name(&self) -> &'static str {
        "datafusion"
    }

    async fn version(&self) -> Result<String> {
        Ok(datafusion::DATAFUSION_VERSION.to_string())
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        let df = self.ctx.sql(sql).await.map_err(df_err)?;

        // DDL has already run at this point; DML runs while the stream drains
        let mut stream = df.execute_stream().await.map_err(df_err)?;
        while let Some(batch) = stream.next().await {
            batch.map_err(df_err)?;
        }
        Ok(())
    }

    async fn query(&self, sql: &str, max_rows: usize) -> Result<QueryResult> {
        let start = Instant::now();
        let (columns, batches) = self.collect(sql).await?;
        let duration = start.elapsed();

        let row_count: usize = batches.iter().map(|b| b.num_rows()).sum();
        let rows = format_rows(&batches, max_rows)?;

        Ok(QueryResult {
            duration,
            columns,
            rows,
            row_count: Some(row_count),
        })
    }

    async fn count_rows(&self, relation: &str) -> Result<u64> {
        let (_, batches) = self
            .collect(&format!("SELECT COUNT(*) FROM {}", relation))
            .await?;

        let count = batches
            .iter()
            .find(|b| b.num_rows() > 0)
            .and_then(|b| b.column(0).as_any().downcast_ref::<Int64Array>())
            .map(|a| a.value(0))
            .ok_or_else(|| BenchError::DataFusion(format!("COUNT(*) over {} returned no value", relation)))?;

        Ok(count.max(0) as u64)
    }

    async fn load_parquet(&self, schema: &str, table: &str, path: &Path) -> Result<()> {
        let path = path.to_string_lossy();
        let df = self
            .ctx
            .read_parquet(path.as_ref(), ParquetReadOptions::default())
            .await
            .map_err(df_err)?;
        let arrow_schema = Arc::new(df.schema().as_arrow().clone());
        let batches = df.collect().await.map_err(df_err)?;

        let provider = MemTable::try_new(arrow_schema, vec![batches]).map_err(df_err)?;
        let reference = TableReference::partial(schema, table);

        self.ctx
            .deregister_table(reference.clone())
            .map_err(df_err)?;
        self.ctx
            .register_table(reference, Arc::new(provider))
            .map_err(df_err)?;
        Ok(())
    }
}

/// Render the first `max_rows` rows of `batches` as strings
fn format_rows(batches: &[RecordBatch], max_rows: usize) -> Result<Vec<Vec<String>>> {
    let options = FormatOptions::default().with_null("NULL");
    let mut rows = Vec::new();

    for batch in batches {
        if rows.len() >= max_rows {
            break;
        }
        let formatters = batch
            .columns()
            .iter()
            .map(|col| ArrayFormatter::try_new(col.as_ref(), &options))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(df_err)?;

        for i in 0..batch.num_rows() {
            if rows.len() >= max_rows {
                break;
            }
            rows.push(formatters.iter().map(|f| f.value(i).to_string()).collect());
        }
    }

    Ok(rows)
}
