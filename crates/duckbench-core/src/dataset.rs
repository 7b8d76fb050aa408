//! Benchmark dataset: table naming, initial load, and the logical view.

use crate::config::BenchConfig;
use crate::engine::Engine;
use crate::{format_count, quote_identifier, BenchError, Result};

/// Names of every table the benchmark touches, all within one schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetTables {
    pub schema: String,
    pub base: String,
    pub scaled: String,
    pub view: String,
    pub temp_prefix: String,
}

impl DatasetTables {
    pub fn from_config(config: &BenchConfig) -> Self {
        Self {
            schema: config.schema.clone(),
            base: config.dataset.base_table.clone(),
            scaled: config.dataset.scaled_table.clone(),
            view: config.dataset.view.clone(),
            temp_prefix: config.dataset.temp_prefix.clone(),
        }
    }

    /// `"schema"."table"`
    pub fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_identifier(&self.schema), quote_identifier(table))
    }

    /// Intermediate table holding `copies` copies of the base table
    pub fn level_table(&self, copies: u64) -> String {
        format!("{}_x{}", self.temp_prefix, copies)
    }

    pub fn batch_table(&self) -> String {
        format!("{}_batch", self.temp_prefix)
    }

    pub fn adjustment_table(&self) -> String {
        format!("{}_adjust", self.temp_prefix)
    }
}

/// Point the logical view at `table` with a single statement
pub async fn repoint_view(engine: &dyn Engine, tables: &DatasetTables, table: &str) -> Result<()> {
    engine
        .execute(&format!(
            "CREATE OR REPLACE VIEW {} AS SELECT * FROM {}",
            tables.qualified(&tables.view),
            tables.qualified(table)
        ))
        .await
}

/// Load every configured sample file and point the view at the base table.
///
/// Returns `(table, row count)` per loaded table.
pub async fn initialize(engine: &dyn Engine, config: &BenchConfig) -> Result<Vec<(String, u64)>> {
    let tables = DatasetTables::from_config(config);
    let mut loaded = Vec::with_capacity(config.tables.len());

    for source in &config.tables {
        let path = config.samples_dir.join(&source.file);
        if !path.exists() {
            return Err(BenchError::Config(format!(
                "Expected sample file missing: {}",
                path.display()
            )));
        }

        engine.load_parquet(&config.schema, &source.table, &path).await?;
        let count = engine.count_rows(&tables.qualified(&source.table)).await?;
        tracing::info!("Loaded {} ({} rows)", source.table, format_count(count));
        loaded.push((source.table.clone(), count));
    }

    repoint_view(engine, &tables, &tables.base).await?;
    tracing::info!("Created view {} pointing to {}", tables.view, tables.base);

    Ok(loaded)
}
