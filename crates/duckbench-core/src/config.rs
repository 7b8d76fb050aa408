//! Benchmark configuration
//!
//! Everything here has a default matching the Contoso benchmark layout; a
//! TOML file only needs to name the fields it changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{BenchError, Result};

/// Top-level configuration, usually loaded from `duckbench.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    /// MotherDuck database to create/use
    pub database: String,
    /// Schema holding the benchmark tables
    pub schema: String,
    /// SQL file with labeled benchmark queries
    pub query_file: PathBuf,
    /// Directory containing the sample parquet files
    pub samples_dir: PathBuf,
    /// Tables loaded by `--init-db`
    pub tables: Vec<TableSource>,
    pub dataset: DatasetConfig,
    pub scale: ScaleConfig,
    pub catalog: CatalogConfig,
    pub statements: StatementsConfig,
    /// Oldest engine version accepted at connect time
    pub min_engine_version: String,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            database: "contoso_benchmark".to_string(),
            schema: "main".to_string(),
            query_file: PathBuf::from("Performance_Test_Snowflake_Databricks/code/query_list.sql"),
            samples_dir: PathBuf::from("Performance_Test_Snowflake_Databricks/SampleFiles"),
            tables: vec![
                TableSource::new("contoso_stores", "contoso_stores.parquet_0_0_0.snappy.parquet"),
                TableSource::new(
                    "contoso_products",
                    "contoso_products.parquet_0_0_0.snappy.parquet",
                ),
                TableSource::new(
                    "contoso_sales_240k",
                    "contoso_sales_240k.parquet_0_0_0.snappy.parquet",
                ),
            ],
            dataset: DatasetConfig::default(),
            scale: ScaleConfig::default(),
            catalog: CatalogConfig::default(),
            statements: StatementsConfig::default(),
            min_engine_version: "1.0.0".to_string(),
        }
    }
}

impl BenchConfig {
    /// Load a configuration file; missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            BenchError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&text)
            .map_err(|e| BenchError::Config(format!("Invalid config file {:?}: {}", path, e)))
    }

    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// A sample file loaded into a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSource {
    pub table: String,
    pub file: String,
}

impl TableSource {
    pub fn new(table: &str, file: &str) -> Self {
        Self {
            table: table.to_string(),
            file: file.to_string(),
        }
    }
}

/// Names of the tables the scaling run works with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetConfig {
    /// Unscaled source table
    pub base_table: String,
    /// Destination of the scaling run
    pub scaled_table: String,
    /// Logical view queried by the benchmark
    pub view: String,
    /// Prefix for level, batch and adjustment tables
    pub temp_prefix: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            base_table: "contoso_sales_240k".to_string(),
            scaled_table: "contoso_sales_24b_scaled".to_string(),
            view: "contoso_sales_24b".to_string(),
            temp_prefix: "scale_tmp".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScaleConfig {
    /// Approximate size of the reusable batch table, in rows
    pub batch_rows: u64,
    /// Copies combined per self-union step (2 = doubling)
    pub union_factor: u64,
    /// Pause between batch inserts
    pub cooldown_secs: u64,
    /// Targets above this many rows need confirmation
    pub confirm_threshold_rows: u64,
    pub max_retries: u32,
    /// Base delay before a retry; grows linearly with the attempt number
    pub retry_delay_secs: u64,
    /// Keep (and reuse) the batch table between runs
    pub keep_batch_table: bool,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            batch_rows: 1_000_000_000,
            union_factor: 10,
            cooldown_secs: 15,
            confirm_threshold_rows: 1_000_000_000,
            max_retries: 2,
            retry_delay_secs: 30,
            keep_batch_table: false,
        }
    }
}

impl ScaleConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Catalog objects never counted by `--show-tables`.
///
/// MotherDuck exposes these views in every schema and querying them can
/// hang the session. The list is versioned so a config file can pin the
/// set it was written against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogConfig {
    pub version: String,
    pub excluded_views: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            version: "2025.1".to_string(),
            excluded_views: [
                "database_snapshots",
                "databases",
                "owned_shares",
                "query_history",
                "shared_with_me",
                "storage_info",
                "storage_info_history",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl CatalogConfig {
    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded_views
            .iter()
            .any(|excluded| excluded.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatementsConfig {
    /// Session commands from other engines that are dropped from query files
    pub unsupported_directives: Vec<String>,
}

impl Default for StatementsConfig {
    fn default() -> Self {
        Self {
            unsupported_directives: vec!["ALTER SESSION".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_contoso_layout() {
        let config = BenchConfig::default();
        assert_eq!(config.database, "contoso_benchmark");
        assert_eq!(config.schema, "main");
        assert_eq!(config.tables.len(), 3);
        assert_eq!(config.dataset.base_table, "contoso_sales_240k");
        assert_eq!(config.dataset.view, "contoso_sales_24b");
        assert_eq!(config.scale.cooldown(), Duration::from_secs(15));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = BenchConfig::from_toml(
            r#"
            schema = "bench"

            [scale]
            union_factor = 2
            cooldown_secs = 0

            [catalog]
            version = "2025.2"
            excluded_views = ["query_history"]
            "#,
        )
        .unwrap();

        assert_eq!(config.schema, "bench");
        assert_eq!(config.database, "contoso_benchmark");
        assert_eq!(config.scale.union_factor, 2);
        assert_eq!(config.scale.cooldown_secs, 0);
        assert_eq!(config.scale.batch_rows, 1_000_000_000);
        assert_eq!(config.catalog.version, "2025.2");
        assert!(config.catalog.is_excluded("QUERY_HISTORY"));
        assert!(!config.catalog.is_excluded("storage_info"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(BenchConfig::from_toml("databse = \"typo\"").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dataset]\nview = \"sales_current\"").unwrap();

        let config = BenchConfig::from_file(file.path()).unwrap();
        assert_eq!(config.dataset.view, "sales_current");
        assert_eq!(config.dataset.base_table, "contoso_sales_240k");
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = BenchConfig::from_file(Path::new("/nonexistent/duckbench.toml")).unwrap_err();
        assert!(matches!(err, BenchError::Config(_)));
    }
}
