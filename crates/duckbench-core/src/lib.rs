//! DuckBench Core - Dataset scaling and query benchmarking
//!
//! Loads the Contoso sample tables into DuckDB/MotherDuck (or an in-process
//! DataFusion session), replicates the sales table to a target size, and runs
//! labeled benchmark queries with timing and EXPLAIN support.

pub mod config;
pub mod connect;
pub mod datafusion;
pub mod dataset;
pub mod duckdb;
pub mod engine;
pub mod inspect;
pub mod runner;
pub mod scale;
pub mod statements;

use std::time::Duration;
use thiserror::Error;

pub use config::BenchConfig;
pub use connect::{connect, ConnectionSettings, EngineKind};
pub use engine::Engine;
pub use scale::ScaleError;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] ::duckdb::Error),
    #[error("DataFusion error: {0}")]
    DataFusion(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Scale(#[from] ScaleError),
}

pub type Result<T> = std::result::Result<T, BenchError>;

/// Result of running a query
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Execution time, excluding the fetch of display rows
    pub duration: Duration,
    /// Column names
    pub columns: Vec<String>,
    /// First rows of the result, rendered as strings
    pub rows: Vec<Vec<String>>,
    /// Total rows in the result when the engine materialized all of them
    pub row_count: Option<usize>,
}

impl QueryResult {
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }
}

/// Quote an identifier for DuckDB/DataFusion SQL.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Format a row count with thousands separators (`24000000000` -> `24,000,000,000`).
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Format query results as an ASCII table
pub fn format_table(columns: &[String], rows: &[Vec<String>]) -> String {
    if columns.is_empty() {
        return String::new();
    }

    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let mut output = String::new();

    let separator: String = widths
        .iter()
        .map(|w| "-".repeat(*w + 2))
        .collect::<Vec<_>>()
        .join("+");
    let separator = format!("+{}+\n", separator);

    output.push_str(&separator);

    let header: String = columns
        .iter()
        .zip(&widths)
        .map(|(col, w)| format!(" {:width$} ", col, width = w))
        .collect::<Vec<_>>()
        .join("|");
    output.push_str(&format!("|{}|\n", header));

    output.push_str(&separator);

    for row in rows {
        let row_str: String = row
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!(" {:width$} ", cell, width = w))
            .collect::<Vec<_>>()
            .join("|");
        output.push_str(&format!("|{}|\n", row_str));
    }

    output.push_str(&separator);

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("contoso_sales_240k"), "\"contoso_sales_240k\"");
        assert_eq!(quote_identifier("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(240_000), "240,000");
        assert_eq!(format_count(24_000_000_000), "24,000,000,000");
    }

    #[test]
    fn test_format_table() {
        let columns = vec!["store_id".to_string(), "revenue".to_string()];
        let rows = vec![
            vec!["1".to_string(), "1200.50".to_string()],
            vec!["2".to_string(), "980.00".to_string()],
        ];
        let table = format_table(&columns, &rows);
        assert!(table.contains("store_id"));
        assert!(table.contains("1200.50"));
        assert_eq!(table.lines().count(), 6);
    }

    #[test]
    fn test_format_table_without_columns() {
        assert_eq!(format_table(&[], &[]), "");
    }
}
