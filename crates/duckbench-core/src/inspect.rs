//! Catalog and storage inspection

use crate::config::CatalogConfig;
use crate::engine::Engine;
use crate::{format_count, quote_identifier, Result};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// MotherDuck storage price per GB-day
const COST_PER_GB_DAY: f64 = 0.002_568_5;

const STORAGE_HINT: &str = "Storage information is not available. This requires:\n  \
     1. Organization admin privileges\n  \
     2. MotherDuck Business plan or higher\n  \
     3. A MotherDuck connection (not local DuckDB)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    Table,
    View,
    Other(String),
}

impl RelationKind {
    fn from_table_type(table_type: &str) -> Self {
        match table_type {
            "BASE TABLE" => Self::Table,
            "VIEW" => Self::View,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Table => "TABLE",
            Self::View => "VIEW",
            Self::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelationInfo {
    pub name: String,
    pub kind: RelationKind,
    /// Row count, or the error text when counting failed
    pub rows: std::result::Result<u64, String>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogReport {
    pub schema: String,
    pub relations: Vec<RelationInfo>,
}

impl CatalogReport {
    pub fn total_rows(&self) -> u64 {
        self.relations
            .iter()
            .filter_map(|r| r.rows.as_ref().ok())
            .sum()
    }

    pub fn render(&self) -> String {
        let mut out = format!("DATABASE TABLES in schema '{}'\n\n", self.schema);
        if self.relations.is_empty() {
            out.push_str("No tables found in the database.\n");
            return out;
        }

        out.push_str(&format!("{:<30} {:<10} {:>15}\n", "Table Name", "Type", "Row Count"));
        out.push_str(&format!("{}\n", "-".repeat(57)));
        for relation in &self.relations {
            let rows = match &relation.rows {
                Ok(n) => format_count(*n),
                Err(e) => format!("Error: {}", e.chars().take(40).collect::<String>()),
            };
            out.push_str(&format!(
                "{:<30} {:<10} {:>15}\n",
                relation.name,
                relation.kind.as_str(),
                rows
            ));
        }
        out.push_str(&format!("{}\n", "-".repeat(57)));
        out.push_str(&format!(
            "Total rows across all tables: {}\n",
            format_count(self.total_rows())
        ));
        out
    }
}

/// Names and kinds of the schema's relations, minus the excluded system views
pub async fn list_relations(
    engine: &dyn Engine,
    schema: &str,
    catalog: &CatalogConfig,
) -> Result<Vec<(String, RelationKind)>> {
    let catalog_filter = match engine.current_catalog().await? {
        Some(name) => format!(" AND table_catalog = '{}'", name.replace('\'', "''")),
        None => String::new(),
    };
    let sql = format!(
        "SELECT table_name, table_type FROM information_schema.tables \
         WHERE table_schema = '{}'{} ORDER BY table_type, table_name",
        schema.replace('\'', "''"),
        catalog_filter
    );
    let result = engine.query(&sql, usize::MAX).await?;

    Ok(result
        .rows
        .into_iter()
        .filter_map(|row| {
            let mut cols = row.into_iter();
            let name = cols.next()?;
            let kind = RelationKind::from_table_type(&cols.next()?);
            (!catalog.is_excluded(&name)).then_some((name, kind))
        })
        .collect())
}

/// Row counts of every relation in `schema`.
///
/// Views that fail with a catalog error (system views not resolvable from
/// this schema) are left out; other failures are kept in the report.
pub async fn catalog_report(
    engine: &dyn Engine,
    schema: &str,
    catalog: &CatalogConfig,
) -> Result<CatalogReport> {
    let mut report = CatalogReport {
        schema: schema.to_string(),
        relations: Vec::new(),
    };

    for (name, kind) in list_relations(engine, schema, catalog).await? {
        let relation = format!("{}.{}", quote_identifier(schema), quote_identifier(&name));
        let rows = match engine.count_rows(&relation).await {
            Ok(n) => Ok(n),
            Err(e) => {
                let message = e.to_string();
                if kind == RelationKind::View && message.contains("Catalog Error") {
                    tracing::debug!("Skipping view {}: {}", name, message);
                    continue;
                }
                Err(message)
            }
        };
        report.relations.push(RelationInfo { name, kind, rows });
    }

    Ok(report)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseStorage {
    pub database: String,
    pub active_gb: f64,
    pub cloned_gb: f64,
    pub failsafe_gb: f64,
}

impl DatabaseStorage {
    pub fn total_gb(&self) -> f64 {
        self.active_gb + self.cloned_gb + self.failsafe_gb
    }
}

#[derive(Debug, Clone, Default)]
pub struct StorageReport {
    /// Largest database first
    pub databases: Vec<DatabaseStorage>,
    /// `(date, total GB)` for the last days, when the history view is readable
    pub history: Option<Vec<(String, f64)>>,
}

impl StorageReport {
    pub fn total_gb(&self) -> f64 {
        self.databases.iter().map(DatabaseStorage::total_gb).sum()
    }

    /// Cost of keeping the current total for a 30-day month
    pub fn monthly_cost(&self) -> f64 {
        self.total_gb() * 30.0 * COST_PER_GB_DAY
    }

    pub fn render(&self) -> String {
        let mut out = String::from("STORAGE USAGE INFORMATION\n\n");
        if self.databases.is_empty() {
            out.push_str("No storage information available.\n");
            return out;
        }

        out.push_str(&format!(
            "{:<25} {:>12} {:>12} {:>12} {:>12}\n",
            "Database", "Active (GB)", "Cloned (GB)", "Failsafe (GB)", "Total (GB)"
        ));
        out.push_str(&format!("{}\n", "-".repeat(77)));

        let mut totals = DatabaseStorage::default();
        for db in &self.databases {
            let name = if db.database.chars().count() > 24 {
                format!("{}...", db.database.chars().take(21).collect::<String>())
            } else {
                db.database.clone()
            };
            out.push_str(&format!(
                "{:<25} {:>12.3} {:>12.3} {:>12.3} {:>12.3}\n",
                name,
                db.active_gb,
                db.cloned_gb,
                db.failsafe_gb,
                db.total_gb()
            ));
            totals.active_gb += db.active_gb;
            totals.cloned_gb += db.cloned_gb;
            totals.failsafe_gb += db.failsafe_gb;
        }
        out.push_str(&format!("{}\n", "-".repeat(77)));
        out.push_str(&format!(
            "{:<25} {:>12.3} {:>12.3} {:>12.3} {:>12.3}\n\n",
            "TOTAL",
            totals.active_gb,
            totals.cloned_gb,
            totals.failsafe_gb,
            totals.total_gb()
        ));

        out.push_str("Storage categories:\n");
        out.push_str("  Active: data currently referenced by queries\n");
        out.push_str("  Cloned: data kept for cloned databases or shares\n");
        out.push_str("  Failsafe: system backups retained for recovery (7 days)\n\n");

        let total = self.total_gb();
        out.push_str("Estimated monthly storage cost:\n");
        out.push_str(&format!("  Total storage: {:.3} GB\n", total));
        out.push_str(&format!("  GB-days (30-day month): {:.1}\n", total * 30.0));
        out.push_str(&format!("  Estimated cost: ${:.2}\n\n", self.monthly_cost()));

        out.push_str("Recent storage history (last 7 days):\n");
        match &self.history {
            Some(days) if !days.is_empty() => {
                for (date, gb) in days {
                    out.push_str(&format!("  {:<12} {:>11.3} GB\n", date, gb));
                }
            }
            Some(_) => out.push_str("  No historical data available.\n"),
            None => out.push_str("  Historical data not accessible (may require admin privileges).\n"),
        }
        out
    }
}

fn parse_number(value: &str) -> f64 {
    value.parse().unwrap_or(0.0)
}

fn is_missing_storage_view(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("storage_info") && (lower.contains("does not exist") || lower.contains("not found"))
}

/// Per-database storage from MotherDuck's information schema.
///
/// Returns `Ok(None)` when the storage views do not exist on this connection.
pub async fn storage_report(engine: &dyn Engine) -> Result<Option<StorageReport>> {
    let sql = "SELECT database_name, active_bytes, kept_for_cloned_bytes, failsafe_bytes \
               FROM MD_INFORMATION_SCHEMA.STORAGE_INFO";
    let result = match engine.query(sql, usize::MAX).await {
        Ok(result) => result,
        Err(e) if is_missing_storage_view(&e.to_string()) => {
            tracing::debug!("Storage views unavailable: {}", e);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let mut databases: Vec<DatabaseStorage> = result
        .rows
        .iter()
        .map(|row| {
            let col = |i: usize| row.get(i).map(String::as_str).unwrap_or("");
            let name = match col(0) {
                "" | "NULL" => "(unknown)".to_string(),
                name => name.to_string(),
            };
            DatabaseStorage {
                database: name,
                active_gb: parse_number(col(1)) / GIB,
                cloned_gb: parse_number(col(2)) / GIB,
                failsafe_gb: parse_number(col(3)) / GIB,
            }
        })
        .collect();
    databases.sort_by(|a, b| b.total_gb().total_cmp(&a.total_gb()));

    let history_sql = "SELECT CAST(CAST(result_ts AS DATE) AS VARCHAR) AS day, SUM(total_bytes) AS total_bytes \
                       FROM MD_INFORMATION_SCHEMA.STORAGE_INFO_HISTORY \
                       WHERE result_ts >= CURRENT_DATE - INTERVAL '7 days' \
                       GROUP BY 1 ORDER BY 1 DESC LIMIT 7";
    let history = match engine.query(history_sql, usize::MAX).await {
        Ok(result) => Some(
            result
                .rows
                .iter()
                .filter_map(|row| Some((row.first()?.clone(), parse_number(row.get(1)?) / GIB)))
                .collect(),
        ),
        Err(e) => {
            tracing::debug!("Storage history unavailable: {}", e);
            None
        }
    };

    Ok(Some(StorageReport { databases, history }))
}

/// Printed when [`storage_report`] finds no storage views
pub fn storage_unavailable_hint() -> &'static str {
    STORAGE_HINT
}
