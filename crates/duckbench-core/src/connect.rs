//! Connection provider
//!
//! Resolves credentials, validates tunables and opens the session that every
//! other component receives explicitly.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::BenchConfig;
use crate::datafusion::DataFusionEngine;
use crate::duckdb::DuckDbEngine;
use crate::engine::Engine;
use crate::{BenchError, Result};

const TOKEN_KEYS: [&str; 2] = ["MOTHERDUCK_TOKEN", "motherduck_token"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Hosted DuckDB through the `md:` catalog
    MotherDuck,
    /// Local DuckDB file, or in-memory when no path is given
    DuckDb,
    /// In-process DataFusion session
    DataFusion,
}

/// Session parameters for the database engine
#[derive(Clone)]
pub struct ConnectionSettings {
    pub engine: EngineKind,
    pub database: String,
    pub schema: String,
    pub token: Option<String>,
    pub db_path: Option<PathBuf>,
    pub threads: usize,
    pub max_memory_mb: usize,
    /// Spill directory for out-of-memory operators
    pub temp_directory: PathBuf,
    /// Defaults to `<temp_directory>/extensions`
    pub extension_directory: Option<PathBuf>,
    pub min_engine_version: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            engine: EngineKind::MotherDuck,
            database: "contoso_benchmark".to_string(),
            schema: "main".to_string(),
            token: None,
            db_path: None,
            threads: 1,
            max_memory_mb: 256,
            temp_directory: std::env::temp_dir().join("duckdb"),
            extension_directory: None,
            min_engine_version: "1.0.0".to_string(),
        }
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("engine", &self.engine)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("db_path", &self.db_path)
            .field("threads", &self.threads)
            .field("max_memory_mb", &self.max_memory_mb)
            .field("temp_directory", &self.temp_directory)
            .field("extension_directory", &self.extension_directory)
            .field("min_engine_version", &self.min_engine_version)
            .finish()
    }
}

impl ConnectionSettings {
    /// Settings for `config` with default tunables
    pub fn for_config(engine: EngineKind, config: &BenchConfig) -> Self {
        Self {
            engine,
            database: config.database.clone(),
            schema: config.schema.clone(),
            min_engine_version: config.min_engine_version.clone(),
            ..Self::default()
        }
    }

    pub fn extension_directory(&self) -> PathBuf {
        self.extension_directory
            .clone()
            .unwrap_or_else(|| self.temp_directory.join("extensions"))
    }

    /// Check everything that can be checked before touching the network
    pub fn validate(&self) -> Result<()> {
        if self.threads < 1 {
            return Err(BenchError::Config(
                "--threads must be a positive integer".to_string(),
            ));
        }
        if self.max_memory_mb < 1 {
            return Err(BenchError::Config(
                "--max-memory-mb must be a positive integer".to_string(),
            ));
        }
        if self.engine == EngineKind::MotherDuck
            && self.token.as_deref().map_or(true, |t| t.trim().is_empty())
        {
            return Err(BenchError::Config(
                "MotherDuck token not found. Set MOTHERDUCK_TOKEN in the environment or .env file."
                    .to_string(),
            ));
        }
        if self.schema.trim().is_empty() {
            return Err(BenchError::Config("schema name must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Read a `.env`-style file. A missing file yields no values.
pub fn load_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut values = HashMap::new();
    if !path.exists() {
        return Ok(values);
    }

    for raw_line in std::fs::read_to_string(path)?.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("export ") {
            line = rest;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().trim_matches('"').trim_matches('\'');
        if !key.is_empty() {
            values.insert(key.to_string(), value.to_string());
        }
    }

    Ok(values)
}

/// Pick the MotherDuck token: explicit value (flag or environment) first,
/// then the env file.
pub fn resolve_token(explicit: Option<String>, env_file: &Path) -> Result<Option<String>> {
    if let Some(token) = explicit.filter(|t| !t.trim().is_empty()) {
        return Ok(Some(token));
    }
    let values = load_env_file(env_file)?;
    Ok(TOKEN_KEYS
        .iter()
        .find_map(|key| values.get(*key))
        .filter(|t| !t.trim().is_empty())
        .cloned())
}

/// Parse `v1.1.3` / `1.1.3-dev42` into a comparable triple
fn parse_version(version: &str) -> Option<(u64, u64, u64)> {
    let version = version.trim().trim_start_matches('v');
    let core = version.split(|c: char| c == '-' || c == ' ').next()?;
    let mut parts = core.split('.').map(|p| p.parse::<u64>());
    let major = parts.next()?.ok()?;
    let minor = parts.next().unwrap_or(Ok(0)).ok()?;
    let patch = parts.next().unwrap_or(Ok(0)).ok()?;
    Some((major, minor, patch))
}

/// Reject engines older than `minimum`. Unparseable versions are accepted
/// with a warning; DataFusion reports its own numbering and is not checked.
pub fn check_version(reported: &str, minimum: &str) -> Result<()> {
    let Some(min) = parse_version(minimum) else {
        return Err(BenchError::Config(format!(
            "invalid minimum engine version '{}'",
            minimum
        )));
    };
    match parse_version(reported) {
        Some(actual) if actual < min => Err(BenchError::Config(format!(
            "engine version {} is older than the required {}",
            reported, minimum
        ))),
        Some(_) => Ok(()),
        None => {
            tracing::warn!("Could not parse engine version '{}', continuing", reported);
            Ok(())
        }
    }
}

/// Open the configured engine and prepare database and schema
pub async fn connect(settings: &ConnectionSettings) -> Result<Box<dyn Engine>> {
    settings.validate()?;

    for dir in [&settings.temp_directory, &settings.extension_directory()] {
        std::fs::create_dir_all(dir)?;
    }

    let engine: Box<dyn Engine> = match settings.engine {
        EngineKind::MotherDuck | EngineKind::DuckDb => {
            let engine = DuckDbEngine::open(settings)?;
            check_version(&engine.version().await?, &settings.min_engine_version)?;
            if settings.engine == EngineKind::MotherDuck {
                engine.use_database(&settings.database).await?;
            }
            Box::new(engine)
        }
        EngineKind::DataFusion => Box::new(DataFusionEngine::with_settings(settings)?),
    };

    engine.ensure_schema(&settings.schema).await?;

    tracing::info!(
        "Connected to {} (database '{}', schema '{}', threads {}, max memory {}MB)",
        engine.name(),
        settings.database,
        settings.schema,
        settings.threads,
        settings.max_memory_mb
    );

    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_env_file_parsing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "# MotherDuck credentials\n\nexport MOTHERDUCK_TOKEN=\"abc123\"\nOTHER='x=y'\nnot a pair\n=novalue"
        )
        .unwrap();

        let values = load_env_file(file.path()).unwrap();
        assert_eq!(values.get("MOTHERDUCK_TOKEN").map(String::as_str), Some("abc123"));
        assert_eq!(values.get("OTHER").map(String::as_str), Some("x=y"));
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_missing_env_file_is_empty() {
        let values = load_env_file(Path::new("/nonexistent/.env")).unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn test_resolve_token_prefers_explicit() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "motherduck_token=from_file").unwrap();

        let token = resolve_token(Some("from_flag".to_string()), file.path()).unwrap();
        assert_eq!(token.as_deref(), Some("from_flag"));

        let token = resolve_token(None, file.path()).unwrap();
        assert_eq!(token.as_deref(), Some("from_file"));

        let token = resolve_token(Some("  ".to_string()), Path::new("/nonexistent/.env")).unwrap();
        assert_eq!(token, None);
    }

    #[test]
    fn test_validate_requires_token_for_motherduck() {
        let settings = ConnectionSettings::default();
        assert!(matches!(settings.validate(), Err(BenchError::Config(_))));

        let settings = ConnectionSettings {
            token: Some("abc".to_string()),
            ..ConnectionSettings::default()
        };
        assert!(settings.validate().is_ok());

        let settings = ConnectionSettings {
            engine: EngineKind::DataFusion,
            ..ConnectionSettings::default()
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_tunables() {
        let settings = ConnectionSettings {
            engine: EngineKind::DuckDb,
            threads: 0,
            ..ConnectionSettings::default()
        };
        assert!(settings.validate().is_err());

        let settings = ConnectionSettings {
            engine: EngineKind::DuckDb,
            max_memory_mb: 0,
            ..ConnectionSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let settings = ConnectionSettings {
            token: Some("secret-token".to_string()),
            ..ConnectionSettings::default()
        };
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_check_version() {
        assert!(check_version("v1.1.3", "1.0.0").is_ok());
        assert!(check_version("v1.0.0", "1.0.0").is_ok());
        assert!(check_version("v0.10.2", "1.0.0").is_err());
        assert!(check_version("1.2.0-dev123", "1.1").is_ok());
        assert!(check_version("unknown", "1.0.0").is_ok());
        assert!(check_version("v1.1.0", "not-a-version").is_err());
    }

    #[tokio::test]
    async fn test_connect_datafusion_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ConnectionSettings {
            engine: EngineKind::DataFusion,
            schema: "bench".to_string(),
            temp_directory: dir.path().join("spill"),
            ..ConnectionSettings::default()
        };

        let engine = connect(&settings).await.unwrap();
        assert!(dir.path().join("spill/extensions").is_dir());

        engine
            .execute("CREATE TABLE \"bench\".\"t\" AS VALUES (1), (2)")
            .await
            .unwrap();
        assert_eq!(engine.count_rows("\"bench\".\"t\"").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_connect_local_duckdb() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ConnectionSettings {
            engine: EngineKind::DuckDb,
            db_path: Some(dir.path().join("bench.duckdb")),
            temp_directory: dir.path().join("tmp"),
            ..ConnectionSettings::default()
        };

        let engine = connect(&settings).await.unwrap();
        assert_eq!(engine.name(), "duckdb");
        engine
            .execute("CREATE TABLE \"main\".\"t\" AS SELECT 1 AS x")
            .await
            .unwrap();
        assert_eq!(engine.count_rows("\"main\".\"t\"").await.unwrap(), 1);
    }
}
