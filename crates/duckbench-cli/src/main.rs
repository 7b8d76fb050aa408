//! DuckBench CLI - MotherDuck/DuckDB benchmark tool
//!
//! Loads the Contoso sample data, scales the sales table, inspects the
//! catalog, and runs labeled benchmark queries with timing and EXPLAIN.

use anyhow::{bail, Context};
use clap::{ArgGroup, Parser, ValueEnum};
use duckbench_core::dataset::{self, DatasetTables};
use duckbench_core::inspect;
use duckbench_core::runner::{
    statement_excerpt, BenchmarkReport, ExplainMode, OutcomeStatus, QueryRunner, RunOptions,
};
use duckbench_core::scale::{
    AssumeYes, Confirm, ScaleOptions, ScaleOrchestrator, ScaleOutcome, ScaleStrategy,
};
use duckbench_core::statements::{self, LabeledStatement};
use duckbench_core::{
    connect, format_count, format_table, BenchConfig, ConnectionSettings, Engine, EngineKind,
};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const DEFAULT_CONFIG: &str = "duckbench.toml";

#[derive(Parser)]
#[command(name = "duckbench")]
#[command(about = "DuckBench - MotherDuck/DuckDB scaling and query benchmark")]
#[command(version, arg_required_else_help = true)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .multiple(true)
        .args(["init_db", "show_tables", "show_storage", "scale_table", "query_all", "query"])
))]
struct Cli {
    /// Load the sample parquet files and create the benchmark view
    #[arg(long)]
    init_db: bool,

    /// List tables and views with row counts
    #[arg(long)]
    show_tables: bool,

    /// Show MotherDuck storage usage and estimated cost
    #[arg(long)]
    show_storage: bool,

    /// Scale the base sales table by this multiplier
    #[arg(long, value_name = "MULTIPLIER")]
    scale_table: Option<u64>,

    /// How the scaled table is produced
    #[arg(long, value_enum, default_value = "staged")]
    strategy: StrategyArg,

    /// Continue a failed staged scaling run from the current row count
    #[arg(long)]
    resume: bool,

    /// Skip the confirmation prompt for large scaling runs
    #[arg(short, long)]
    yes: bool,

    /// Run every query in the query file
    #[arg(long, conflicts_with = "query")]
    query_all: bool,

    /// Run the queries with these ids (e.g. 01 5 "Query 12")
    #[arg(long, num_args = 1.., value_name = "ID")]
    query: Vec<String>,

    /// Run EXPLAIN ANALYZE instead of the plain query
    #[arg(long, conflicts_with = "plan")]
    explain: bool,

    /// Print the EXPLAIN plan before running each query
    #[arg(long)]
    plan: bool,

    /// Print statement text and debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Show the first N result rows of each query (0 = none)
    #[arg(long, default_value = "0")]
    preview_rows: usize,

    /// Write the query outcomes as JSON to this file
    #[arg(long, value_name = "PATH")]
    report_json: Option<PathBuf>,

    /// Engine threads
    #[arg(long)]
    threads: Option<usize>,

    /// Engine memory limit in MB
    #[arg(long)]
    max_memory_mb: Option<usize>,

    /// Spill directory for operators that exceed the memory limit
    #[arg(long)]
    temp_directory: Option<PathBuf>,

    /// DuckDB extension directory (default: <temp-directory>/extensions)
    #[arg(long)]
    extension_directory: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "motherduck")]
    engine: EngineArg,

    /// Local DuckDB database file (--engine duckdb; in-memory when omitted)
    #[arg(long)]
    db_path: Option<PathBuf>,

    #[arg(long)]
    database: Option<String>,

    #[arg(long)]
    schema: Option<String>,

    /// SQL file with labeled queries
    #[arg(long)]
    query_file: Option<PathBuf>,

    /// TOML configuration (default: ./duckbench.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// File holding MOTHERDUCK_TOKEN=...
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// MotherDuck access token
    #[arg(long, env = "MOTHERDUCK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Pause between scaling batches
    #[arg(long)]
    cooldown_secs: Option<u64>,

    /// Target rows per scaling batch
    #[arg(long)]
    batch_rows: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum EngineArg {
    Motherduck,
    Duckdb,
    Datafusion,
}

impl From<EngineArg> for EngineKind {
    fn from(arg: EngineArg) -> Self {
        match arg {
            EngineArg::Motherduck => EngineKind::MotherDuck,
            EngineArg::Duckdb => EngineKind::DuckDb,
            EngineArg::Datafusion => EngineKind::DataFusion,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Staged,
    Union,
    CrossJoin,
}

impl From<StrategyArg> for ScaleStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Staged => ScaleStrategy::Staged,
            StrategyArg::Union => ScaleStrategy::Union,
            StrategyArg::CrossJoin => ScaleStrategy::CrossJoin,
        }
    }
}

/// Asks on stdin; anything but y/yes declines
struct PromptConfirm;

impl Confirm for PromptConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        print!("{} [y/N] ", prompt);
        if std::io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        match std::io::stdin().lock().read_line(&mut answer) {
            Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<BenchConfig> {
    let mut config = match &cli.config {
        Some(path) => BenchConfig::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => {
            BenchConfig::from_file(Path::new(DEFAULT_CONFIG))?
        }
        None => BenchConfig::default(),
    };

    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    if let Some(schema) = &cli.schema {
        config.schema = schema.clone();
    }
    if let Some(query_file) = &cli.query_file {
        config.query_file = query_file.clone();
    }
    if let Some(secs) = cli.cooldown_secs {
        config.scale.cooldown_secs = secs;
    }
    if let Some(rows) = cli.batch_rows {
        config.scale.batch_rows = rows;
    }

    Ok(config)
}

fn connection_settings(cli: &Cli, config: &BenchConfig) -> anyhow::Result<ConnectionSettings> {
    let mut settings = ConnectionSettings::for_config(cli.engine.into(), config);

    if settings.engine == EngineKind::MotherDuck {
        settings.token = duckbench_core::connect::resolve_token(cli.token.clone(), &cli.env_file)?;
    }
    settings.db_path = cli.db_path.clone();
    if let Some(threads) = cli.threads {
        settings.threads = threads;
    }
    if let Some(mb) = cli.max_memory_mb {
        settings.max_memory_mb = mb;
    }
    if let Some(dir) = &cli.temp_directory {
        settings.temp_directory = dir.clone();
    }
    settings.extension_directory = cli.extension_directory.clone();

    Ok(settings)
}

/// Returns `false` when any benchmark query failed
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = load_config(&cli)?;
    let settings = connection_settings(&cli, &config)?;
    tracing::debug!("{:?}", settings);

    let engine = connect(&settings).await?;
    let engine = engine.as_ref();

    if cli.init_db {
        println!("Initializing database from {}", config.samples_dir.display());
        for (table, rows) in dataset::initialize(engine, &config).await? {
            println!("  {:<30} {:>15} rows", table, format_count(rows));
        }
        println!();
    }

    if cli.show_tables {
        let report = inspect::catalog_report(engine, &config.schema, &config.catalog).await?;
        println!("{}", report.render());
    }

    if let Some(multiplier) = cli.scale_table {
        let options = ScaleOptions {
            strategy: cli.strategy.into(),
            resume: cli.resume,
            ..ScaleOptions::from_config(&config.scale)
        };
        let confirm: &dyn Confirm = if cli.yes { &AssumeYes } else { &PromptConfirm };
        let orchestrator =
            ScaleOrchestrator::new(engine, DatasetTables::from_config(&config), options, confirm);

        match orchestrator.run(multiplier).await? {
            ScaleOutcome::Completed(summary) => println!(
                "Scaled {} to {} rows in {:.1}s\n",
                config.dataset.scaled_table,
                format_count(summary.final_rows),
                summary.elapsed.as_secs_f64()
            ),
            ScaleOutcome::Cancelled => println!("Scaling cancelled\n"),
        }
    }

    if cli.show_storage {
        match inspect::storage_report(engine).await? {
            Some(report) => println!("{}", report.render()),
            None => println!("{}\n", inspect::storage_unavailable_hint()),
        }
    }

    if cli.query_all || !cli.query.is_empty() {
        let report = run_queries(&cli, &config, engine).await?;
        if let Some(path) = &cli.report_json {
            let json = serde_json::to_string_pretty(&report)?;
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!("Wrote report to {}", path.display());
        }
        return Ok(!report.has_failures());
    }

    Ok(true)
}

async fn run_queries(
    cli: &Cli,
    config: &BenchConfig,
    engine: &dyn Engine,
) -> anyhow::Result<BenchmarkReport> {
    let text = std::fs::read_to_string(&config.query_file)
        .with_context(|| format!("failed to read {}", config.query_file.display()))?;
    let all: Vec<LabeledStatement> =
        statements::extract(&text, &config.statements.unsupported_directives).collect();
    if all.is_empty() {
        bail!("no labeled queries found in {}", config.query_file.display());
    }

    let requested = (!cli.query_all).then_some(cli.query.as_slice());
    let selection = statements::select(&all, requested);
    if selection.statements.is_empty() {
        bail!(
            "none of the requested queries ({}) exist in {}",
            cli.query.join(", "),
            config.query_file.display()
        );
    }

    let explain = match (cli.explain, cli.plan) {
        (true, _) => ExplainMode::Analyze,
        (false, true) => ExplainMode::Plan,
        (false, false) => ExplainMode::Off,
    };
    let runner = QueryRunner::new(
        engine,
        RunOptions {
            explain,
            preview_rows: cli.preview_rows,
        },
    );

    println!(
        "Running {} of {} queries on {}\n",
        selection.statements.len(),
        all.len(),
        engine.name()
    );

    let mut report = BenchmarkReport::default();
    for statement in &selection.statements {
        match &statement.title {
            Some(title) => println!("=== {}: {} ===", statement.label, title),
            None => println!("=== {} ===", statement.label),
        }
        if cli.verbose {
            println!("{}\n", statement_excerpt(&statement.text, 20));
        }

        let outcome = runner.run_one(statement).await;
        match &outcome.status {
            OutcomeStatus::Completed(timing) => {
                if let Some(plan) = &timing.plan {
                    println!("{}", plan);
                }
                if let Some(preview) = timing.preview.as_ref().filter(|p| !p.rows.is_empty()) {
                    println!("{}", format_table(&preview.columns, &preview.rows));
                }
                println!("Time: {:.3}s\n", timing.duration.as_secs_f64());
            }
            OutcomeStatus::Failed { error } => println!("FAILED: {}\n", error),
            OutcomeStatus::Skipped { reason } => println!("Skipped: {}\n", reason),
        }
        report.outcomes.push(outcome);
    }

    println!("{}", report.summary());
    Ok(report)
}
