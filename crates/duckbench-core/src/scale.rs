//! Table scaling
//!
//! Replicates the base table into the scaled table until it holds exactly
//! `base rows x multiplier` rows, then points the logical view at it.
//!
//! The staged strategy never asks the engine for one giant statement:
//!
//! 1. level tables hold `F`, `F^2`, ... copies of the base table, each built
//!    by a small self-union of the level below;
//! 2. a batch table of `k` copies is assembled from the levels (the base-`F`
//!    digits of `k`, or the level itself when `k` is a power of `F`) and
//!    inserted into the destination as many whole times as fit;
//! 3. the remainder goes in once through an adjustment table made of whole
//!    copies plus a `LIMIT`ed slice of the base table;
//! 4. the destination count is verified exactly before anything is dropped.

use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::ScaleConfig;
use crate::dataset::{repoint_view, DatasetTables};
use crate::engine::Engine;
use crate::{format_count, BenchError};

/// Rough on-disk size used for the pre-run estimate
const ESTIMATED_BYTES_PER_ROW: u64 = 100;

#[derive(Error, Debug)]
pub enum ScaleError {
    #[error("invalid scale request: {0}")]
    InvalidRequest(String),
    #[error(
        "step '{step}' failed ({}): {source}; re-run with --resume to continue from the current row count",
        last_known(.last_count)
    )]
    Step {
        step: String,
        last_count: Option<u64>,
        source: Box<BenchError>,
    },
    #[error(
        "row count mismatch in {table}: expected {expected}, found {actual}; intermediate tables were left in place"
    )]
    RowCountMismatch {
        table: String,
        expected: u64,
        actual: u64,
    },
    #[error("destination already holds {current} rows, more than the target of {target}")]
    OverTarget { current: u64, target: u64 },
}

fn last_known(count: &Option<u64>) -> String {
    match count {
        Some(n) => format!("destination rows at last check: {}", n),
        None => "destination row count unknown".to_string(),
    }
}

impl ScaleError {
    fn step(step: &str, last_count: Option<u64>, source: BenchError) -> Self {
        Self::Step {
            step: step.to_string(),
            last_count,
            source: Box::new(source),
        }
    }
}

/// How the scaled table is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleStrategy {
    /// Level tables, a reusable batch table and an exact remainder
    #[default]
    Staged,
    /// One `CREATE TABLE .. AS` with `multiplier` UNION ALL branches
    Union,
    /// One `CROSS JOIN generate_series(1, multiplier)`
    CrossJoin,
}

#[derive(Debug, Clone)]
pub struct ScaleOptions {
    pub strategy: ScaleStrategy,
    pub batch_rows: u64,
    pub union_factor: u64,
    pub cooldown: Duration,
    pub confirm_threshold_rows: u64,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub keep_batch_table: bool,
    /// Continue from the destination's current row count instead of
    /// recreating it
    pub resume: bool,
}

impl ScaleOptions {
    pub fn from_config(config: &ScaleConfig) -> Self {
        Self {
            strategy: ScaleStrategy::default(),
            batch_rows: config.batch_rows,
            union_factor: config.union_factor,
            cooldown: config.cooldown(),
            confirm_threshold_rows: config.confirm_threshold_rows,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            keep_batch_table: config.keep_batch_table,
            resume: false,
        }
    }
}

impl Default for ScaleOptions {
    fn default() -> Self {
        Self::from_config(&ScaleConfig::default())
    }
}

/// Operator confirmation for large runs
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Confirms everything (`--yes`)
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// Base-`factor` digits of `copies` as `(level, count)`, highest level
/// first, zero digits omitted.
pub fn digits(copies: u64, factor: u64) -> Vec<(u32, u64)> {
    let mut out = Vec::new();
    let mut remaining = copies;
    let mut level = 0;
    while remaining > 0 {
        let digit = remaining % factor;
        if digit > 0 {
            out.push((level, digit));
        }
        remaining /= factor;
        level += 1;
    }
    out.reverse();
    out
}

/// Arithmetic of a staged scaling run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalePlan {
    pub base_rows: u64,
    pub multiplier: u64,
    pub target_rows: u64,
    pub start_rows: u64,
    pub union_factor: u64,
    /// Copies of the base table in the batch table
    pub batch_copies: u64,
    /// Whole batch inserts
    pub full_batches: u64,
    /// Whole base-table copies in the adjustment table
    pub remainder_copies: u64,
    /// Leading base-table rows in the adjustment table
    pub remainder_rows: u64,
}

impl ScalePlan {
    pub fn new(
        base_rows: u64,
        multiplier: u64,
        start_rows: u64,
        batch_rows: u64,
        union_factor: u64,
    ) -> Result<Self, ScaleError> {
        if multiplier == 0 {
            return Err(ScaleError::InvalidRequest(
                "multiplier must be a positive integer".to_string(),
            ));
        }
        if base_rows == 0 {
            return Err(ScaleError::InvalidRequest("base table is empty".to_string()));
        }
        if union_factor < 2 {
            return Err(ScaleError::InvalidRequest(format!(
                "union factor must be at least 2, got {}",
                union_factor
            )));
        }
        let target_rows = base_rows.checked_mul(multiplier).ok_or_else(|| {
            ScaleError::InvalidRequest(format!(
                "{} rows x {} overflows the row counter",
                base_rows, multiplier
            ))
        })?;
        if start_rows > target_rows {
            return Err(ScaleError::OverTarget {
                current: start_rows,
                target: target_rows,
            });
        }

        let batch_copies = (batch_rows / base_rows).clamp(1, multiplier);
        let batch = batch_copies * base_rows;
        let remaining = target_rows - start_rows;
        let remainder = remaining % batch;

        Ok(Self {
            base_rows,
            multiplier,
            target_rows,
            start_rows,
            union_factor,
            batch_copies,
            full_batches: remaining / batch,
            remainder_copies: remainder / base_rows,
            remainder_rows: remainder % base_rows,
        })
    }

    pub fn batch_rows(&self) -> u64 {
        self.batch_copies * self.base_rows
    }

    pub fn remainder(&self) -> u64 {
        self.remainder_copies * self.base_rows + self.remainder_rows
    }

    pub fn estimated_bytes(&self) -> u64 {
        self.target_rows.saturating_mul(ESTIMATED_BYTES_PER_ROW)
    }
}

/// Result of a completed scaling run
#[derive(Debug, Clone)]
pub struct ScaleSummary {
    pub plan: ScalePlan,
    pub strategy: ScaleStrategy,
    pub final_rows: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub enum ScaleOutcome {
    Completed(ScaleSummary),
    /// The operator declined the confirmation prompt
    Cancelled,
}

/// Mutable bookkeeping of one staged run
#[derive(Default)]
struct RunState {
    /// Destination count at the last successful check
    destination_rows: Option<u64>,
    /// Highest level table built so far
    levels_built: u32,
    /// Tables to drop once the destination is verified
    intermediates: Vec<String>,
}

/// Whether an engine error says the relation does not exist
fn is_missing_table(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("table") && (lower.contains("does not exist") || lower.contains("not found"))
}

fn union_all(relation: &str, copies: u64) -> String {
    vec![format!("SELECT * FROM {}", relation); copies as usize].join(" UNION ALL ")
}

/// Drives a scaling run against one engine
pub struct ScaleOrchestrator<'a> {
    engine: &'a dyn Engine,
    tables: DatasetTables,
    options: ScaleOptions,
    confirm: &'a dyn Confirm,
}

impl<'a> ScaleOrchestrator<'a> {
    pub fn new(
        engine: &'a dyn Engine,
        tables: DatasetTables,
        options: ScaleOptions,
        confirm: &'a dyn Confirm,
    ) -> Self {
        Self {
            engine,
            tables,
            options,
            confirm,
        }
    }

    /// Scale the base table by `multiplier`
    pub async fn run(&self, multiplier: u64) -> Result<ScaleOutcome, ScaleError> {
        let base = self.tables.qualified(&self.tables.base);
        let dest = self.tables.qualified(&self.tables.scaled);
        let mut state = RunState::default();

        let base_rows = self.count("count base table", &base, &state).await?;

        let resume = self.options.resume && self.options.strategy == ScaleStrategy::Staged;
        if self.options.resume && !resume {
            tracing::warn!("--resume only applies to the staged strategy; rebuilding from scratch");
        }
        let start_rows = if resume {
            let engine = self.engine;
            let dest = dest.as_str();
            let existing = self
                .retry("count destination", None, move || async move {
                    match engine.count_rows(dest).await {
                        Ok(n) => Ok(Some(n)),
                        Err(e) if is_missing_table(&e.to_string()) => Ok(None),
                        Err(e) => Err(e),
                    }
                })
                .await?;
            match existing {
                Some(current) => tracing::info!("Resuming from {} existing rows", format_count(current)),
                None => tracing::warn!("Nothing to resume; starting from an empty table"),
            }
            state.destination_rows = existing;
            existing.unwrap_or(0)
        } else {
            0
        };

        let plan = ScalePlan::new(
            base_rows,
            multiplier,
            start_rows,
            self.options.batch_rows,
            self.options.union_factor,
        )?;

        tracing::info!(
            "Scaling {} ({} rows) by {}x to {} rows (~{} MB) using {:?}",
            self.tables.base,
            format_count(plan.base_rows),
            format_count(plan.multiplier),
            format_count(plan.target_rows),
            format_count(plan.estimated_bytes() / (1024 * 1024)),
            self.options.strategy
        );

        if plan.target_rows > self.options.confirm_threshold_rows {
            let prompt = format!(
                "Creating {} rows will take significant time and resources. Continue?",
                format_count(plan.target_rows)
            );
            if !self.confirm.confirm(&prompt) {
                tracing::info!("Scaling cancelled");
                return Ok(ScaleOutcome::Cancelled);
            }
        }

        let started = Instant::now();
        let final_rows = match self.options.strategy {
            ScaleStrategy::Staged => self.run_staged(&plan, &mut state).await?,
            ScaleStrategy::Union => {
                let sql = format!(
                    "CREATE OR REPLACE TABLE {} AS {}",
                    dest,
                    union_all(&base, plan.multiplier)
                );
                self.run_single(&plan, &sql, &mut state).await?
            }
            ScaleStrategy::CrossJoin => {
                let sql = format!(
                    "CREATE OR REPLACE TABLE {} AS SELECT original.* FROM {} AS original \
                     CROSS JOIN generate_series(1, {}) AS replicator",
                    dest, base, plan.multiplier
                );
                self.run_single(&plan, &sql, &mut state).await?
            }
        };

        let elapsed = started.elapsed();
        tracing::info!(
            "Scaled table holds {} rows, view {} updated ({:.1}s)",
            format_count(final_rows),
            self.tables.view,
            elapsed.as_secs_f64()
        );

        Ok(ScaleOutcome::Completed(ScaleSummary {
            plan,
            strategy: self.options.strategy,
            final_rows,
            elapsed,
        }))
    }

    async fn run_single(
        &self,
        plan: &ScalePlan,
        sql: &str,
        state: &mut RunState,
    ) -> Result<u64, ScaleError> {
        self.retry("create scaled table", state.destination_rows, || {
            self.engine.execute(sql)
        })
        .await?;
        let final_rows = self.verify_destination(plan, state).await?;
        self.update_view(state).await?;
        Ok(final_rows)
    }

    async fn run_staged(&self, plan: &ScalePlan, state: &mut RunState) -> Result<u64, ScaleError> {
        let base = self.tables.qualified(&self.tables.base);
        let dest = self.tables.qualified(&self.tables.scaled);
        let batch = self.tables.qualified(&self.tables.batch_table());

        if state.destination_rows.is_none() {
            let sql = format!("CREATE OR REPLACE TABLE {} AS SELECT * FROM {} LIMIT 0", dest, base);
            self.retry("create destination", None, || self.engine.execute(&sql))
                .await?;
            state.destination_rows = Some(0);
        }

        let mut batch_source = batch.clone();
        if plan.full_batches > 0 {
            let exact_level = self
                .exact_level(plan.batch_copies)
                .filter(|_| !self.options.keep_batch_table);
            if let Some(level) = exact_level {
                self.ensure_levels(level, plan, state).await?;
                batch_source = self.level_relation(level);
                tracing::info!(
                    "Inserting batches of {} rows straight from {}",
                    format_count(plan.batch_rows()),
                    batch_source
                );
            } else {
                let reusable = self.options.keep_batch_table
                    && matches!(self.engine.count_rows(&batch).await, Ok(n) if n == plan.batch_rows());
                if reusable {
                    tracing::info!(
                        "Reusing existing batch table with {} rows",
                        format_count(plan.batch_rows())
                    );
                } else {
                    tracing::info!(
                        "Building batch table of {} rows ({} copies)",
                        format_count(plan.batch_rows()),
                        plan.batch_copies
                    );
                    self.build_copies(&batch, plan, plan.batch_copies, state)
                        .await?;
                }
                if !self.options.keep_batch_table {
                    state.intermediates.push(batch.clone());
                }
            }
        }

        let mut current = plan.start_rows;
        let insert_batch = format!("INSERT INTO {} SELECT * FROM {}", dest, batch_source);
        for i in 1..=plan.full_batches {
            let batch_start = Instant::now();
            tracing::info!(
                "[Batch {}/{}] {} -> {} rows",
                i,
                plan.full_batches,
                format_count(current),
                format_count(current + plan.batch_rows())
            );

            current = self
                .insert_checked(
                    &format!("insert batch {}/{}", i, plan.full_batches),
                    &dest,
                    &insert_batch,
                    current,
                    plan.batch_rows(),
                    state,
                )
                .await?;

            tracing::info!(
                "[Batch {}/{}] done in {:.1}s, {:.1}% of target",
                i,
                plan.full_batches,
                batch_start.elapsed().as_secs_f64(),
                current as f64 / plan.target_rows as f64 * 100.0
            );

            if i < plan.full_batches && !self.options.cooldown.is_zero() {
                tracing::info!("Cooling down for {:?}", self.options.cooldown);
                tokio::time::sleep(self.options.cooldown).await;
            }
        }

        if plan.remainder() > 0 {
            let adjust = self.tables.qualified(&self.tables.adjustment_table());
            tracing::info!(
                "Adding remainder of {} rows ({} copies + {} rows)",
                format_count(plan.remainder()),
                plan.remainder_copies,
                plan.remainder_rows
            );
            self.build_adjustment(&adjust, plan, state).await?;
            state.intermediates.push(adjust.clone());

            self.insert_checked(
                "insert remainder",
                &dest,
                &format!("INSERT INTO {} SELECT * FROM {}", dest, adjust),
                current,
                plan.remainder(),
                state,
            )
            .await?;
        }

        let final_rows = self.verify_destination(plan, state).await?;

        for table in std::mem::take(&mut state.intermediates) {
            if let Err(e) = self
                .engine
                .execute(&format!("DROP TABLE IF EXISTS {}", table))
                .await
            {
                tracing::warn!("Could not drop {}: {}", table, e);
            }
        }

        self.update_view(state).await?;
        Ok(final_rows)
    }

    /// Level holding exactly `copies` copies, when `copies` is a power of
    /// the union factor (level 0 is the base table)
    fn exact_level(&self, copies: u64) -> Option<u32> {
        match digits(copies, self.options.union_factor).as_slice() {
            [(level, 1)] => Some(*level),
            _ => None,
        }
    }

    /// Qualified name of the table holding `factor^level` copies
    fn level_relation(&self, level: u32) -> String {
        if level == 0 {
            return self.tables.qualified(&self.tables.base);
        }
        let copies = self.options.union_factor.pow(level);
        self.tables.qualified(&self.tables.level_table(copies))
    }

    /// Build level tables up to and including `level`
    async fn ensure_levels(
        &self,
        level: u32,
        plan: &ScalePlan,
        state: &mut RunState,
    ) -> Result<(), ScaleError> {
        let factor = self.options.union_factor;
        while state.levels_built < level {
            let next = state.levels_built + 1;
            let table = self.level_relation(next);
            let sql = format!(
                "CREATE OR REPLACE TABLE {} AS {}",
                table,
                union_all(&self.level_relation(next - 1), factor)
            );
            tracing::info!(
                "Building {}x level table ({} rows)",
                factor.pow(next),
                format_count(factor.pow(next) * plan.base_rows)
            );

            self.retry(&format!("build level {}", next), state.destination_rows, || {
                self.engine.execute(&sql)
            })
            .await?;
            self.expect_count(&table, factor.pow(next) * plan.base_rows, state)
                .await?;

            state.intermediates.push(table);
            state.levels_built = next;
        }
        Ok(())
    }

    /// Create `table` with exactly `copies` copies of the base table
    async fn build_copies(
        &self,
        table: &str,
        plan: &ScalePlan,
        copies: u64,
        state: &mut RunState,
    ) -> Result<u64, ScaleError> {
        let digits = digits(copies, self.options.union_factor);
        let Some(&(top, _)) = digits.first() else {
            return Err(ScaleError::InvalidRequest(
                "cannot build a table of zero copies".to_string(),
            ));
        };
        self.ensure_levels(top, plan, state).await?;

        let mut rows = 0;
        for (i, &(level, count)) in digits.iter().enumerate() {
            let select = union_all(&self.level_relation(level), count);
            let added = count * self.options.union_factor.pow(level) * plan.base_rows;

            if i == 0 {
                let sql = format!("CREATE OR REPLACE TABLE {} AS {}", table, select);
                self.retry(&format!("create {}", table), state.destination_rows, || {
                    self.engine.execute(&sql)
                })
                .await?;
                rows = self.expect_count(table, added, state).await?;
            } else {
                rows = self
                    .insert_checked(
                        &format!("fill {}", table),
                        table,
                        &format!("INSERT INTO {} {}", table, select),
                        rows,
                        added,
                        state,
                    )
                    .await?;
            }
        }

        Ok(rows)
    }

    /// Create the adjustment table holding exactly the plan's remainder
    async fn build_adjustment(
        &self,
        table: &str,
        plan: &ScalePlan,
        state: &mut RunState,
    ) -> Result<u64, ScaleError> {
        let base = self.tables.qualified(&self.tables.base);
        let partial = format!("SELECT * FROM {} LIMIT {}", base, plan.remainder_rows);

        if plan.remainder_copies == 0 {
            let sql = format!("CREATE OR REPLACE TABLE {} AS {}", table, partial);
            self.retry("create adjustment table", state.destination_rows, || {
                self.engine.execute(&sql)
            })
            .await?;
            return self.expect_count(table, plan.remainder_rows, state).await;
        }

        let rows = self
            .build_copies(table, plan, plan.remainder_copies, state)
            .await?;
        if plan.remainder_rows == 0 {
            return Ok(rows);
        }
        self.insert_checked(
            "fill adjustment table",
            table,
            &format!("INSERT INTO {} {}", table, partial),
            rows,
            plan.remainder_rows,
            state,
        )
        .await
    }

    async fn verify_destination(
        &self,
        plan: &ScalePlan,
        state: &mut RunState,
    ) -> Result<u64, ScaleError> {
        let dest = self.tables.qualified(&self.tables.scaled);
        let actual = self.expect_count(&dest, plan.target_rows, state).await?;
        state.destination_rows = Some(actual);
        Ok(actual)
    }

    async fn update_view(&self, state: &RunState) -> Result<(), ScaleError> {
        self.retry("update view", state.destination_rows, || {
            repoint_view(self.engine, &self.tables, &self.tables.scaled)
        })
        .await
    }

    async fn count(&self, step: &str, relation: &str, state: &RunState) -> Result<u64, ScaleError> {
        self.retry(step, state.destination_rows, || self.engine.count_rows(relation))
            .await
    }

    async fn expect_count(
        &self,
        table: &str,
        expected: u64,
        state: &RunState,
    ) -> Result<u64, ScaleError> {
        let actual = self
            .count(&format!("count {}", table), table, state)
            .await?;
        if actual != expected {
            return Err(ScaleError::RowCountMismatch {
                table: table.to_string(),
                expected,
                actual,
            });
        }
        Ok(actual)
    }

    /// Run an idempotent operation, retrying with a linearly growing delay
    async fn retry<T, F, Fut>(
        &self,
        step: &str,
        last_count: Option<u64>,
        mut op: F,
    ) -> Result<T, ScaleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.options.max_retries => {
                    attempt += 1;
                    let delay = self.options.retry_delay * attempt;
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        step,
                        attempt,
                        self.options.max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(ScaleError::step(step, last_count, e)),
            }
        }
    }

    /// Run an INSERT that must grow `table` from `before` by exactly `added`
    /// rows. A failed insert is only retried when the table still holds
    /// `before` rows.
    async fn insert_checked(
        &self,
        step: &str,
        table: &str,
        sql: &str,
        before: u64,
        added: u64,
        state: &mut RunState,
    ) -> Result<u64, ScaleError> {
        let expected = before + added;
        let tracks_destination = table == self.tables.qualified(&self.tables.scaled);
        let mut attempt = 0;

        loop {
            let err = match self.engine.execute(sql).await {
                Ok(()) => break,
                Err(e) => e,
            };

            match self.engine.count_rows(table).await {
                Ok(n) if n == expected => {
                    tracing::warn!("{} reported an error but its rows landed: {}", step, err);
                    break;
                }
                Ok(n) if n != before => {
                    return Err(ScaleError::RowCountMismatch {
                        table: table.to_string(),
                        expected,
                        actual: n,
                    });
                }
                _ => {}
            }

            if attempt >= self.options.max_retries {
                return Err(ScaleError::step(step, state.destination_rows, err));
            }
            attempt += 1;
            let delay = self.options.retry_delay * attempt;
            tracing::warn!(
                "{} failed (attempt {}/{}): {}; retrying in {:?}",
                step,
                attempt,
                self.options.max_retries + 1,
                err,
                delay
            );
            tokio::time::sleep(delay).await;
        }

        let actual = self.expect_count(table, expected, state).await?;
        if tracks_destination {
            state.destination_rows = Some(actual);
        }
        Ok(actual)
    }
}
