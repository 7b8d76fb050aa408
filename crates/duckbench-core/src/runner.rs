//! Benchmark query runner
//!
//! Executes labeled statements one after another, timing each and
//! optionally capturing the engine's plan and a preview of the result.

use serde::Serialize;
use std::time::{Duration, Instant};

use crate::engine::Engine;
use crate::statements::LabeledStatement;
use crate::QueryResult;

/// How EXPLAIN output is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExplainMode {
    #[default]
    Off,
    /// Fetch the `EXPLAIN` plan, then run the query normally
    Plan,
    /// Run `EXPLAIN ANALYZE` instead of the query
    Analyze,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub explain: ExplainMode,
    /// Rows fetched for display after timing stops (0 = none)
    pub preview_rows: usize,
}

/// Timing and optional artifacts of a completed statement
#[derive(Debug, Clone, Serialize)]
pub struct QueryTiming {
    #[serde(rename = "duration_secs", serialize_with = "serialize_secs")]
    pub duration: Duration,
    #[serde(skip)]
    pub preview: Option<QueryResult>,
    pub plan: Option<String>,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed(QueryTiming),
    Failed { error: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub label: String,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl QueryOutcome {
    pub fn duration(&self) -> Option<Duration> {
        match &self.status {
            OutcomeStatus::Completed(timing) => Some(timing.duration),
            _ => None,
        }
    }
}

/// Pull `Total Time: 1.234s` out of DuckDB's EXPLAIN ANALYZE output
pub fn parse_total_time(plan: &str) -> Option<Duration> {
    let (_, rest) = plan.split_once("Total Time:")?;
    let number: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let secs: f64 = number.parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

/// Runs statements sequentially on one engine
pub struct QueryRunner<'a> {
    engine: &'a dyn Engine,
    options: RunOptions,
}

impl<'a> QueryRunner<'a> {
    pub fn new(engine: &'a dyn Engine, options: RunOptions) -> Self {
        Self { engine, options }
    }

    /// Run one statement; failures are captured in the outcome
    pub async fn run_one(&self, statement: &LabeledStatement) -> QueryOutcome {
        let label = statement.label.clone();

        if statement.is_empty() {
            return QueryOutcome {
                label,
                status: OutcomeStatus::Skipped {
                    reason: "empty statement body".to_string(),
                },
            };
        }

        tracing::debug!("Running {} on {}", label, self.engine.name());

        let status = match self.execute(&statement.text).await {
            Ok(timing) => OutcomeStatus::Completed(timing),
            Err(e) => {
                tracing::warn!("{} failed: {}", label, e);
                OutcomeStatus::Failed {
                    error: e.to_string(),
                }
            }
        };

        QueryOutcome { label, status }
    }

    async fn execute(&self, sql: &str) -> crate::Result<QueryTiming> {
        match self.options.explain {
            ExplainMode::Analyze => {
                let start = Instant::now();
                let plan = self.engine.explain(sql, true).await?;
                let measured = start.elapsed();
                Ok(QueryTiming {
                    duration: parse_total_time(&plan).unwrap_or(measured),
                    preview: None,
                    plan: Some(plan),
                })
            }
            ExplainMode::Plan => {
                let plan = self.engine.explain(sql, false).await?;
                let result = self.engine.query(sql, self.options.preview_rows).await?;
                Ok(QueryTiming {
                    duration: result.duration,
                    preview: Some(result),
                    plan: Some(plan),
                })
            }
            ExplainMode::Off => {
                let result = self.engine.query(sql, self.options.preview_rows).await?;
                Ok(QueryTiming {
                    duration: result.duration,
                    preview: Some(result),
                    plan: None,
                })
            }
        }
    }

    /// Run every statement in order
    pub async fn run_all(&self, statements: &[LabeledStatement]) -> BenchmarkReport {
        let mut outcomes = Vec::with_capacity(statements.len());
        for statement in statements {
            outcomes.push(self.run_one(statement).await);
        }
        BenchmarkReport { outcomes }
    }
}

/// Outcomes of a benchmark run
#[derive(Debug, Clone, Default, Serialize)]
pub struct BenchmarkReport {
    pub outcomes: Vec<QueryOutcome>,
}

impl BenchmarkReport {
    pub fn completed(&self) -> impl Iterator<Item = (&str, Duration)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.duration().map(|d| (o.label.as_str(), d)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            OutcomeStatus::Failed { error } => Some((o.label.as_str(), error.as_str())),
            _ => None,
        })
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn total_time(&self) -> Duration {
        self.completed().map(|(_, d)| d).sum()
    }

    /// Summary block printed after the per-query output
    pub fn summary(&self) -> String {
        let times: Vec<Duration> = self.completed().map(|(_, d)| d).collect();
        let total = self.total_time();
        let mut out = String::new();

        out.push_str(&format!("Total execution time: {:.3} seconds\n", total.as_secs_f64()));
        out.push_str(&format!("Queries executed: {}\n", times.len()));

        let fastest = times.iter().min().copied();
        let slowest = times.iter().max().copied();

        if let (Some(fastest), Some(slowest)) = (fastest, slowest) {
            let avg = total.as_secs_f64() / times.len() as f64;
            out.push_str("\nStatistics:\n");
            out.push_str(&format!("  Average: {:.3}s\n", avg));
            out.push_str(&format!("  Fastest: {:.3}s\n", fastest.as_secs_f64()));
            out.push_str(&format!("  Slowest: {:.3}s\n", slowest.as_secs_f64()));
        }

        out.push_str("\nIndividual Results:\n");
        for outcome in &self.outcomes {
            let line = match &outcome.status {
                OutcomeStatus::Completed(timing) => {
                    let previewed = timing
                        .preview
                        .as_ref()
                        .filter(|p| !p.rows.is_empty())
                        .map(|p| format!(" (previewed {} rows)", p.rows.len()))
                        .unwrap_or_default();
                    let marker = if times.len() > 1 && Some(timing.duration) == fastest {
                        " [fastest]"
                    } else if times.len() > 1 && Some(timing.duration) == slowest {
                        " [slowest]"
                    } else {
                        ""
                    };
                    format!(
                        "  {}: {:.3}s{}{}",
                        outcome.label,
                        timing.duration.as_secs_f64(),
                        previewed,
                        marker
                    )
                }
                OutcomeStatus::Failed { error } => {
                    format!("  {}: FAILED - {}", outcome.label, error)
                }
                OutcomeStatus::Skipped { reason } => {
                    format!("  {}: skipped ({})", outcome.label, reason)
                }
            };
            out.push_str(&line);
            out.push('\n');
        }

        out
    }
}

/// First `max_lines` lines of a statement for verbose output
pub fn statement_excerpt(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.trim().lines().collect();
    let mut out: Vec<String> = lines
        .iter()
        .take(max_lines)
        .map(|l| format!("  {}", l))
        .collect();
    if lines.len() > max_lines {
        out.push(format!("  ... ({} more lines)", lines.len() - max_lines));
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datafusion::DataFusionEngine;
    use crate::statements::extract;

    async fn sample_engine() -> DataFusionEngine {
        let engine = DataFusionEngine::new();
        engine
            .execute(
                "CREATE TABLE sales (store_id BIGINT, amount DOUBLE) AS VALUES \
                 (1, 10.0), (2, 20.0), (1, 5.0)",
            )
            .await
            .unwrap();
        engine
    }

    fn statements(text: &str) -> Vec<LabeledStatement> {
        extract(text, &[]).collect()
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_run() {
        let engine = sample_engine().await;
        let statements = statements(
            "-- Query 01\nSELECT COUNT(*) FROM sales\n\
             -- Query 02\nSELECT * FROM missing_table\n\
             -- Query 03\nSELECT store_id, SUM(amount) FROM sales GROUP BY store_id",
        );

        let runner = QueryRunner::new(&engine, RunOptions::default());
        let report = runner.run_all(&statements).await;

        assert_eq!(report.outcomes.len(), 3);
        assert!(matches!(report.outcomes[0].status, OutcomeStatus::Completed(_)));
        assert!(matches!(report.outcomes[1].status, OutcomeStatus::Failed { .. }));
        assert!(matches!(report.outcomes[2].status, OutcomeStatus::Completed(_)));

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "Query 02");
        assert!(report.has_failures());

        let summary = report.summary();
        assert!(summary.contains("Queries executed: 2"));
        assert!(summary.contains("Query 02: FAILED"));
        assert!(summary.contains("Query 03:"));
    }

    #[tokio::test]
    async fn test_empty_statement_is_skipped() {
        let engine = sample_engine().await;
        let statements = statements("-- Query 01\n-- Query 02\nSELECT 1");

        let runner = QueryRunner::new(&engine, RunOptions::default());
        let report = runner.run_all(&statements).await;

        assert!(matches!(report.outcomes[0].status, OutcomeStatus::Skipped { .. }));
        assert!(matches!(report.outcomes[1].status, OutcomeStatus::Completed(_)));
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn test_preview_rows() {
        let engine = sample_engine().await;
        let statements = statements("-- Query 01\nSELECT * FROM sales ORDER BY amount");

        let options = RunOptions {
            preview_rows: 2,
            ..RunOptions::default()
        };
        let report = QueryRunner::new(&engine, options).run_all(&statements).await;

        let OutcomeStatus::Completed(timing) = &report.outcomes[0].status else {
            panic!("expected completion");
        };
        let preview = timing.preview.as_ref().unwrap();
        assert_eq!(preview.rows.len(), 2);
        assert_eq!(preview.rows[0][1], "5.0");
        assert!(timing.plan.is_none());
    }

    #[tokio::test]
    async fn test_explain_modes() {
        let engine = sample_engine().await;
        let statements = statements("-- Query 01\nSELECT store_id, SUM(amount) FROM sales GROUP BY store_id");

        for mode in [ExplainMode::Plan, ExplainMode::Analyze] {
            let options = RunOptions {
                explain: mode,
                preview_rows: 5,
            };
            let report = QueryRunner::new(&engine, options).run_all(&statements).await;
            let OutcomeStatus::Completed(timing) = &report.outcomes[0].status else {
                panic!("expected completion for {:?}", mode);
            };
            assert!(timing.plan.as_deref().is_some_and(|p| !p.is_empty()));
            assert_eq!(timing.preview.is_some(), mode == ExplainMode::Plan);
        }
    }

    #[test]
    fn test_parse_total_time() {
        let plan = "┌─────────────────────┐\n│    Total Time: 0.0123s    │\n└─────────────────────┘";
        assert_eq!(parse_total_time(plan), Some(Duration::from_secs_f64(0.0123)));
        assert_eq!(parse_total_time("no timing here"), None);
    }

    #[test]
    fn test_statement_excerpt() {
        let text = (1..=25).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let excerpt = statement_excerpt(&text, 20);
        assert!(excerpt.contains("  line 20"));
        assert!(!excerpt.contains("line 21"));
        assert!(excerpt.ends_with("... (5 more lines)"));
    }

    #[test]
    fn test_summary_markers() {
        let report = BenchmarkReport {
            outcomes: vec![
                QueryOutcome {
                    label: "Query 01".to_string(),
                    status: OutcomeStatus::Completed(QueryTiming {
                        duration: Duration::from_millis(100),
                        preview: None,
                        plan: None,
                    }),
                },
                QueryOutcome {
                    label: "Query 02".to_string(),
                    status: OutcomeStatus::Completed(QueryTiming {
                        duration: Duration::from_millis(300),
                        preview: None,
                        plan: None,
                    }),
                },
            ],
        };

        let summary = report.summary();
        assert!(summary.contains("Total execution time: 0.400 seconds"));
        assert!(summary.contains("Average: 0.200s"));
        assert!(summary.contains("Query 01: 0.100s [fastest]"));
        assert!(summary.contains("Query 02: 0.300s [slowest]"));
    }
}
