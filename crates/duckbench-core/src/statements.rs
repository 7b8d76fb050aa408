//! Labeled statement extraction and selection
//!
//! Benchmark query files look like:
//!
//! ```sql
//! -- Query 01 - revenue by store
//! SELECT store_id, SUM(net_price) FROM contoso_sales_24b GROUP BY store_id;
//!
//! --Query 02
//! SELECT COUNT(*) FROM contoso_sales_24b;
//! ```
//!
//! Each label line opens a statement that runs until the next label or the
//! end of the file.

use serde::Serialize;
use std::collections::HashSet;
use std::str::Lines;

/// One SQL statement paired with its label from the source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabeledStatement {
    /// Normalized label, e.g. `Query 01`
    pub label: String,
    /// Identifier after `Query`, e.g. `01`
    pub id: String,
    /// Free text following the identifier on the label line
    pub title: Option<String>,
    /// Statement body, trimmed; empty when the label had no body
    pub text: String,
}

impl LabeledStatement {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Parse a label comment line into `(id, title)`.
fn parse_label(line: &str) -> Option<(String, Option<String>)> {
    let comment = line.trim().strip_prefix("--")?;
    let rest = comment.trim_start_matches('-').trim();

    let keyword = rest.get(..5)?;
    if !keyword.eq_ignore_ascii_case("query") {
        return None;
    }
    let after = &rest[5..];
    if !after.starts_with(|c: char| c.is_whitespace()) {
        return None;
    }

    let after = after.trim_start();
    let id_end = after
        .find(|c: char| c.is_whitespace() || c == ':' || c == '-')
        .unwrap_or(after.len());
    let id = after[..id_end].trim_end_matches('.');
    if id.is_empty() {
        return None;
    }

    let title = after[id_end..]
        .trim_start_matches(|c: char| c.is_whitespace() || c == ':' || c == '-')
        .trim();
    let title = (!title.is_empty()).then(|| title.to_string());

    Some((id.to_string(), title))
}

enum ScanState<'a> {
    /// Before the first label; lines here belong to no statement
    Outside,
    /// Collecting the body of a labeled statement
    Inside {
        id: String,
        title: Option<String>,
        body: Vec<&'a str>,
        skipped_directive: bool,
    },
}

/// Lazy iterator over the labeled statements of a SQL file
pub struct StatementIter<'a> {
    lines: Lines<'a>,
    state: ScanState<'a>,
    directives: Vec<String>,
    seen: HashSet<String>,
    done: bool,
}

/// Extract labeled statements from `text`, dropping lines that start with
/// any of `unsupported_directives` (matched case-insensitively).
pub fn extract<'a>(text: &'a str, unsupported_directives: &[String]) -> StatementIter<'a> {
    StatementIter {
        lines: text.lines(),
        state: ScanState::Outside,
        directives: unsupported_directives
            .iter()
            .map(|d| d.to_ascii_uppercase())
            .collect(),
        seen: HashSet::new(),
        done: false,
    }
}

impl<'a> StatementIter<'a> {
    fn is_directive(&self, line: &str) -> bool {
        let upper = line.to_ascii_uppercase();
        self.directives.iter().any(|d| upper.starts_with(d.as_str()))
    }

    /// Close the statement being collected, if any
    fn finish(&mut self, next: ScanState<'a>) -> Option<LabeledStatement> {
        let ScanState::Inside {
            id,
            title,
            body,
            skipped_directive,
        } = std::mem::replace(&mut self.state, next)
        else {
            return None;
        };

        let label = format!("Query {}", id);
        let text = body.join("\n").trim().to_string();

        if text.is_empty() && skipped_directive {
            tracing::warn!("Skipping {}: it only contains unsupported directives", label);
            return None;
        }
        if !self.seen.insert(label.clone()) {
            tracing::warn!("Skipping duplicate label {}", label);
            return None;
        }
        if text.is_empty() {
            tracing::warn!("{} has no statement body", label);
        }

        Some(LabeledStatement {
            label,
            id,
            title,
            text,
        })
    }
}

impl<'a> Iterator for StatementIter<'a> {
    type Item = LabeledStatement;

    fn next(&mut self) -> Option<LabeledStatement> {
        while !self.done {
            let Some(line) = self.lines.next() else {
                self.done = true;
                return self.finish(ScanState::Outside);
            };
            let stripped = line.trim();

            if let Some((id, title)) = parse_label(stripped) {
                let next = ScanState::Inside {
                    id,
                    title,
                    body: Vec::new(),
                    skipped_directive: false,
                };
                if let Some(statement) = self.finish(next) {
                    return Some(statement);
                }
                continue;
            }

            if stripped.starts_with("--") || stripped.is_empty() {
                continue;
            }

            let is_directive = self.is_directive(stripped);
            match &mut self.state {
                ScanState::Outside => {
                    tracing::debug!("Ignoring unlabeled line: {}", stripped);
                }
                ScanState::Inside {
                    body,
                    skipped_directive,
                    ..
                } => {
                    if is_directive {
                        tracing::warn!("Skipping unsupported directive: {}", stripped);
                        *skipped_directive = true;
                    } else {
                        body.push(line);
                    }
                }
            }
        }
        None
    }
}

/// Statements chosen for a run, plus requested ids that matched nothing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub statements: Vec<LabeledStatement>,
    pub unknown: Vec<String>,
}

fn id_matches(id: &str, requested: &str) -> bool {
    if id.eq_ignore_ascii_case(requested) {
        return true;
    }
    match (id.parse::<u64>(), requested.parse::<u64>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Select statements by id, keeping file order. `None` selects everything.
pub fn select(statements: &[LabeledStatement], requested: Option<&[String]>) -> Selection {
    let Some(requested) = requested else {
        return Selection {
            statements: statements.to_vec(),
            unknown: Vec::new(),
        };
    };

    let requested: Vec<&str> = requested
        .iter()
        .map(|r| {
            let r = r.trim();
            // accept "Query 05" as well as "05"
            match r.get(..5) {
                Some(prefix) if prefix.eq_ignore_ascii_case("query") => r[5..].trim(),
                _ => r,
            }
        })
        .collect();

    let selected: Vec<LabeledStatement> = statements
        .iter()
        .filter(|s| requested.iter().any(|r| id_matches(&s.id, r)))
        .cloned()
        .collect();

    let unknown: Vec<String> = requested
        .iter()
        .filter(|r| !statements.iter().any(|s| id_matches(&s.id, r)))
        .map(|r| r.to_string())
        .collect();

    for id in &unknown {
        tracing::warn!("No statement labeled Query {}", id);
    }

    Selection {
        statements: selected,
        unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directives() -> Vec<String> {
        vec!["ALTER SESSION".to_string()]
    }

    fn parse(text: &str) -> Vec<LabeledStatement> {
        extract(text, &directives()).collect()
    }

    const THREE_QUERIES: &str = "\
-- Query 01 - total revenue
SELECT SUM(net_price) FROM contoso_sales_24b;

--query 02
SELECT store_id,
       COUNT(*)
FROM contoso_sales_24b
GROUP BY store_id;

-- Query 03: top products
-- uses the product dimension
SELECT product_id FROM contoso_products LIMIT 10;
";

    #[test]
    fn test_extracts_in_file_order() {
        let statements = parse(THREE_QUERIES);
        let labels: Vec<_> = statements.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["Query 01", "Query 02", "Query 03"]);
        assert!(statements.iter().all(|s| !s.text.is_empty()));

        assert_eq!(statements[0].title.as_deref(), Some("total revenue"));
        assert_eq!(statements[1].title, None);
        assert_eq!(statements[2].title.as_deref(), Some("top products"));
        assert_eq!(
            statements[1].text,
            "SELECT store_id,\n       COUNT(*)\nFROM contoso_sales_24b\nGROUP BY store_id;"
        );
        assert_eq!(
            statements[2].text,
            "SELECT product_id FROM contoso_products LIMIT 10;"
        );
    }

    #[test]
    fn test_no_labels_yields_nothing() {
        assert!(parse("SELECT 1;\nSELECT 2;\n").is_empty());
        assert!(parse("").is_empty());
    }

    #[test]
    fn test_text_before_first_label_is_ignored() {
        let statements = parse("SELECT 0;\n-- Query 1\nSELECT 1;");
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].text, "SELECT 1;");
    }

    #[test]
    fn test_empty_body_is_kept() {
        let statements = parse("-- Query 01\n\n-- Query 02\nSELECT 2;");
        assert_eq!(statements.len(), 2);
        assert!(statements[0].is_empty());
        assert_eq!(statements[1].text, "SELECT 2;");
    }

    #[test]
    fn test_trailing_label_without_body() {
        let statements = parse("-- Query 01\nSELECT 1;\n-- Query 02");
        assert_eq!(statements.len(), 2);
        assert!(statements[1].is_empty());
    }

    #[test]
    fn test_directive_lines_are_skipped() {
        let statements = parse(
            "-- Query 00\nALTER SESSION SET USE_CACHED_RESULT = FALSE;\n\
             -- Query 01\nalter session set query_tag = 'x';\nSELECT 1;",
        );
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].label, "Query 01");
        assert_eq!(statements[0].text, "SELECT 1;");
    }

    #[test]
    fn test_duplicate_label_keeps_first() {
        let statements = parse("-- Query 01\nSELECT 1;\n-- Query 01\nSELECT 2;");
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].text, "SELECT 1;");
    }

    #[test]
    fn test_label_line_variants() {
        assert_eq!(parse_label("-- Query 07"), Some(("07".to_string(), None)));
        assert_eq!(parse_label("--QUERY 7."), Some(("7".to_string(), None)));
        assert_eq!(
            parse_label("---- query 12: daily sales"),
            Some(("12".to_string(), Some("daily sales".to_string())))
        );
        assert_eq!(parse_label("-- Queryable tables"), None);
        assert_eq!(parse_label("-- Query"), None);
        assert_eq!(parse_label("SELECT 1 -- Query 1"), None);
        assert_eq!(parse_label("-- comment"), None);
    }

    #[test]
    fn test_iterator_is_lazy() {
        let mut iter = extract(THREE_QUERIES, &[]);
        assert_eq!(iter.next().map(|s| s.label), Some("Query 01".to_string()));
        assert_eq!(iter.next().map(|s| s.label), Some("Query 02".to_string()));
    }

    #[test]
    fn test_select_preserves_file_order() {
        let statements = parse(THREE_QUERIES);
        let requested = vec!["03".to_string(), "01".to_string()];
        let selection = select(&statements, Some(&requested));

        let labels: Vec<_> = selection.statements.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["Query 01", "Query 03"]);
        assert!(selection.unknown.is_empty());
    }

    #[test]
    fn test_select_reports_unknown() {
        let statements = parse(THREE_QUERIES);
        let requested = vec!["02".to_string(), "99".to_string()];
        let selection = select(&statements, Some(&requested));

        assert_eq!(selection.statements.len(), 1);
        assert_eq!(selection.statements[0], statements[1]);
        assert_eq!(selection.unknown, vec!["99".to_string()]);
    }

    #[test]
    fn test_select_numeric_and_prefixed_ids() {
        let statements = parse(THREE_QUERIES);
        let requested = vec!["2".to_string(), "Query 3".to_string()];
        let selection = select(&statements, Some(&requested));
        let labels: Vec<_> = selection.statements.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["Query 02", "Query 03"]);
    }

    #[test]
    fn test_select_all() {
        let statements = parse(THREE_QUERIES);
        let selection = select(&statements, None);
        assert_eq!(selection.statements, statements);
    }
}
