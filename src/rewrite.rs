//!
//! querywarden rewrite engine
//! --------------------------
//! Deterministic rewriting of a generated SELECT so it satisfies the business
//! invariants of the consolidated sales table.
//!
//! Responsibilities:
//! - Tokenize and locate top-level clauses without a full SQL parser (`scanner`).
//! - Admit only single read-only SELECT statements (`validate`).
//! - Inject blank-exclusion and level predicates into WHERE (`enforce`).
//! - Roll up un-aggregated entity listings (`aggregate`).
//! - Report the base columns a statement reads (`columns`).
//!
//! Each pass takes a `ValidSql` and returns one. A pass whose output no longer
//! scans is discarded and the input is returned, so the engine never emits a
//! statement it cannot account for.

use tracing::{debug, warn};

pub mod aggregate;
pub mod business;
pub mod columns;
pub mod enforce;
pub mod level_rules;
pub mod scanner;
pub mod validate;

pub use aggregate::{normalize, AggregationDecision};
pub use business::{Aliased, BusinessRules};
pub use columns::extract_columns;
pub use enforce::enforce;
pub use level_rules::{LevelRule, LevelRules};
pub use scanner::{scan, ClauseKind, ClauseMap, ScanError};
pub use validate::{validate, validate_sql, Rejection, ValidSql};

/// Adopt `rewritten` if it still scans as one statement; otherwise keep `original`.
pub(crate) fn adopt_rewrite(original: ValidSql, rewritten: String, step: &str) -> ValidSql {
    match ValidSql::rescan(rewritten) {
        Ok(next) => {
            debug!(target: "querywarden::rewrite", "{}: {}", step, next);
            next
        }
        Err(e) => {
            warn!(target: "querywarden::rewrite", "{} rewrite dropped, output no longer scans: {}", step, e);
            original
        }
    }
}

/// Enforcement followed by aggregation normalization.
pub fn apply_rules(sql: ValidSql, question: &str, rules: &BusinessRules) -> ValidSql {
    normalize(enforce(sql, question, rules), rules)
}
