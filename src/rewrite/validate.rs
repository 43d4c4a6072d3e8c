//! Candidate validation: the only entry point that turns untrusted text into `ValidSql`.

use std::fmt::{Display, Formatter};

use thiserror::Error;
use tracing::debug;

use crate::generation::CandidateStatement;
use crate::rewrite::scanner::{scan, ClauseKind, ClauseMap, ScanError};

/// A single, read-only SELECT statement together with its clause map.
/// Built by `validate_sql` and by the rewrite passes from their own output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidSql {
    sql: String,
    map: ClauseMap,
}

impl ValidSql {
    /// Re-derive the clause map for rewritten text.
    pub(crate) fn rescan(sql: String) -> Result<Self, ScanError> {
        let map = scan(&sql)?;
        Ok(Self { sql, map })
    }

    pub fn as_str(&self) -> &str {
        &self.sql
    }

    pub fn clauses(&self) -> &ClauseMap {
        &self.map
    }

    pub fn into_string(self) -> String {
        self.sql
    }
}

impl Display for ValidSql {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sql)
    }
}

impl AsRef<str> for ValidSql {
    fn as_ref(&self) -> &str {
        &self.sql
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("only read-only SELECT statements are accepted")]
    NotReadOnly,
    #[error("malformed statement: {0}")]
    Malformed(#[from] ScanError),
}

fn starts_with_select(text: &str) -> bool {
    let head = match text.get(..6) {
        Some(h) => h,
        None => return false,
    };
    if !head.eq_ignore_ascii_case("SELECT") {
        return false;
    }
    match text.as_bytes().get(6) {
        None => true,
        Some(b) => !(b.is_ascii_alphanumeric() || *b == b'_'),
    }
}

/// `SELECT ... INTO <table>` creates a table; treat it as a write.
fn selects_into(sql: &ValidSql) -> bool {
    let map = sql.clauses();
    match map.get(ClauseKind::Select) {
        Some(select) => map.tokens_in(&select.body).iter().any(|t| t.depth == 0 && t.is_word(sql.as_str(), "INTO")),
        None => false,
    }
}

pub fn validate(candidate: &CandidateStatement) -> Result<ValidSql, Rejection> {
    validate_sql(&candidate.sql)
}

/// Accept exactly one top-level SELECT. The stored text is trimmed and loses a trailing `;`.
pub fn validate_sql(text: &str) -> Result<ValidSql, Rejection> {
    let trimmed = text.trim();
    if !starts_with_select(trimmed) {
        debug!(target: "querywarden::validate", "rejected: statement does not start with SELECT");
        return Err(Rejection::NotReadOnly);
    }
    let map = scan(trimmed).map_err(|e| {
        debug!(target: "querywarden::validate", "rejected: {}", e);
        Rejection::Malformed(e)
    })?;
    let valid = if map.statement_end() == trimmed.len() {
        ValidSql { sql: trimmed.to_string(), map }
    } else {
        ValidSql::rescan(trimmed[..map.statement_end()].trim_end().to_string())?
    };
    if selects_into(&valid) {
        debug!(target: "querywarden::validate", "rejected: SELECT ... INTO");
        return Err(Rejection::NotReadOnly);
    }
    Ok(valid)
}
