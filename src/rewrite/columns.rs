//! Referenced-column extraction.
//!
//! Every bracket-quoted identifier is classified by where it stands. An
//! operand of FROM/JOIN or a `.` qualifier is a table, the target of AS or an
//! alias after a table is an alias, and the source of a plain `[X] AS [Y]`
//! select item is only a rename. Whatever remains is a base column.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use tracing::debug;

use crate::ident::{ident_key, unquote};
use crate::rewrite::scanner::{scan, tokenize, ClauseKind, Token, TokenKind};

/// Identifiers dropped from the output even when bracket-quoted.
const RESERVED: &[&str] = &[
    "SELECT", "FROM", "WHERE", "TOP", "ORDER BY", "GROUP BY", "HAVING", "JOIN", "ON", "AS", "END", "CASE", "WHEN",
    "THEN", "ELSE", "ISNULL", "LTRIM", "RTRIM", "OFFSET", "ROWS", "FETCH", "NEXT", "ONLY", "DESC", "ASC",
];

/// Unquoted words that end a table reference instead of aliasing it.
const TABLE_TERMINATORS: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "HAVING", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS", "ON", "WITH",
    "UNION", "OPTION", "AS",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceRole {
    Column,
    Table,
    Alias,
    /// `[X]` in a select item `[X] AS [Y]`.
    AliasSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnReference {
    /// Unquoted identifier text.
    pub name: String,
    pub role: ReferenceRole,
    pub span: Range<usize>,
}

/// Base columns referenced by `sql`, unquoted. Never fails; malformed input
/// yields whatever could be classified.
pub fn extract_columns(sql: &str) -> BTreeSet<String> {
    let mut by_key: BTreeMap<String, String> = BTreeMap::new();
    for r in classify_references(sql) {
        if r.role != ReferenceRole::Column {
            continue;
        }
        let upper = r.name.to_uppercase();
        if RESERVED.contains(&upper.as_str()) {
            continue;
        }
        by_key.entry(ident_key(&r.name)).or_insert(r.name);
    }
    by_key.into_values().collect()
}

/// Every bracket-quoted identifier of `sql` with its positional role.
pub fn classify_references(sql: &str) -> Vec<ColumnReference> {
    let tokens = match tokenize(sql) {
        Ok(t) => t,
        Err(e) => {
            debug!(target: "querywarden::columns", "no columns extracted: {}", e);
            return Vec::new();
        }
    };
    let mut roles: Vec<Option<ReferenceRole>> = vec![None; tokens.len()];

    let mut i = 0;
    while i < tokens.len() {
        let is_from = tokens[i].is_word(sql, "FROM");
        if (is_from || tokens[i].is_word(sql, "JOIN")) && in_select_scope(sql, &tokens, i) {
            i = mark_table_refs(sql, &tokens, i + 1, is_from, &mut roles);
        } else {
            i += 1;
        }
    }

    // `[s].[Sales]`: the qualifier names a table or table alias.
    for k in 1..tokens.len() {
        if tokens[k].kind == TokenKind::Dot && roles[k - 1].is_none() {
            roles[k - 1] = Some(ReferenceRole::Table);
        }
    }

    for k in 1..tokens.len() {
        if tokens[k - 1].is_word(sql, "AS") && tokens[k].kind == TokenKind::Bracketed && roles[k].is_none() {
            roles[k] = Some(ReferenceRole::Alias);
        }
    }

    // Select-list renames and ORDER BY references to output aliases need the clause map.
    if let Ok(map) = scan(sql) {
        if let Some(select) = map.get(ClauseKind::Select) {
            let range = index_range(&tokens, &select.body);
            for item in split_items(&tokens, range) {
                if let Some(source) = rename_source(sql, &tokens, item) {
                    roles[source] = Some(ReferenceRole::AliasSource);
                }
            }
        }
        if let Some(order_by) = map.get(ClauseKind::OrderBy) {
            let aliases: Vec<String> = tokens
                .iter()
                .zip(&roles)
                .filter(|(_, r)| **r == Some(ReferenceRole::Alias))
                .map(|(t, _)| ident_key(t.text(sql)))
                .collect();
            for k in index_range(&tokens, &order_by.body) {
                if tokens[k].kind == TokenKind::Bracketed && roles[k].is_none() && aliases.contains(&ident_key(tokens[k].text(sql))) {
                    roles[k] = Some(ReferenceRole::Alias);
                }
            }
        }
    }

    tokens
        .iter()
        .zip(roles)
        .filter(|(t, _)| t.kind == TokenKind::Bracketed)
        .map(|(t, role)| ColumnReference {
            name: unquote(t.text(sql)),
            role: role.unwrap_or(ReferenceRole::Column),
            span: t.span.clone(),
        })
        .collect()
}

/// Mark `name[.name...] [[AS] alias]` operands starting at `start`; FROM accepts a comma list.
/// Returns the index after the last consumed token.
fn mark_table_refs(sql: &str, tokens: &[Token], start: usize, list: bool, roles: &mut [Option<ReferenceRole>]) -> usize {
    let mut j = start;
    loop {
        let Some(first) = tokens.get(j) else { return j };
        if !first.is_identifier() || is_terminator(sql, first) {
            return j;
        }
        let depth = first.depth;
        roles[j] = Some(ReferenceRole::Table);
        j += 1;
        while j + 1 < tokens.len() && tokens[j].kind == TokenKind::Dot && tokens[j + 1].is_identifier() {
            roles[j + 1] = Some(ReferenceRole::Table);
            j += 2;
        }
        let explicit_as = tokens.get(j).map(|t| t.is_word(sql, "AS")).unwrap_or(false);
        let alias_at = if explicit_as { j + 1 } else { j };
        if let Some(alias) = tokens.get(alias_at) {
            if alias.is_identifier() && !is_terminator(sql, alias) {
                roles[alias_at] = Some(ReferenceRole::Alias);
                j = alias_at + 1;
            }
        }
        let comma = tokens.get(j).map(|t| t.kind == TokenKind::Comma && t.depth == depth).unwrap_or(false);
        if list && comma {
            j += 1;
            continue;
        }
        return j;
    }
}

/// True when the keyword at `at` belongs to a SELECT at its own nesting level,
/// as opposed to a function argument such as `TRIM(' ' FROM [x])`.
fn in_select_scope(sql: &str, tokens: &[Token], at: usize) -> bool {
    let depth = tokens[at].depth;
    for t in tokens[..at].iter().rev() {
        if t.depth == depth && t.is_word(sql, "SELECT") {
            return true;
        }
        if t.kind == TokenKind::LParen && t.depth < depth {
            return false;
        }
    }
    false
}

fn is_terminator(sql: &str, t: &Token) -> bool {
    t.kind == TokenKind::Word && TABLE_TERMINATORS.iter().any(|w| t.is_word(sql, w))
}

/// Token indices whose spans lie inside `span`.
fn index_range(tokens: &[Token], span: &Range<usize>) -> Range<usize> {
    let lo = tokens.partition_point(|t| t.span.start < span.start);
    let hi = tokens.partition_point(|t| t.span.end <= span.end);
    lo..hi.max(lo)
}

/// Split a token range at commas of the range's own nesting level.
fn split_items(tokens: &[Token], range: Range<usize>) -> Vec<Range<usize>> {
    let Some(first) = tokens.get(range.start) else { return Vec::new() };
    let depth = first.depth;
    let mut items = Vec::new();
    let mut start = range.start;
    for k in range.clone() {
        if tokens[k].kind == TokenKind::Comma && tokens[k].depth == depth {
            items.push(start..k);
            start = k + 1;
        }
    }
    items.push(start..range.end);
    items
}

/// Index of `[X]` when the item reads `[X] AS [Y]`, allowing a DISTINCT/TOP prefix.
fn rename_source(sql: &str, tokens: &[Token], item: Range<usize>) -> Option<usize> {
    if item.len() < 3 {
        return None;
    }
    let src = item.end - 3;
    let plain = tokens[src].kind == TokenKind::Bracketed
        && tokens[src + 1].is_word(sql, "AS")
        && tokens[src + 2].kind == TokenKind::Bracketed;
    let prefix_ok = tokens[item.start..src].iter().all(|t| {
        matches!(t.kind, TokenKind::Number | TokenKind::LParen | TokenKind::RParen)
            || ["DISTINCT", "ALL", "TOP", "PERCENT"].iter().any(|w| t.is_word(sql, w))
    });
    (plain && prefix_ok).then_some(src)
}
