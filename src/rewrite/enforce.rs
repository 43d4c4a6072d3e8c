//! Null-safety and level-rule injection.
//!
//! Predicates are only ever added to the top-level WHERE clause. An existing
//! predicate is detected by token equivalence against the top-level conjuncts,
//! so a second pass over already enforced SQL is a no-op.

use std::ops::Range;

use tracing::debug;

use crate::ident::ident_key;
use crate::rewrite::business::BusinessRules;
use crate::rewrite::level_rules::{not_blank_predicate, LevelRule};
use crate::rewrite::scanner::{canonical_texts, tokenize, ClauseKind, Token, TokenKind};
use crate::rewrite::adopt_rewrite;
use crate::rewrite::validate::ValidSql;

const TARGET: &str = "querywarden::enforce";

pub fn enforce(sql: ValidSql, question: &str, rules: &BusinessRules) -> ValidSql {
    let matched = rules.levels.matching(question);
    let nulled: Vec<&str> = matched.iter().filter_map(|r| r.nulled_column()).collect();
    let nulled_keys: Vec<String> = nulled.iter().map(|c| ident_key(c)).collect();

    let mut out = sql;
    // A column the level forces to NULL cannot also be required non-blank.
    for column in &nulled {
        out = remove_predicate(out, &not_blank_predicate(column));
    }
    for column in &rules.not_blank_columns {
        if nulled_keys.contains(&ident_key(column)) {
            debug!(target: TARGET, "blank exclusion on {} skipped: level rule requires NULL", column);
            continue;
        }
        out = inject(out, &not_blank_predicate(column));
    }
    for rule in matched {
        debug!(target: TARGET, "level phrase '{}' -> {}", rule.phrase, rule.predicate);
        out = replace_echoed_phrase(out, rule);
        out = inject(out, &rule.predicate);
        if let Some(companion) = &rule.companion {
            out = inject(out, &companion.predicate());
        }
    }
    out
}

/// AND `predicate` onto the top-level WHERE, creating the clause after FROM when absent.
pub fn inject(sql: ValidSql, predicate: &str) -> ValidSql {
    if contains_predicate(&sql, predicate) {
        return sql;
    }
    let text = sql.as_str();
    let map = sql.clauses();
    let rewritten = match map.get(ClauseKind::Where) {
        Some(w) if w.body.is_empty() => {
            format!("{} {}{}", &text[..w.body.start], predicate, &text[w.body.end..])
        }
        Some(w) => {
            let body = &text[w.body.clone()];
            let body = if has_top_level_or(text, map.tokens_in(&w.body)) {
                format!("({})", body)
            } else {
                body.to_string()
            };
            format!("{}{} AND {}{}", &text[..w.body.start], body, predicate, &text[w.body.end..])
        }
        None => {
            let at = match map.get(ClauseKind::From) {
                Some(from) => from.body.end,
                None => return sql,
            };
            format!("{} WHERE {}{}", &text[..at], predicate, &text[at..])
        }
    };
    adopt_rewrite(sql, rewritten, "inject")
}

fn has_top_level_or(text: &str, body: &[Token]) -> bool {
    body.iter().any(|t| t.depth == 0 && t.is_word(text, "OR"))
}

/// Token-index ranges of the top-level AND conjuncts of a WHERE body.
/// `None` when the body has a top-level OR.
pub(crate) fn conjuncts(text: &str, body: &[Token]) -> Option<Vec<Range<usize>>> {
    if has_top_level_or(text, body) {
        return None;
    }
    let mut parts = Vec::new();
    let mut start = 0;
    for (k, t) in body.iter().enumerate() {
        if t.depth == 0 && t.is_word(text, "AND") {
            parts.push(start..k);
            start = k + 1;
        }
    }
    parts.push(start..body.len());
    Some(parts)
}

/// Canonical token texts of a predicate; `None` when it does not tokenize or is empty.
pub(crate) fn canonical_predicate(predicate: &str) -> Option<Vec<String>> {
    let tokens = tokenize(predicate).ok()?;
    let canon = canonical_texts(predicate, &tokens);
    (!canon.is_empty()).then_some(canon)
}

/// Conjuncts of the top-level WHERE and the index of the one equivalent to `predicate`.
fn matching_conjunct(sql: &ValidSql, predicate: &str) -> Option<(Vec<Range<usize>>, usize)> {
    let text = sql.as_str();
    let map = sql.clauses();
    let w = map.get(ClauseKind::Where)?;
    let body = map.tokens_in(&w.body);
    let needle = canonical_predicate(predicate)?;
    let parts = conjuncts(text, body)?;
    let hay = canonical_texts(text, body);
    let at = parts.iter().position(|r| hay[r.clone()] == needle[..])?;
    Some((parts, at))
}

/// True when `predicate` already stands as a whole top-level conjunct of the WHERE clause.
pub fn contains_predicate(sql: &ValidSql, predicate: &str) -> bool {
    matching_conjunct(sql, predicate).is_some()
}

/// Drop the top-level conjunct equivalent to `predicate` together with its AND,
/// or the whole WHERE clause when it was the only conjunct.
pub fn remove_predicate(sql: ValidSql, predicate: &str) -> ValidSql {
    let Some((parts, at)) = matching_conjunct(&sql, predicate) else {
        return sql;
    };
    if parts.iter().any(|r| r.is_empty()) {
        return sql;
    }
    let text = sql.as_str();
    let map = sql.clauses();
    let Some(w) = map.get(ClauseKind::Where) else {
        return sql;
    };
    let body = map.tokens_in(&w.body);
    let cut = if parts.len() == 1 {
        let before = map.tokens().iter().rev().find(|t| t.span.end <= w.keyword.start);
        before.map(|t| t.span.end).unwrap_or(w.keyword.start)..w.body.end
    } else if at == 0 {
        body[parts[0].start].span.start..body[parts[1].start].span.start
    } else {
        body[parts[at - 1].end - 1].span.end..body[parts[at].end - 1].span.end
    };
    let rewritten = format!("{}{}", &text[..cut.start], &text[cut.end..]);
    debug!(target: TARGET, "dropped conjunct {}", predicate);
    adopt_rewrite(sql, rewritten, "drop predicate")
}

/// Replace a level phrase the generator echoed into WHERE (`[Level] = 'store level data'`
/// or the bare words) with the rule's categorical predicate.
fn replace_echoed_phrase(sql: ValidSql, rule: &LevelRule) -> ValidSql {
    let text = sql.as_str();
    let map = sql.clauses();
    let Some(w) = map.get(ClauseKind::Where) else {
        return sql;
    };
    let tokens = map.tokens_in(&w.body);
    let words: Vec<&str> = rule.phrase.split_whitespace().collect();

    let mut edits: Vec<Range<usize>> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let lit = tokens[i].literal_value(text).map(|v| v.trim().to_lowercase());
        if lit.as_deref() == Some(rule.phrase.as_str()) {
            // A literal outside a comparison (e.g. an IN list) is left alone.
            if let Some(start) = comparison_start(text, tokens, i) {
                edits.push(start..tokens[i].span.end);
            }
            i += 1;
            continue;
        }
        let end = i + words.len();
        if !words.is_empty() && end <= tokens.len() && tokens[i..end].iter().zip(&words).all(|(t, w)| t.is_word(text, w)) {
            edits.push(tokens[i].span.start..tokens[end - 1].span.end);
            i = end;
            continue;
        }
        i += 1;
    }
    if edits.is_empty() {
        return sql;
    }

    let mut rewritten = text.to_string();
    for span in edits.iter().rev() {
        rewritten.replace_range(span.clone(), &rule.predicate);
    }
    debug!(target: TARGET, "replaced {} echoed '{}' phrase(s)", edits.len(), rule.phrase);
    adopt_rewrite(sql, rewritten, "level phrase")
}

/// Start offset of `<operand> = ` preceding the literal at `lit`, with dotted qualifiers.
fn comparison_start(text: &str, tokens: &[Token], lit: usize) -> Option<usize> {
    if lit < 2 {
        return None;
    }
    let op = &tokens[lit - 1];
    if op.kind != TokenKind::Operator || op.text(text) != "=" {
        return None;
    }
    let mut j = lit - 2;
    if !tokens[j].is_identifier() {
        return None;
    }
    while j >= 2 && tokens[j - 1].kind == TokenKind::Dot && tokens[j - 2].is_identifier() {
        j -= 2;
    }
    Some(tokens[j].span.start)
}
