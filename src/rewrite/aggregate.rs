//! Aggregation normalizer: a statement that mentions an entity column but
//! never aggregates is rolled up to `entity, SUM(metric)` per entity.

use std::ops::Range;

use tracing::{debug, warn};

use crate::ident::ident_key;
use crate::rewrite::adopt_rewrite;
use crate::rewrite::business::{Aliased, BusinessRules};
use crate::rewrite::enforce::{canonical_predicate, conjuncts};
use crate::rewrite::level_rules::not_blank_predicate;
use crate::rewrite::scanner::{canonical_texts, tokenize, ClauseKind, ClauseMap, Token, TokenKind};
use crate::rewrite::validate::ValidSql;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationDecision<'a> {
    /// A SUM(...) or GROUP BY is already present.
    AlreadyAggregated,
    /// No entity column is referenced.
    NoEntity,
    RollUp(&'a Aliased),
}

/// Predicates the enforcer owns. An entity column mentioned only inside one of
/// them says nothing about what the statement lists.
fn rule_predicates(rules: &BusinessRules) -> Vec<Vec<String>> {
    let mut predicates: Vec<String> = rules.not_blank_columns.iter().map(|c| not_blank_predicate(c)).collect();
    for rule in rules.levels.rules() {
        predicates.push(rule.predicate.clone());
        if let Some(companion) = &rule.companion {
            predicates.push(companion.predicate());
        }
    }
    predicates.iter().filter_map(|p| canonical_predicate(p)).collect()
}

/// Byte spans of top-level WHERE conjuncts that are rule predicates.
fn rule_conjunct_spans(text: &str, map: &ClauseMap, rules: &BusinessRules) -> Vec<Range<usize>> {
    let Some(w) = map.get(ClauseKind::Where) else {
        return Vec::new();
    };
    let body = map.tokens_in(&w.body);
    let Some(parts) = conjuncts(text, body) else {
        return Vec::new();
    };
    let owned = rule_predicates(rules);
    let hay = canonical_texts(text, body);
    parts
        .into_iter()
        .filter(|r| !r.is_empty() && owned.iter().any(|p| hay[r.clone()] == p[..]))
        .map(|r| body[r.start].span.start..body[r.end - 1].span.end)
        .collect()
}

pub fn decide<'a>(sql: &ValidSql, rules: &'a BusinessRules) -> AggregationDecision<'a> {
    let text = sql.as_str();
    let map = sql.clauses();
    let tokens = map.tokens();
    let has_sum = tokens.windows(2).any(|w| w[0].is_word(text, "SUM") && w[1].kind == TokenKind::LParen);
    let has_group = tokens.windows(2).any(|w| w[0].is_word(text, "GROUP") && w[1].is_word(text, "BY"));
    if has_sum || has_group {
        return AggregationDecision::AlreadyAggregated;
    }
    let skipped = rule_conjunct_spans(text, map, rules);
    let mentioned: Vec<String> = tokens
        .iter()
        .filter(|t| t.is_identifier())
        .filter(|t| !skipped.iter().any(|s| s.start <= t.span.start && t.span.end <= s.end))
        .map(|t| ident_key(t.text(text)))
        .collect();
    rules
        .entities
        .iter()
        .find(|e| mentioned.contains(&ident_key(&e.column)))
        .map(AggregationDecision::RollUp)
        .unwrap_or(AggregationDecision::NoEntity)
}

pub fn normalize(sql: ValidSql, rules: &BusinessRules) -> ValidSql {
    match decide(&sql, rules) {
        AggregationDecision::RollUp(entity) => roll_up(sql, entity, &rules.metric),
        decision => {
            debug!(target: "querywarden::aggregate", "unchanged: {:?}", decision);
            sql
        }
    }
}

/// Text joining a kept segment to the clause that follows it. Comments trailing
/// the segment are carried over and closed by a line break so they cannot swallow it.
fn joiner(trivia: &str) -> String {
    let trivia = trivia.trim();
    if trivia.is_empty() {
        " ".to_string()
    } else {
        format!(" {}\n", trivia)
    }
}

fn roll_up(sql: ValidSql, entity: &Aliased, metric: &Aliased) -> ValidSql {
    let text = sql.as_str();
    let map = sql.clauses();
    let (Some(select), Some(from)) = (map.get(ClauseKind::Select), map.get(ClauseKind::From)) else {
        return sql;
    };
    let having = map.get(ClauseKind::Having);
    let order_by = map.get(ClauseKind::OrderBy);
    let stop = map.statement_end();
    let core_end = map.get(ClauseKind::Where).map(|w| w.body.end).unwrap_or(from.body.end);
    let sum = format!("SUM({})", metric.column);

    let mut out = String::with_capacity(text.len() + 96);
    out.push_str("SELECT ");
    if let Some(top) = top_prefix(text, map.tokens_in(&select.body)) {
        out.push_str(top);
        out.push(' ');
    }
    out.push_str(&format!("{} AS {}, {} AS {} ", entity.column, entity.alias, sum, metric.alias));
    out.push_str(&text[from.keyword.start..core_end]);
    let next = having.or(order_by).map(|c| c.keyword.start).unwrap_or(stop);
    out.push_str(&joiner(&text[core_end..next]));
    out.push_str(&format!("GROUP BY {}", entity.column));
    if let Some(h) = having {
        let next = order_by.map(|c| c.keyword.start).unwrap_or(stop);
        out.push(' ');
        out.push_str(&text[h.keyword.start..h.body.end]);
        out.push_str(&joiner(&text[h.body.end..next]));
    } else {
        out.push(' ');
    }
    out.push_str(&ordering(text, map, &sum));

    let rolled = adopt_rewrite(sql.clone(), out, "aggregate");
    if !(rolled.clauses().has(ClauseKind::GroupBy) && rolled.clauses().has(ClauseKind::OrderBy)) {
        warn!(target: "querywarden::aggregate", "roll-up by {} lost its GROUP BY/ORDER BY; kept input", entity.column);
        return sql;
    }
    debug!(target: "querywarden::aggregate", "rolled up by {}", entity.column);
    rolled
}

/// `TOP n [PERCENT] [WITH TIES]` at the head of the select list, after any DISTINCT/ALL.
fn top_prefix<'a>(text: &'a str, tokens: &[Token]) -> Option<&'a str> {
    let mut i = 0;
    while tokens.get(i).map(|t| t.is_word(text, "DISTINCT") || t.is_word(text, "ALL")).unwrap_or(false) {
        i += 1;
    }
    let top = tokens.get(i)?;
    if !top.is_word(text, "TOP") {
        return None;
    }
    let mut j = i + 1;
    let count = tokens.get(j)?;
    match count.kind {
        TokenKind::Number => j += 1,
        TokenKind::LParen => {
            j += 1;
            while j < tokens.len() && !(tokens[j].kind == TokenKind::RParen && tokens[j].depth == count.depth) {
                j += 1;
            }
            if j == tokens.len() {
                return None;
            }
            j += 1;
        }
        _ => return None,
    }
    if tokens.get(j).map(|t| t.is_word(text, "PERCENT")).unwrap_or(false) {
        j += 1;
    }
    let ties = tokens.get(j).map(|t| t.is_word(text, "WITH")).unwrap_or(false)
        && tokens.get(j + 1).map(|t| t.is_word(text, "TIES")).unwrap_or(false);
    if ties {
        j += 2;
    }
    Some(&text[top.span.start..tokens[j - 1].span.end])
}

/// `ORDER BY <sum> DESC`, keeping an existing identical ordering and any OFFSET/FETCH tail.
fn ordering(text: &str, map: &ClauseMap, sum: &str) -> String {
    let wanted = format!("{} DESC", sum);
    let Some(ob) = map.get(ClauseKind::OrderBy) else {
        return format!("ORDER BY {}", wanted);
    };
    let tokens = map.tokens_in(&ob.body);
    let split = tokens.iter().position(|t| t.depth == 0 && t.is_word(text, "OFFSET")).unwrap_or(tokens.len());
    let keys = &tokens[..split];

    let wanted_canon = tokenize(&wanted).map(|t| canonical_texts(&wanted, &t)).unwrap_or_default();
    let mut out = match keys.last() {
        Some(last) if canonical_texts(text, keys) == wanted_canon => text[ob.keyword.start..last.span.end].to_string(),
        _ => format!("ORDER BY {}", wanted),
    };
    if let Some(offset) = tokens.get(split) {
        out.push(' ');
        out.push_str(&text[offset.span.start..ob.body.end]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::scanner::scan;
    use crate::rewrite::validate::validate_sql;

    fn normalized(sql: &str) -> String {
        normalize(validate_sql(sql).expect("valid"), &BusinessRules::default()).into_string()
    }

    #[test]
    fn store_listing_rolls_up() {
        assert_eq!(
            normalized("SELECT [Profitcenter_Name], [Sales] FROM [dbo].[T]"),
            "SELECT [Profitcenter_Name] AS [Store Name], SUM([Sales]) AS [Sales] FROM [dbo].[T] \
             GROUP BY [Profitcenter_Name] ORDER BY SUM([Sales]) DESC"
        );
    }

    #[test]
    fn entity_priority_follows_granularity() {
        let out = normalized("SELECT [Region_Name], [Company_Name], [Sales] FROM [T]");
        assert!(out.starts_with("SELECT [Company_Name] AS [Company Name], SUM([Sales]) AS [Sales] FROM [T]"), "{}", out);
        assert!(out.contains("GROUP BY [Company_Name]"));
    }

    #[test]
    fn top_where_and_paging_survive_distinct_does_not() {
        let out = normalized(
            "SELECT DISTINCT TOP 5 [Company_Name], [Sales] FROM [T] WHERE [Year] = 2024 \
             ORDER BY [Sales] DESC OFFSET 0 ROWS FETCH NEXT 5 ROWS ONLY",
        );
        assert_eq!(
            out,
            "SELECT TOP 5 [Company_Name] AS [Company Name], SUM([Sales]) AS [Sales] FROM [T] WHERE [Year] = 2024 \
             GROUP BY [Company_Name] ORDER BY SUM([Sales]) DESC OFFSET 0 ROWS FETCH NEXT 5 ROWS ONLY"
        );
    }

    #[test]
    fn group_by_is_placed_before_having() {
        let out = normalized("SELECT [Region_Name] FROM [T] HAVING COUNT(*) > 1");
        assert_eq!(
            out,
            "SELECT [Region_Name] AS [Region Name], SUM([Sales]) AS [Sales] FROM [T] \
             GROUP BY [Region_Name] HAVING COUNT(*) > 1 ORDER BY SUM([Sales]) DESC"
        );
    }

    #[test]
    fn already_aggregated_or_entity_free_statements_pass_through() {
        let rules = BusinessRules::default();
        for sql in [
            "SELECT [Company_Name], SUM([Sales]) FROM [T] GROUP BY [Company_Name]",
            "SELECT [Company_Name], sum ([Sales]) FROM [T]",
            "SELECT [Sales] FROM [T] WHERE [Year] = 2024",
            "SELECT [Sales] FROM [T] WHERE [Note] = '[Company_Name]'",
        ] {
            let v = validate_sql(sql).unwrap();
            assert_eq!(normalize(v.clone(), &rules), v, "sql: {}", sql);
        }
    }

    #[test]
    fn entity_anywhere_in_the_statement_triggers_the_roll_up() {
        let rules = BusinessRules::default();
        let v = validate_sql("SELECT [Sales] FROM [T] WHERE [Company_Name] = 'Acme'").unwrap();
        assert_eq!(decide(&v, &rules), AggregationDecision::RollUp(&rules.entities[1]));
        assert_eq!(
            normalize(v, &rules).as_str(),
            "SELECT [Company_Name] AS [Company Name], SUM([Sales]) AS [Sales] FROM [T] WHERE [Company_Name] = 'Acme' \
             GROUP BY [Company_Name] ORDER BY SUM([Sales]) DESC"
        );
    }

    #[test]
    fn entities_inside_rule_predicates_do_not_count() {
        let rules = BusinessRules::default();
        let v = validate_sql(
            "SELECT [Region_Name], [Sales] FROM [T] WHERE ISNULL(LTRIM(RTRIM([Region_Name])), '') NOT IN ('', 'N/A') \
             AND [Level] = '2' AND [Company_Name] IS NULL",
        )
        .unwrap();
        assert_eq!(decide(&v, &rules), AggregationDecision::RollUp(&rules.entities[2]));

        let v = validate_sql("SELECT [Sales] FROM [T] WHERE ISNULL(LTRIM(RTRIM([Company_Name])), '') NOT IN ('', 'N/A')").unwrap();
        assert_eq!(decide(&v, &rules), AggregationDecision::NoEntity);
        // a rule predicate buried in a disjunction is the generator's own filter
        let v = validate_sql("SELECT [Sales] FROM [T] WHERE [Profitcenter_Name] IS NULL OR [Year] = 2024").unwrap();
        assert_eq!(decide(&v, &rules), AggregationDecision::RollUp(&rules.entities[0]));
    }

    #[test]
    fn trailing_line_comment_cannot_swallow_new_clauses() {
        let out = normalized("SELECT [Profitcenter_Name], [Sales] FROM [T] -- all rows\nORDER BY [Sales] DESC");
        assert_eq!(
            out,
            "SELECT [Profitcenter_Name] AS [Store Name], SUM([Sales]) AS [Sales] FROM [T] -- all rows\n\
             GROUP BY [Profitcenter_Name] ORDER BY SUM([Sales]) DESC"
        );

        let out = normalized("SELECT [Region_Name] FROM [T] WHERE [x] = 1 -- filter\nHAVING COUNT(*) > 1 -- keep\nORDER BY [x]");
        assert_eq!(
            out,
            "SELECT [Region_Name] AS [Region Name], SUM([Sales]) AS [Sales] FROM [T] WHERE [x] = 1 -- filter\n\
             GROUP BY [Region_Name] HAVING COUNT(*) > 1 -- keep\nORDER BY SUM([Sales]) DESC"
        );

        let out = normalized("SELECT [Company_Name] FROM [T] WHERE [x] = 1 -- last line");
        assert!(out.ends_with("-- last line\nGROUP BY [Company_Name] ORDER BY SUM([Sales]) DESC"), "{}", out);
        let map = scan(&out).expect("scan");
        assert!(map.has(ClauseKind::GroupBy) && map.has(ClauseKind::OrderBy));
    }

    #[test]
    fn block_comment_inside_where_is_kept_verbatim() {
        let out = normalized("SELECT [Company_Name] FROM [T] WHERE [x] = 1 /* fiscal */ AND [y] = 2");
        assert_eq!(
            out,
            "SELECT [Company_Name] AS [Company Name], SUM([Sales]) AS [Sales] FROM [T] WHERE [x] = 1 /* fiscal */ AND [y] = 2 \
             GROUP BY [Company_Name] ORDER BY SUM([Sales]) DESC"
        );
    }

    #[test]
    fn normalizing_twice_is_a_no_op() {
        let once = normalized("SELECT TOP 10 [Profitcenter_Name] FROM [T]");
        assert_eq!(normalized(&once), once);
    }
}
