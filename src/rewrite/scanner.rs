//! Tolerant clause scanner
//! -----------------------
//! Splits a T-SQL statement into tokens (respecting `[...]` identifiers,
//! `'...'` literals, `"..."` identifiers and comments) and locates the
//! top-level SELECT / FROM / WHERE / GROUP BY / HAVING / ORDER BY clauses.
//!
//! The scanner never builds an expression tree. Every later rewrite consumes
//! the same `ClauseMap`, so keyword detection lives in exactly one place.

use std::fmt::{Display, Formatter};
use std::ops::Range;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    Bracketed,
    DoubleQuoted,
    Literal,
    Number,
    LParen,
    RParen,
    Comma,
    Dot,
    Semicolon,
    Operator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Range<usize>,
    /// Parenthesis nesting level (0 = top level). Parens carry the level of their enclosing context.
    pub depth: u32,
}

impl Token {
    pub fn text<'a>(&self, sql: &'a str) -> &'a str {
        &sql[self.span.clone()]
    }

    /// Unquoted word token equal to `word`, ignoring ASCII case.
    pub fn is_word(&self, sql: &str, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text(sql).eq_ignore_ascii_case(word)
    }

    pub fn is_identifier(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::Bracketed | TokenKind::DoubleQuoted)
    }

    /// Unescaped content of a string literal token (`N'..'` prefix accepted).
    pub fn literal_value(&self, sql: &str) -> Option<String> {
        if self.kind != TokenKind::Literal {
            return None;
        }
        let raw = self.text(sql);
        let raw = raw.strip_prefix(|c: char| c == 'N' || c == 'n').unwrap_or(raw);
        if raw.len() < 2 {
            return None;
        }
        Some(raw[1..raw.len() - 1].replace("''", "'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClauseKind {
    Select,
    From,
    Where,
    GroupBy,
    Having,
    OrderBy,
}

impl Display for ClauseKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClauseKind::Select => "SELECT",
            ClauseKind::From => "FROM",
            ClauseKind::Where => "WHERE",
            ClauseKind::GroupBy => "GROUP BY",
            ClauseKind::Having => "HAVING",
            ClauseKind::OrderBy => "ORDER BY",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("no top-level SELECT keyword found")]
    MissingSelect,
    #[error("no top-level FROM clause found")]
    MissingFrom,
    #[error("{kind} at offset {offset} is out of clause order")]
    OutOfOrder { kind: ClauseKind, offset: usize },
    #[error("compound statement ({keyword}) at offset {offset}")]
    Compound { keyword: String, offset: usize },
    #[error("content after statement terminator at offset {offset}")]
    TrailingStatement { offset: usize },
    #[error("unterminated {what} starting at offset {offset}")]
    Unterminated { what: &'static str, offset: usize },
}

/// One located clause. `keyword` covers the keyword text (both words for
/// GROUP BY / ORDER BY); `body` runs from the first to the last token of the
/// clause and is empty (positioned at the keyword end) when the clause has no tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub kind: ClauseKind,
    pub keyword: Range<usize>,
    pub body: Range<usize>,
}

/// Structural view over one statement: its tokens and its top-level clauses,
/// ordered by clause precedence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClauseMap {
    tokens: Vec<Token>,
    clauses: Vec<Clause>,
    statement_end: usize,
}

impl ClauseMap {
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn get(&self, kind: ClauseKind) -> Option<&Clause> {
        self.clauses.iter().find(|c| c.kind == kind)
    }

    pub fn has(&self, kind: ClauseKind) -> bool {
        self.get(kind).is_some()
    }

    /// Tokens of the statement proper (a trailing `;` is excluded).
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Tokens lying entirely inside `range`.
    pub fn tokens_in(&self, range: &Range<usize>) -> &[Token] {
        let lo = self.tokens.partition_point(|t| t.span.start < range.start);
        let hi = self.tokens.partition_point(|t| t.span.end <= range.end);
        if lo >= hi { &[] } else { &self.tokens[lo..hi] }
    }

    /// Byte offset where the statement ends: the position of a trailing `;`, or the input length.
    pub fn statement_end(&self) -> usize {
        self.statement_end
    }
}

/// Words that open another statement. A T-SQL batch needs no `;` between statements.
const STATEMENT_STARTERS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "DROP", "CREATE", "ALTER", "TRUNCATE", "EXEC", "EXECUTE", "GRANT",
    "REVOKE", "DENY", "DECLARE", "SET", "USE", "BACKUP", "RESTORE", "WAITFOR", "SHUTDOWN", "DBCC", "BULK",
];

fn is_word_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'@' || b == b'#' || b >= 0x80
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'@' || b == b'#' || b == b'$' || b >= 0x80
}

/// Scan a quoted run starting at `open` (the opening delimiter). A doubled
/// closing delimiter is an escape. Returns the index just past the closing delimiter.
fn scan_quoted(bytes: &[u8], open: usize, close: u8) -> Option<usize> {
    let mut i = open + 1;
    while i < bytes.len() {
        if bytes[i] == close {
            if bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

/// Split `sql` into tokens. Whitespace and comments are dropped; only an
/// unterminated quote or block comment is an error.
pub fn tokenize(sql: &str) -> Result<Vec<Token>, ScanError> {
    let bytes = sql.as_bytes();
    let mut tokens: Vec<Token> = Vec::new();
    let mut depth: u32 = 0;
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        // -- line comment
        if c == b'-' && bytes.get(i + 1) == Some(&b'-') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        // /* block comment */, nesting allowed
        if c == b'/' && bytes.get(i + 1) == Some(&b'*') {
            let start = i;
            let mut nest = 1;
            i += 2;
            while i < bytes.len() && nest > 0 {
                if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
                    nest += 1;
                    i += 2;
                } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    nest -= 1;
                    i += 2;
                } else {
                    i += 1;
                }
            }
            if nest > 0 {
                return Err(ScanError::Unterminated { what: "block comment", offset: start });
            }
            continue;
        }

        let start = i;
        let kind = match c {
            b'[' => {
                i = scan_quoted(bytes, i, b']')
                    .ok_or(ScanError::Unterminated { what: "bracket identifier", offset: start })?;
                TokenKind::Bracketed
            }
            b'\'' => {
                i = scan_quoted(bytes, i, b'\'')
                    .ok_or(ScanError::Unterminated { what: "string literal", offset: start })?;
                TokenKind::Literal
            }
            b'N' | b'n' if bytes.get(i + 1) == Some(&b'\'') => {
                i = scan_quoted(bytes, i + 1, b'\'')
                    .ok_or(ScanError::Unterminated { what: "string literal", offset: start })?;
                TokenKind::Literal
            }
            b'"' => {
                i = scan_quoted(bytes, i, b'"')
                    .ok_or(ScanError::Unterminated { what: "quoted identifier", offset: start })?;
                TokenKind::DoubleQuoted
            }
            b'(' => {
                tokens.push(Token { kind: TokenKind::LParen, span: start..start + 1, depth });
                depth += 1;
                i += 1;
                continue;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                tokens.push(Token { kind: TokenKind::RParen, span: start..start + 1, depth });
                i += 1;
                continue;
            }
            b',' => { i += 1; TokenKind::Comma }
            b'.' => { i += 1; TokenKind::Dot }
            b';' => { i += 1; TokenKind::Semicolon }
            b'0'..=b'9' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
                    i += 1;
                }
                TokenKind::Number
            }
            b'<' | b'>' | b'=' | b'!' => {
                i += 1;
                while i < bytes.len() && matches!(bytes[i], b'<' | b'>' | b'=' | b'!') {
                    i += 1;
                }
                TokenKind::Operator
            }
            _ if is_word_start(c) => {
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                TokenKind::Word
            }
            _ => {
                i += 1;
                TokenKind::Operator
            }
        };
        tokens.push(Token { kind, span: start..i, depth });
    }
    Ok(tokens)
}

/// Uppercased token texts, the canonical form used for textual-equivalence checks.
pub fn canonical_texts(sql: &str, tokens: &[Token]) -> Vec<String> {
    tokens.iter().map(|t| t.text(sql).to_uppercase()).collect()
}

/// Locate the top-level clauses of a single statement.
pub fn scan(sql: &str) -> Result<ClauseMap, ScanError> {
    let mut tokens = tokenize(sql)?;

    // The statement ends at the first top-level ';'; nothing may follow it.
    let mut statement_end = sql.len();
    if let Some(semi) = tokens.iter().position(|t| t.kind == TokenKind::Semicolon && t.depth == 0) {
        if let Some(extra) = tokens.get(semi + 1) {
            return Err(ScanError::TrailingStatement { offset: extra.span.start });
        }
        statement_end = tokens[semi].span.start;
        tokens.truncate(semi);
    }

    // (kind, keyword span, index of first keyword token, index after keyword)
    let mut markers: Vec<(ClauseKind, Range<usize>, usize, usize)> = Vec::new();
    let mut idx = 0usize;
    while idx < tokens.len() {
        let t = &tokens[idx];
        if t.depth != 0 || t.kind != TokenKind::Word {
            idx += 1;
            continue;
        }
        let word = t.text(sql).to_ascii_uppercase();
        // MERGE is also a join hint: `INNER MERGE JOIN`
        let merge_hint = word == "MERGE" && tokens.get(idx + 1).map(|n| n.is_word(sql, "JOIN")).unwrap_or(false);
        if !markers.is_empty() && !merge_hint && STATEMENT_STARTERS.contains(&word.as_str()) {
            return Err(ScanError::Compound { keyword: word, offset: t.span.start });
        }
        let next_is_by = tokens.get(idx + 1).map(|n| n.is_word(sql, "BY")).unwrap_or(false);
        let found = match word.as_str() {
            "SELECT" => Some((ClauseKind::Select, 1)),
            "FROM" => Some((ClauseKind::From, 1)),
            "WHERE" => Some((ClauseKind::Where, 1)),
            "HAVING" => Some((ClauseKind::Having, 1)),
            "GROUP" if next_is_by => Some((ClauseKind::GroupBy, 2)),
            "ORDER" if next_is_by => Some((ClauseKind::OrderBy, 2)),
            "UNION" | "INTERSECT" | "EXCEPT" => {
                return Err(ScanError::Compound { keyword: word.clone(), offset: t.span.start });
            }
            _ => None,
        };
        let Some((kind, width)) = found else {
            idx += 1;
            continue;
        };
        let offset = t.span.start;
        match markers.last() {
            None if kind != ClauseKind::Select => return Err(ScanError::MissingSelect),
            Some(_) if kind == ClauseKind::Select => {
                return Err(ScanError::Compound { keyword: word.clone(), offset });
            }
            Some((last, ..)) if kind <= *last => return Err(ScanError::OutOfOrder { kind, offset }),
            _ => {}
        }
        let keyword = offset..tokens[idx + width - 1].span.end;
        markers.push((kind, keyword, idx, idx + width));
        idx += width;
    }

    if markers.is_empty() {
        return Err(ScanError::MissingSelect);
    }
    if !markers.iter().any(|(k, ..)| *k == ClauseKind::From) {
        return Err(ScanError::MissingFrom);
    }

    let mut clauses: Vec<Clause> = Vec::with_capacity(markers.len());
    for (n, (kind, keyword, _, body_first)) in markers.iter().enumerate() {
        let body_last = markers.get(n + 1).map(|m| m.2).unwrap_or(tokens.len());
        let body = if *body_first < body_last {
            tokens[*body_first].span.start..tokens[body_last - 1].span.end
        } else {
            keyword.end..keyword.end
        };
        clauses.push(Clause { kind: *kind, keyword: keyword.clone(), body });
    }

    debug!(
        target: "querywarden::scanner",
        "scanned {} tokens; clauses={:?}",
        tokens.len(),
        clauses.iter().map(|c| c.kind.to_string()).collect::<Vec<_>>()
    );
    Ok(ClauseMap { tokens, clauses, statement_end })
}

#[cfg(test)]
#[path = "scanner_tests.rs"]
mod scanner_tests;
