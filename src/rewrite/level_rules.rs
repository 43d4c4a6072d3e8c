//! Level-phrase registry.
//!
//! Business users talk about "store level data" or "company level data"; the
//! table encodes that granularity in a categorical `[Level]` code. Each rule
//! maps one phrase to its code predicate plus an optional nullability
//! constraint on a companion column. The table is built once and only read.

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::ident::ensure_bracketed;

pub const DEFAULT_LEVEL_COLUMN: &str = "[Level]";

/// `ISNULL(LTRIM(RTRIM(<col>)), '') NOT IN ('', 'N/A')`
pub fn not_blank_predicate(column: &str) -> String {
    format!("ISNULL(LTRIM(RTRIM({})), '') NOT IN ('', 'N/A')", ensure_bracketed(column))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Nullability {
    IsNull,
    NotBlank,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Companion {
    pub column: String,
    pub nullability: Nullability,
}

impl Companion {
    pub fn new(column: &str, nullability: Nullability) -> Self {
        Self { column: ensure_bracketed(column), nullability }
    }

    pub fn predicate(&self) -> String {
        match self.nullability {
            Nullability::IsNull => format!("{} IS NULL", ensure_bracketed(&self.column)),
            Nullability::NotBlank => not_blank_predicate(&self.column),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelRule {
    /// Lowercased trigger phrase.
    pub phrase: String,
    pub code: String,
    /// e.g. `[Level] = '1'`
    pub predicate: String,
    pub companion: Option<Companion>,
}

impl LevelRule {
    pub fn new(level_column: &str, phrase: &str, code: &str, companion: Option<Companion>) -> Self {
        let predicate = format!("{} = '{}'", ensure_bracketed(level_column), code.replace('\'', "''"));
        Self { phrase: phrase.trim().to_lowercase(), code: code.to_string(), predicate, companion }
    }

    /// Column the companion constraint forces to NULL, if any.
    pub fn nulled_column(&self) -> Option<&str> {
        match &self.companion {
            Some(c) if c.nullability == Nullability::IsNull => Some(c.column.as_str()),
            _ => None,
        }
    }
}

/// On-disk shape of a level table (see `LevelRules::from_json`).
#[derive(Debug, Deserialize)]
struct LevelTableDef {
    #[serde(default = "default_level_column")]
    level_column: String,
    rules: Vec<LevelRuleDef>,
}

#[derive(Debug, Deserialize)]
struct LevelRuleDef {
    phrase: String,
    code: String,
    #[serde(default)]
    companion: Option<Companion>,
}

fn default_level_column() -> String {
    DEFAULT_LEVEL_COLUMN.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelRules {
    level_column: String,
    rules: Vec<LevelRule>,
}

pub static STANDARD_LEVEL_RULES: Lazy<LevelRules> = Lazy::new(LevelRules::standard);

impl LevelRules {
    /// The eight level codes of the consolidated sales table.
    pub fn standard() -> Self {
        let col = DEFAULT_LEVEL_COLUMN;
        let rules = vec![
            LevelRule::new(col, "company level data", "0", Some(Companion::new("Profitcenter_Name", Nullability::IsNull))),
            LevelRule::new(col, "store level data", "1", Some(Companion::new("Profitcenter_Name", Nullability::NotBlank))),
            LevelRule::new(col, "region level data", "2", Some(Companion::new("Company_Name", Nullability::IsNull))),
            LevelRule::new(col, "region without outlet level data", "3", None),
            LevelRule::new(col, "company with outlet level data", "4", None),
            LevelRule::new(col, "salesperson level data", "5", None),
            LevelRule::new(col, "company without outlet level data", "6", None),
            LevelRule::new(col, "all total level data", "7", None),
        ];
        Self { level_column: col.to_string(), rules }
    }

    /// Parse a level table:
    /// `{"level_column": "[Level]", "rules": [{"phrase": "...", "code": "1", "companion": {"column": "X", "nullability": "not_blank"}}]}`
    pub fn from_json(text: &str) -> Result<Self> {
        let def: LevelTableDef = serde_json::from_str(text).context("level rules must be a JSON object with a `rules` array")?;
        let level_column = ensure_bracketed(&def.level_column);
        let mut seen: HashSet<String> = HashSet::new();
        let mut rules = Vec::with_capacity(def.rules.len());
        for r in def.rules {
            if r.phrase.trim().is_empty() || r.code.trim().is_empty() {
                bail!("level rule needs a non-empty phrase and code");
            }
            let rule = LevelRule::new(&level_column, &r.phrase, r.code.trim(), r.companion.map(|c| Companion::new(&c.column, c.nullability)));
            if !seen.insert(rule.phrase.clone()) {
                bail!("duplicate level phrase '{}'", rule.phrase);
            }
            rules.push(rule);
        }
        Ok(Self { level_column, rules })
    }

    pub fn level_column(&self) -> &str {
        &self.level_column
    }

    pub fn rules(&self) -> &[LevelRule] {
        &self.rules
    }

    /// Rules whose phrase occurs in the question (case-insensitive substring), in table order.
    pub fn matching(&self, question: &str) -> Vec<&LevelRule> {
        let q = question.to_lowercase();
        self.rules.iter().filter(|r| q.contains(&r.phrase)).collect()
    }
}
