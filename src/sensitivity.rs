//! Question screening. Questions probing schema, metadata or administration
//! are refused before any SQL is generated.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "schema", "table", "column", "database", "structure", "ddl", "create", "alter", "drop", "insert", "update",
    "delete", "truncate", "grant", "revoke", "sqlite_master", "pragma", "table_info", "describe", "show tables",
    "show columns", "information_schema", "sys.", "metadata", "system", "admin", "configuration", "settings",
    "password", "user", "backup", "restore",
];

const FORBIDDEN_PATTERNS: &[&str] = &[
    r"what.*table.*have",
    r"show.*table",
    r"list.*table",
    r"describe.*table",
    r"what.*column",
    r"show.*column",
    r"list.*column",
    r"database.*structure",
    r"table.*structure",
    r"what.*field",
    r"show.*field",
    r"list.*field",
];

/// (trigger, compiled matcher) for every keyword and pattern.
static MATCHERS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    let keywords = FORBIDDEN_KEYWORDS.iter().filter_map(|k| {
        // `sys.` ends in a non-word char, so only the leading boundary applies.
        let escaped = regex::escape(k);
        let trailing = if k.ends_with(|c: char| c.is_alphanumeric() || c == '_') { r"\b" } else { "" };
        Regex::new(&format!(r"(?i)\b{}{}", escaped, trailing)).ok().map(|re| (*k, re))
    });
    let patterns = FORBIDDEN_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(&format!("(?is){}", p)).ok().map(|re| (*p, re)));
    keywords.chain(patterns).collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sensitivity {
    Sensitive { trigger: String },
    Benign,
}

impl Sensitivity {
    pub fn is_sensitive(&self) -> bool {
        matches!(self, Sensitivity::Sensitive { .. })
    }
}

pub fn classify(question: &str) -> Sensitivity {
    match MATCHERS.iter().find(|(_, re)| re.is_match(question)) {
        Some((trigger, _)) => {
            debug!(target: "querywarden::sensitivity", "sensitive question, trigger '{}'", trigger);
            Sensitivity::Sensitive { trigger: trigger.to_string() }
        }
        None => Sensitivity::Benign,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_matchers_compile() {
        assert_eq!(MATCHERS.len(), FORBIDDEN_KEYWORDS.len() + FORBIDDEN_PATTERNS.len());
    }

    #[test]
    fn keywords_match_whole_words_in_any_case() {
        for q in ["What TABLES do you have?", "DROP everything", "show me the Schema", "who is the admin", "reset my Password"] {
            assert!(classify(q).is_sensitive(), "{}", q);
        }
        assert_eq!(classify("drop the sales report"), Sensitivity::Sensitive { trigger: "drop".into() });
    }

    #[test]
    fn keyword_inside_a_longer_word_is_benign() {
        // "users" and "dropped" are not the forbidden words themselves
        assert_eq!(classify("How many users bought shoes"), Sensitivity::Benign);
        assert_eq!(classify("Why sales dropped in March"), Sensitivity::Benign);
        assert_eq!(classify("Top 10 stores by sales, store level data"), Sensitivity::Benign);
    }

    #[test]
    fn patterns_match_across_words() {
        assert!(classify("what fields are in there").is_sensitive());
        assert!(classify("list every column").is_sensitive());
        assert!(classify("query sys.objects").is_sensitive());
    }
}
