//! Runtime settings, read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::rewrite::business::{BusinessRules, DEFAULT_TABLE};
use crate::rewrite::level_rules::LevelRules;

pub const DEFAULT_COMPLETION_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_key: Option<String>,
    pub completion_url: String,
    pub model: String,
    pub timeout: Duration,
    pub table: String,
    /// JSON file replacing the built-in level table.
    pub level_rules_path: Option<PathBuf>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let timeout_secs = match get("QUERYWARDEN_TIMEOUT_SECS") {
            Some(v) => v.parse::<u64>().with_context(|| format!("QUERYWARDEN_TIMEOUT_SECS must be whole seconds, got '{}'", v))?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        Ok(Self {
            api_key: get("OPENAI_API_KEY"),
            completion_url: get("QUERYWARDEN_COMPLETION_URL").unwrap_or_else(|| DEFAULT_COMPLETION_URL.to_string()),
            model: get("QUERYWARDEN_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout: Duration::from_secs(timeout_secs),
            table: get("QUERYWARDEN_TABLE").unwrap_or_else(|| DEFAULT_TABLE.to_string()),
            level_rules_path: get("QUERYWARDEN_LEVEL_RULES").map(PathBuf::from),
        })
    }

    pub fn business_rules(&self) -> Result<BusinessRules> {
        let rules = BusinessRules::default().with_table(&self.table);
        let Some(path) = &self.level_rules_path else {
            return Ok(rules);
        };
        let text = std::fs::read_to_string(path).with_context(|| format!("reading level rules {}", path.display()))?;
        let levels = LevelRules::from_json(&text).with_context(|| format!("parsing level rules {}", path.display()))?;
        info!(target: "querywarden::config", "loaded {} level rules from {}", levels.rules().len(), path.display());
        Ok(rules.with_levels(levels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_unset_or_blank() {
        let s = Settings::from_lookup(lookup(&[("QUERYWARDEN_MODEL", "  ")])).unwrap();
        assert_eq!(s.api_key, None);
        assert_eq!(s.completion_url, DEFAULT_COMPLETION_URL);
        assert_eq!(s.model, DEFAULT_MODEL);
        assert_eq!(s.timeout, Duration::from_secs(60));
        assert_eq!(s.table, DEFAULT_TABLE);
        assert!(s.level_rules_path.is_none());
    }

    #[test]
    fn overrides_are_read() {
        let s = Settings::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("QUERYWARDEN_TIMEOUT_SECS", "5"),
            ("QUERYWARDEN_TABLE", "[sales].[Daily]"),
        ]))
        .unwrap();
        assert_eq!(s.api_key.as_deref(), Some("sk-test"));
        assert_eq!(s.timeout, Duration::from_secs(5));
        assert_eq!(s.business_rules().unwrap().table, "[sales].[Daily]");
    }

    #[test]
    fn bad_timeout_is_an_error() {
        assert!(Settings::from_lookup(lookup(&[("QUERYWARDEN_TIMEOUT_SECS", "soon")])).is_err());
    }

    #[test]
    fn level_rules_file_replaces_builtin_table() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"rules": [{{"phrase": "outlet level data", "code": "9"}}]}}"#).unwrap();
        let path = f.path().to_string_lossy().to_string();
        let s = Settings::from_lookup(lookup(&[("QUERYWARDEN_LEVEL_RULES", path.as_str())])).unwrap();
        let rules = s.business_rules().unwrap();
        assert_eq!(rules.levels.rules().len(), 1);
        assert_eq!(rules.levels.rules()[0].predicate, "[Level] = '9'");
    }

    #[test]
    fn unreadable_level_rules_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("levels.json");
        let s = Settings::from_lookup(lookup(&[("QUERYWARDEN_LEVEL_RULES", missing.to_str().unwrap())])).unwrap();
        let err = s.business_rules().unwrap_err();
        assert!(format!("{:#}", err).contains("reading level rules"));
    }
}
