//!
//! querywarden request pipeline
//! ----------------------------
//! Threads one question through screening, generation, validation and the
//! rewrite passes. All state is per request; a `Pipeline` only holds the
//! immutable business rules and can be shared across tasks.

use std::collections::BTreeSet;

use serde::{Serialize, Serializer};
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::generation::{build_prompt, parse_envelope, CompletionService};
use crate::rewrite::{apply_rules, extract_columns, validate, validate_sql, BusinessRules, ValidSql};
use crate::sensitivity::{classify, Sensitivity};

/// Rewritten statement ready for execution, plus what the caller tags it with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalQuery {
    pub sql: String,
    #[serde(rename = "text")]
    pub explanation: String,
    pub chart_title: String,
    #[serde(rename = "sql_query_columns", serialize_with = "serialize_columns_tag")]
    pub columns: BTreeSet<String>,
}

impl FinalQuery {
    /// Referenced columns joined with ", ".
    pub fn columns_tag(&self) -> String {
        self.columns.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
    }
}

fn serialize_columns_tag<S: Serializer>(columns: &BTreeSet<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&columns.iter().map(String::as_str).collect::<Vec<_>>().join(", "))
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    rules: BusinessRules,
}

impl Pipeline {
    pub fn new(rules: BusinessRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &BusinessRules {
        &self.rules
    }

    pub fn screen(&self, question: &str) -> PipelineResult<()> {
        match classify(question) {
            Sensitivity::Sensitive { trigger } => Err(declined(PipelineError::SensitiveQuestion { trigger })),
            Sensitivity::Benign => Ok(()),
        }
    }

    /// Validate raw SQL and apply every business rule to it.
    pub fn rewrite(&self, question: &str, sql: &str) -> PipelineResult<ValidSql> {
        let valid = validate_sql(sql).map_err(|e| declined(e.into()))?;
        Ok(apply_rules(valid, question, &self.rules))
    }

    /// Turn a raw service reply into the final query.
    pub fn finish(&self, question: &str, reply: &str) -> PipelineResult<FinalQuery> {
        let candidate = parse_envelope(reply).map_err(|e| declined(e.into()))?;
        let valid = validate(&candidate).map_err(|e| declined(e.into()))?;
        let sql = apply_rules(valid, question, &self.rules).into_string();
        let columns = extract_columns(&sql);
        debug!(target: "querywarden::pipeline", "final sql: {}", sql);
        Ok(FinalQuery { sql, explanation: candidate.explanation, chart_title: candidate.chart_title, columns })
    }

    pub async fn answer<S: CompletionService>(&self, question: &str, service: &S) -> PipelineResult<FinalQuery> {
        self.screen(question)?;
        let prompt = build_prompt(question, &self.rules);
        let reply = service
            .complete(&prompt)
            .await
            .map_err(|e| declined(PipelineError::Service(e)))?;
        self.finish(question, &reply)
    }
}

fn declined(err: PipelineError) -> PipelineError {
    info!(target: "querywarden::pipeline", "declined with {}: {}", err.code(), err);
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_query_serializes_with_column_tag() {
        let q = FinalQuery {
            sql: "SELECT [a] FROM [T]".into(),
            explanation: "x".into(),
            chart_title: "y".into(),
            columns: ["b".to_string(), "a".to_string()].into_iter().collect(),
        };
        assert_eq!(q.columns_tag(), "a, b");
        let v = serde_json::to_value(&q).unwrap();
        assert_eq!(v["sql_query_columns"], "a, b");
        assert_eq!(v["text"], "x");
        assert_eq!(v["chart_title"], "y");
    }

    #[test]
    fn pipeline_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Pipeline>();
    }

    #[test]
    fn sensitive_questions_are_screened() {
        let p = Pipeline::default();
        let err = p.screen("which tables exist in the database?").unwrap_err();
        assert_eq!(err.code(), crate::error::SENSITIVE_QUERY_ERROR);
        assert!(p.screen("sales by region").is_ok());
    }
}
