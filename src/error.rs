//! Pipeline error model and its mapping to the fixed decline sentinels.
//! Every way a request can be refused ends up as one `PipelineError`, which
//! knows its sentinel code, user-facing explanation, title and HTTP status.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::generation::GenerationParseError;
use crate::rewrite::validate::Rejection;

pub const SENSITIVE_QUERY_ERROR: &str = "SENSITIVE_QUERY_ERROR";
pub const SQL_PARSE_ERROR: &str = "SQL_PARSE_ERROR";
pub const NON_SELECT_QUERY_ERROR: &str = "NON_SELECT_QUERY_ERROR";
pub const GENERATION_SERVICE_ERROR: &str = "GENERATION_SERVICE_ERROR";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("question touches restricted metadata (trigger '{trigger}')")]
    SensitiveQuestion { trigger: String },
    #[error("generation reply could not be parsed: {0}")]
    GenerationParse(#[from] GenerationParseError),
    #[error("candidate rejected: {0}")]
    Rejected(#[from] Rejection),
    #[error("generation service failed: {0:#}")]
    Service(anyhow::Error),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::SensitiveQuestion { .. } => SENSITIVE_QUERY_ERROR,
            PipelineError::GenerationParse(_) => SQL_PARSE_ERROR,
            PipelineError::Rejected(_) => NON_SELECT_QUERY_ERROR,
            PipelineError::Service(_) => GENERATION_SERVICE_ERROR,
        }
    }

    pub fn explanation(&self) -> &'static str {
        match self {
            PipelineError::SensitiveQuestion { .. } => "User is not allowed this.",
            PipelineError::GenerationParse(GenerationParseError::NoJsonObject) => "Could not find JSON object in response.",
            PipelineError::GenerationParse(_) => "Could not parse LLM response as JSON.",
            PipelineError::Rejected(Rejection::NotReadOnly) => "Only read operations are allowed.",
            PipelineError::Rejected(Rejection::Malformed(_)) => "The generated query could not be processed safely.",
            PipelineError::Service(_) => "The AI service is unavailable.",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            PipelineError::SensitiveQuestion { .. } => "Access Denied",
            PipelineError::Rejected(_) => "Invalid Operation",
            PipelineError::GenerationParse(_) | PipelineError::Service(_) => "Error",
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            PipelineError::SensitiveQuestion { .. } => 403,
            PipelineError::GenerationParse(_) => 500,
            PipelineError::Rejected(_) => 400,
            PipelineError::Service(_) => 502,
        }
    }

    pub fn decline(&self) -> Decline {
        Decline {
            code: self.code().to_string(),
            explanation: self.explanation().to_string(),
            title: self.title().to_string(),
            status: self.http_status(),
        }
    }
}

/// Wire body of a refused request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decline {
    pub code: String,
    pub explanation: String,
    pub title: String,
    pub status: u16,
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
