//! Everything that talks to, or interprets, the external text-generation service.

pub mod client;
pub mod envelope;
pub mod prompt;

pub use client::{CompletionService, OpenAiCompletion};
pub use envelope::{parse_envelope, CandidateStatement, GenerationParseError};
pub use prompt::build_prompt;
