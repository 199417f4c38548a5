//! Generation invoker trait and built-in implementations.
//!
//! The classifier never talks to a model directly. It hands a fully built
//! prompt and a [`GenerationConfig`] to a [`Generator`] and gets back the
//! newly generated text with token counts.
//!
//! ## Architecture
//!
//! ```text
//! Classifier ──► PromptEnvelope + GenerationConfig ──► Generator::generate() ──► RawModelOutput
//!                                                            │
//!                                         ┌──────────────────┼──────────────────┐
//!                                  OllamaGenerator     MockGenerator    ExclusiveGenerator<G>
//!                                  /api/generate       canned outputs   one-at-a-time gate
//! ```
//!
//! Errors from a generator (out of memory, connection refused, HTTP 5xx) are
//! surfaced to the caller unchanged; they are never retried here.

pub mod exclusive;
pub mod mock;
pub mod ollama;

pub use exclusive::ExclusiveGenerator;
pub use mock::{MockGenerator, MockReply};
pub use ollama::OllamaGenerator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::error::Result;

/// Decoded completion plus token accounting.
///
/// `text` holds only newly generated tokens: a `{` seeded at the end of the
/// prompt is not repeated here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawModelOutput {
    pub text: String,
    pub input_token_count: u32,
    pub output_token_count: u32,
}

impl RawModelOutput {
    pub fn new(text: impl Into<String>, input_token_count: u32, output_token_count: u32) -> Self {
        Self {
            text: text.into(),
            input_token_count,
            output_token_count,
        }
    }
}

/// Rough token count for text whose tokenization is unknown (four characters per token).
pub(crate) fn estimate_tokens(text: &str) -> u32 {
    u32::try_from(text.chars().count().div_ceil(4)).unwrap_or(u32::MAX)
}

/// Abstraction over whatever runs the model.
///
/// # Object Safety
///
/// This trait is object-safe and designed to be used as `Arc<dyn Generator>`.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Run one generation.
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<RawModelOutput>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}
