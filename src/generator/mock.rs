//! Mock generator for testing without a live model.
//!
//! [`MockGenerator`] returns pre-configured replies in order and records every
//! prompt and config it was called with, so tests can assert on what the
//! escalated attempt looked like.
//!
//! # Example
//!
//! ```
//! use doc_classifier::generator::{MockGenerator, MockReply};
//!
//! let mock = MockGenerator::new(vec![
//!     MockReply::text("\"passed\": true"),
//!     MockReply::fail("CUDA out of memory"),
//! ]);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{estimate_tokens, Generator, RawModelOutput};
use crate::config::GenerationConfig;
use crate::error::Result;
use crate::PipelineError;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Output(RawModelOutput),
    /// Fail the call as a resource-exhausted invoker would.
    Fail(String),
}

impl MockReply {
    /// A reply whose token counts are estimated at four characters per token.
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        let output_tokens = estimate_tokens(&text);
        MockReply::Output(RawModelOutput::new(text, 0, output_tokens))
    }

    /// A reply with an explicit output token count.
    pub fn with_tokens(text: impl Into<String>, output_token_count: u32) -> Self {
        MockReply::Output(RawModelOutput::new(text, 0, output_token_count))
    }

    pub fn fail(message: impl Into<String>) -> Self {
        MockReply::Fail(message.into())
    }
}

/// A prompt/config pair the mock received.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub prompt: String,
    pub config: GenerationConfig,
}

/// A test generator that returns canned replies in order.
///
/// Cycles back to the beginning when all replies have been consumed.
#[derive(Debug)]
pub struct MockGenerator {
    replies: Vec<MockReply>,
    index: AtomicUsize,
    calls: Mutex<Vec<MockCall>>,
}

impl MockGenerator {
    /// Create a mock with the given replies.
    ///
    /// Replies are returned in order. When exhausted, cycles from the beginning.
    pub fn new(replies: Vec<MockReply>) -> Self {
        assert!(!replies.is_empty(), "MockGenerator requires at least one reply");
        Self {
            replies,
            index: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that always returns the same text.
    pub fn fixed(text: impl Into<String>) -> Self {
        Self::new(vec![MockReply::text(text)])
    }

    /// Every call made so far, oldest first.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    fn next_reply(&self) -> MockReply {
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.replies.len();
        self.replies[idx].clone()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<RawModelOutput> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(MockCall {
                prompt: prompt.to_string(),
                config: config.clone(),
            });

        match self.next_reply() {
            MockReply::Output(mut output) => {
                output.input_token_count = estimate_tokens(prompt);
                Ok(output)
            }
            MockReply::Fail(message) => Err(PipelineError::generation(message)),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
