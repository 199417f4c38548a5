//! # Doc Classifier
//!
//! Structured-output recovery for LLM document classification.
//!
//! A generative model is asked to classify an accounting document (is the
//! math consistent, which action should be taken, how do extracted fields
//! map onto an API request body, which entities must be resolved). Its raw
//! completion may carry markdown fences, conversational preamble, truncated
//! or malformed JSON. This crate turns that text into a validated record, or
//! a typed error, without ever fabricating values.
//!
//! ## Core Concepts
//!
//! - **[`Classifier`]**: runs a request through envelope, generation,
//!   recovery and validation, escalating once to a stricter attempt when the
//!   first output cannot be recovered.
//! - **[`Generator`]**: the invoker seam. [`OllamaGenerator`] talks to a
//!   local Ollama server, [`MockGenerator`] replays canned completions.
//! - **[`output_parser`]**: normalize, repair and parse a completion.
//! - **[`validate`]**: one [`Validator`] per [`Stage`], filling structural
//!   defaults and enforcing the stage invariants.
//! - **[`ValidatedResult`]**: the record, every correction made to it, and
//!   [`RecoveryDiagnostics`] describing how it was obtained.
//!
//! ## Quick Start
//!
//! ```no_run
//! use doc_classifier::{Classifier, GenerationOverrides, OllamaGenerator, RequestContext};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let generator = OllamaGenerator::new("http://localhost:11434", "mistral:7b-instruct");
//!     let classifier = Classifier::builder(Arc::new(generator)).build();
//!
//!     let context = RequestContext::new().insert("software", "zohobooks");
//!     let result = classifier
//!         .classify_action(
//!             "Decide which accounting action this invoice needs: ...",
//!             &context,
//!             &GenerationOverrides::default(),
//!         )
//!         .await?;
//!
//!     println!("{:?} ({})", result.record.selected_action, result.record.confidence);
//!     for fix in &result.corrections {
//!         println!("corrected {}: {}", fix.field, fix.detail);
//!     }
//!     Ok(())
//! }
//! ```

pub mod classifier;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod generator;
pub mod output_parser;
pub mod prompt;
pub mod retry;
pub mod schema;
pub mod stage;
pub mod types;
pub mod validate;

pub use classifier::{Classifier, ClassifierBuilder, StageResult};
pub use config::{ClassifierConfig, GenerationConfig, GenerationOverrides};
pub use diagnostics::RecoveryDiagnostics;
pub use error::{PipelineError, Result};
pub use events::{Event, EventHandler, FnEventHandler};
pub use generator::{ExclusiveGenerator, Generator, MockGenerator, OllamaGenerator, RawModelOutput};
pub use output_parser::ParseError;
pub use schema::{InMemorySchemaCache, SchemaCache};
pub use stage::Stage;
pub use types::{ClassificationRequest, Correction, RequestContext, ValidatedResult};
pub use validate::Validator;
