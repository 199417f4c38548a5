use thiserror::Error;

use crate::output_parser::ParseError;
use crate::stage::Stage;

/// Errors produced by the classifier and its components.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The model output could not be turned into a JSON object.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A field the stage requires was absent from the parsed record.
    #[error("{stage}: missing required field '{field}'")]
    MissingField { stage: Stage, field: String },

    /// A required field was present but had the wrong JSON type.
    #[error("{stage}: field '{field}' must be {expected}")]
    InvalidField {
        stage: Stage,
        field: String,
        expected: &'static str,
    },

    /// The generation invoker failed, or the escalated attempt failed too.
    ///
    /// When escalation was exhausted, `source` holds the typed error of the
    /// final attempt.
    #[error("generation failed{}: {message}", stage_suffix(.stage))]
    GenerationFailed {
        stage: Option<Stage>,
        message: String,
        #[source]
        source: Option<Box<PipelineError>>,
    },

    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON (de)serialization failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The inference server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// Invalid configuration detected while loading or building.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn stage_suffix(stage: &Option<Stage>) -> String {
    match stage {
        Some(stage) => format!(" in {stage}"),
        None => String::new(),
    }
}

impl PipelineError {
    /// Shorthand for a generation failure with no underlying typed cause.
    pub fn generation(message: impl Into<String>) -> Self {
        PipelineError::GenerationFailed {
            stage: None,
            message: message.into(),
            source: None,
        }
    }

    /// The parse failure behind this error, looking through an exhausted escalation.
    pub fn parse_error(&self) -> Option<&ParseError> {
        match self {
            PipelineError::Parse(err) => Some(err),
            PipelineError::GenerationFailed {
                source: Some(inner),
                ..
            } => inner.parse_error(),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::generation(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
