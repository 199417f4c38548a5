//! Generation parameters and classifier tunables.
//!
//! [`GenerationConfig`] is what the [`Generator`](crate::generator::Generator)
//! receives. Callers usually send a partial [`GenerationOverrides`] which is
//! merged over the stage defaults and clamped to [`TOKEN_CEILING`].
//!
//! [`ClassifierConfig`] holds the knobs of the recovery pipeline itself and
//! can be loaded from JSON, or from YAML with the `yaml` feature.
//!
//! ```
//! use doc_classifier::config::{GenerationConfig, GenerationOverrides};
//! use doc_classifier::Stage;
//!
//! let overrides = GenerationOverrides {
//!     max_new_tokens: Some(100_000),
//!     ..Default::default()
//! };
//! let config = GenerationConfig::resolve(Stage::FieldMapping, &overrides);
//! assert_eq!(config.max_new_tokens, 32_768);
//! assert_eq!(config.temperature, 0.1);
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::prompt::PromptTemplate;
use crate::stage::Stage;
use crate::PipelineError;

/// Hard ceiling for token-count parameters. Larger values are clamped.
pub const TOKEN_CEILING: u32 = 32_768;

/// Decoding parameters for one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Maximum tokens to generate.
    pub max_new_tokens: u32,

    /// Sampling temperature (0.0 = greedy).
    pub temperature: f64,

    pub top_p: f64,

    pub top_k: u32,

    pub repetition_penalty: f64,

    /// Longest prompt, in tokens, the invoker should accept.
    pub max_input_length: u32,

    /// Whether to sample at all. `false` means pure greedy decoding.
    pub do_sample: bool,
}

impl GenerationConfig {
    /// Defaults tuned per stage on the deployed service.
    pub fn for_stage(stage: Stage) -> Self {
        let (max_new_tokens, temperature, top_p, top_k, repetition_penalty) = match stage {
            Stage::MathValidation => (1500, 0.05, 0.9, 40, 1.1),
            Stage::ActionSelection => (2500, 0.1, 0.95, 50, 1.1),
            Stage::FieldMapping => (3000, 0.1, 0.95, 50, 1.15),
            Stage::EntityExtraction => (2000, 0.1, 0.95, 50, 1.1),
        };
        Self {
            max_new_tokens,
            temperature,
            top_p,
            top_k,
            repetition_penalty,
            // 90% of a 32k context window, leaving room for the completion
            max_input_length: 29_491,
            do_sample: temperature > 0.0,
        }
    }

    /// Merge caller overrides over the stage defaults, then clamp.
    pub fn resolve(stage: Stage, overrides: &GenerationOverrides) -> Self {
        let base = Self::for_stage(stage);
        let temperature = overrides.temperature.unwrap_or(base.temperature);
        let config = Self {
            max_new_tokens: overrides.max_new_tokens.unwrap_or(base.max_new_tokens),
            temperature,
            top_p: overrides.top_p.unwrap_or(base.top_p),
            top_k: overrides.top_k.unwrap_or(base.top_k),
            repetition_penalty: overrides
                .repetition_penalty
                .unwrap_or(base.repetition_penalty),
            max_input_length: overrides.max_input_length.unwrap_or(base.max_input_length),
            do_sample: overrides.do_sample.unwrap_or(temperature > 0.0),
        };
        config.clamped()
    }

    /// Clamp token-count parameters to [`TOKEN_CEILING`], logging each clamp.
    pub fn clamped(mut self) -> Self {
        if self.max_new_tokens > TOKEN_CEILING {
            warn!(
                requested = self.max_new_tokens,
                ceiling = TOKEN_CEILING,
                "max_new_tokens above ceiling, clamping"
            );
            self.max_new_tokens = TOKEN_CEILING;
        }
        if self.max_input_length > TOKEN_CEILING {
            warn!(
                requested = self.max_input_length,
                ceiling = TOKEN_CEILING,
                "max_input_length above ceiling, clamping"
            );
            self.max_input_length = TOKEN_CEILING;
        }
        self
    }

    pub fn with_max_new_tokens(mut self, tokens: u32) -> Self {
        self.max_new_tokens = tokens;
        self
    }

    /// Set temperature. Also switches `do_sample` to match.
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self.do_sample = temp > 0.0;
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = top_p;
        self
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_repetition_penalty(mut self, penalty: f64) -> Self {
        self.repetition_penalty = penalty;
        self
    }

    pub fn with_max_input_length(mut self, tokens: u32) -> Self {
        self.max_input_length = tokens;
        self
    }
}

/// Partial generation settings supplied with a request.
///
/// Every field is optional; unset fields fall back to the stage defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOverrides {
    pub max_new_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub repetition_penalty: Option<f64>,
    pub max_input_length: Option<u32>,
    pub do_sample: Option<bool>,
}

/// Tunables for the recovery pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Outputs shorter than this many tokens are treated as an early stop.
    pub low_token_threshold: u32,

    /// How many leading characters are scanned for conversational preamble.
    pub preamble_window: usize,

    /// Append `{` to the prompt so the model continues inside an object.
    pub seed_brace: bool,

    /// How the envelope is wrapped before it reaches the invoker.
    pub template: PromptTemplate,

    /// Per-stage overrides of [`Stage::min_span_len`].
    pub min_span_len: HashMap<Stage, usize>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            low_token_threshold: 100,
            preamble_window: 200,
            seed_brace: true,
            template: PromptTemplate::default(),
            min_span_len: HashMap::new(),
        }
    }
}

impl ClassifierConfig {
    /// Load from a JSON document. Missing keys keep their defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validated()
    }

    /// Load from a YAML document. Missing keys keep their defaults.
    #[cfg(feature = "yaml")]
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(s)
            .map_err(|e| PipelineError::InvalidConfig(format!("YAML: {e}")))?;
        config.validated()
    }

    fn validated(self) -> Result<Self> {
        if self.preamble_window == 0 {
            return Err(PipelineError::InvalidConfig(
                "preamble_window must be greater than zero".into(),
            ));
        }
        Ok(self)
    }

    /// Minimum span length for `stage`, honoring overrides.
    pub fn min_span_len(&self, stage: Stage) -> usize {
        self.min_span_len
            .get(&stage)
            .copied()
            .unwrap_or_else(|| stage.min_span_len())
    }

    pub fn with_low_token_threshold(mut self, tokens: u32) -> Self {
        self.low_token_threshold = tokens;
        self
    }

    pub fn with_seed_brace(mut self, enabled: bool) -> Self {
        self.seed_brace = enabled;
        self
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_min_span_len(mut self, stage: Stage, len: usize) -> Self {
        self.min_span_len.insert(stage, len);
        self
    }
}
