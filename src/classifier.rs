//! The classification pipeline.
//!
//! [`Classifier`] runs one request through envelope, generation, recovery and
//! validation, with at most one escalated regeneration in between. It holds
//! no per-request state: the invoker, the schema cache and the event handler
//! are shared, everything else lives on the stack of a single call.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{ClassifierConfig, GenerationConfig, GenerationOverrides};
use crate::diagnostics::RecoveryDiagnostics;
use crate::error::{PipelineError, Result};
use crate::events::{emit, Event, EventHandler};
use crate::generator::{Generator, RawModelOutput};
use crate::output_parser::{recover_json, NormalizeOptions, ParseError, Recovered};
use crate::prompt::{build_envelope, Strictness};
use crate::retry::{AttemptState, EscalationPolicy};
use crate::schema::{InMemorySchemaCache, SchemaCache};
use crate::stage::Stage;
use crate::types::{ClassificationRequest, RequestContext, ValidatedResult};
use crate::validate::{
    ActionSelection, ActionSelectionValidator, Corrections, EntityExtraction,
    EntityExtractionValidator, FieldMapping, FieldMappingValidator, MathValidation, MathValidator,
    Validator,
};

/// Output of [`Classifier::classify`], one variant per stage.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StageResult {
    MathValidation(ValidatedResult<MathValidation>),
    ActionSelection(ValidatedResult<ActionSelection>),
    FieldMapping(ValidatedResult<FieldMapping>),
    EntityExtraction(ValidatedResult<EntityExtraction>),
}

impl StageResult {
    pub fn stage(&self) -> Stage {
        match self {
            StageResult::MathValidation(r) => r.stage,
            StageResult::ActionSelection(r) => r.stage,
            StageResult::FieldMapping(r) => r.stage,
            StageResult::EntityExtraction(r) => r.stage,
        }
    }

    pub fn diagnostics(&self) -> &RecoveryDiagnostics {
        match self {
            StageResult::MathValidation(r) => &r.diagnostics,
            StageResult::ActionSelection(r) => &r.diagnostics,
            StageResult::FieldMapping(r) => &r.diagnostics,
            StageResult::EntityExtraction(r) => &r.diagnostics,
        }
    }
}

/// Turns prompts into validated stage records.
///
/// # Example
///
/// ```
/// use doc_classifier::generator::MockGenerator;
/// use doc_classifier::{Classifier, GenerationOverrides, RequestContext};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let classifier = Classifier::builder(Arc::new(MockGenerator::fixed("\"passed\": true}"))).build();
/// let result = classifier
///     .classify_math("Check the totals.", &RequestContext::new(), &GenerationOverrides::default())
///     .await
///     .unwrap();
/// assert!(result.record.passed);
/// assert_eq!(result.record.complexity, "moderate");
/// # });
/// ```
pub struct Classifier {
    generator: Arc<dyn Generator>,
    schemas: Arc<dyn SchemaCache>,
    config: ClassifierConfig,
    policy: EscalationPolicy,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl Classifier {
    pub fn builder(generator: Arc<dyn Generator>) -> ClassifierBuilder {
        ClassifierBuilder {
            generator,
            schemas: None,
            config: None,
            event_handler: None,
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Dispatch a request to its stage.
    pub async fn classify(&self, request: &ClassificationRequest) -> Result<StageResult> {
        let prompt = request.prompt.as_str();
        let context = &request.context;
        let overrides = &request.generation_config;
        Ok(match request.stage {
            Stage::MathValidation => {
                StageResult::MathValidation(self.classify_math(prompt, context, overrides).await?)
            }
            Stage::ActionSelection => StageResult::ActionSelection(
                self.classify_action(prompt, context, overrides).await?,
            ),
            Stage::FieldMapping => StageResult::FieldMapping(
                self.classify_field_mapping(prompt, context, overrides).await?,
            ),
            Stage::EntityExtraction => StageResult::EntityExtraction(
                self.classify_entities(prompt, context, overrides).await?,
            ),
        })
    }

    pub async fn classify_math(
        &self,
        prompt: &str,
        context: &RequestContext,
        overrides: &GenerationOverrides,
    ) -> Result<ValidatedResult<MathValidation>> {
        self.run(&MathValidator, prompt, context, overrides).await
    }

    pub async fn classify_action(
        &self,
        prompt: &str,
        context: &RequestContext,
        overrides: &GenerationOverrides,
    ) -> Result<ValidatedResult<ActionSelection>> {
        self.run(&ActionSelectionValidator, prompt, context, overrides)
            .await
    }

    pub async fn classify_field_mapping(
        &self,
        prompt: &str,
        context: &RequestContext,
        overrides: &GenerationOverrides,
    ) -> Result<ValidatedResult<FieldMapping>> {
        let validator = FieldMappingValidator::new(self.schemas.clone());
        self.run(&validator, prompt, context, overrides).await
    }

    pub async fn classify_entities(
        &self,
        prompt: &str,
        context: &RequestContext,
        overrides: &GenerationOverrides,
    ) -> Result<ValidatedResult<EntityExtraction>> {
        self.run(&EntityExtractionValidator, prompt, context, overrides)
            .await
    }

    /// Run the full pipeline for any [`Validator`].
    ///
    /// Invoker errors and validation errors are returned immediately. A parse
    /// failure gets one escalated attempt when the [`EscalationPolicy`]
    /// allows it; if that attempt fails too, the result is
    /// [`PipelineError::GenerationFailed`] with the final error as its source.
    pub async fn run<V: Validator>(
        &self,
        validator: &V,
        prompt: &str,
        context: &RequestContext,
        overrides: &GenerationOverrides,
    ) -> Result<ValidatedResult<V::Output>> {
        let stage = validator.stage();
        let base_config = GenerationConfig::resolve(stage, overrides);
        let mut state = AttemptState::FirstAttempt;
        let mut escalation = None;

        let (recovered, output) = loop {
            let (strictness, config) = match state {
                AttemptState::FirstAttempt => (Strictness::Standard, base_config.clone()),
                AttemptState::Escalated => (
                    Strictness::Maximal,
                    self.policy.escalated_config(&base_config),
                ),
            };
            let (result, output) = self.attempt(stage, state, strictness, prompt, &config).await?;

            let err = match result {
                Ok(recovered) => break (recovered, output),
                Err(err) => err,
            };

            let trigger = self.policy.trigger(&err, output.output_token_count);
            match (state.escalate(), trigger) {
                (Some(next), Some(trigger)) => {
                    warn!(stage = %stage, %trigger, error = %err, "escalating to a stricter attempt");
                    emit(
                        &self.event_handler,
                        Event::Escalation {
                            stage,
                            trigger,
                            reason: err.to_string(),
                        },
                    );
                    state = next;
                    escalation = Some(trigger);
                }
                (Some(_), None) => {
                    error!(stage = %stage, error = %err, "output not recoverable, not escalating");
                    return Err(err.into());
                }
                (None, _) => {
                    error!(stage = %stage, error = %err, "escalated attempt failed");
                    return Err(PipelineError::GenerationFailed {
                        stage: Some(stage),
                        message: format!("escalated attempt failed: {err}"),
                        source: Some(Box::new(err.into())),
                    });
                }
            }
        };

        let mut corrections = Corrections::new(stage);
        let record = validator
            .validate(recovered.record, context, &mut corrections)
            .inspect_err(|e| error!(stage = %stage, error = %e, "validation failed"))?;
        let corrections = corrections.into_vec();
        for correction in &corrections {
            emit(
                &self.event_handler,
                Event::Correction {
                    stage,
                    field: correction.field.clone(),
                    detail: correction.detail.clone(),
                },
            );
        }

        let diagnostics = RecoveryDiagnostics {
            attempts: state.number(),
            escalation,
            input_token_count: output.input_token_count,
            output_token_count: output.output_token_count,
            ..RecoveryDiagnostics::from_trace(recovered.trace)
        };
        info!(
            stage = %stage,
            attempts = diagnostics.attempts,
            corrections = corrections.len(),
            clean = diagnostics.clean(),
            "classification complete"
        );

        Ok(ValidatedResult {
            stage,
            record,
            corrections,
            diagnostics,
        })
    }

    /// One generation plus recovery. Only invoker errors are returned as `Err`.
    async fn attempt(
        &self,
        stage: Stage,
        state: AttemptState,
        strictness: Strictness,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<(std::result::Result<Recovered, ParseError>, RawModelOutput)> {
        let attempt = state.number();
        let envelope = build_envelope(
            prompt,
            stage,
            strictness,
            self.config.template,
            self.config.seed_brace,
        );

        emit(&self.event_handler, Event::AttemptStart { stage, attempt });
        debug!(
            stage = %stage,
            attempt,
            generator = self.generator.name(),
            max_new_tokens = config.max_new_tokens,
            temperature = config.temperature,
            "requesting generation"
        );

        let output = self
            .generator
            .generate(&envelope.text, config)
            .await
            .map_err(|e| with_stage(e, stage))?;

        if self.policy.is_low_token_count(output.output_token_count) {
            warn!(
                stage = %stage,
                attempt,
                output_tokens = output.output_token_count,
                "model stopped early"
            );
        }

        let opts = NormalizeOptions {
            seeded: envelope.seeded,
            min_span_len: self.config.min_span_len(stage),
            preamble_window: self.config.preamble_window,
        };
        let result = recover_json(&output.text, &opts);

        emit(
            &self.event_handler,
            Event::AttemptEnd {
                stage,
                attempt,
                output_tokens: output.output_token_count,
                ok: result.is_ok(),
            },
        );
        Ok((result, output))
    }
}

/// Tag an invoker failure with the stage it happened in.
fn with_stage(err: PipelineError, stage: Stage) -> PipelineError {
    match err {
        PipelineError::GenerationFailed {
            stage: None,
            message,
            source,
        } => PipelineError::GenerationFailed {
            stage: Some(stage),
            message,
            source,
        },
        other => other,
    }
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("generator", &self.generator.name())
            .field("config", &self.config)
            .field("policy", &self.policy)
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

/// Builder for [`Classifier`].
pub struct ClassifierBuilder {
    generator: Arc<dyn Generator>,
    schemas: Option<Arc<dyn SchemaCache>>,
    config: Option<ClassifierConfig>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl ClassifierBuilder {
    /// Set the schema cache. Default: an empty [`InMemorySchemaCache`].
    pub fn schemas(mut self, schemas: Arc<dyn SchemaCache>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn config(mut self, config: ClassifierConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn build(self) -> Classifier {
        let config = self.config.unwrap_or_default();
        Classifier {
            generator: self.generator,
            schemas: self
                .schemas
                .unwrap_or_else(|| Arc::new(InMemorySchemaCache::new())),
            policy: EscalationPolicy::new(config.low_token_threshold),
            config,
            event_handler: self.event_handler,
        }
    }
}
