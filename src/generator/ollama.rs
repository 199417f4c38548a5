//! Generator backed by Ollama's native API.
//!
//! [`OllamaGenerator`] sends the fully built envelope to `/api/generate` in
//! raw mode, so the instruction framing and the seeded `{` reach the model
//! exactly as built, and reads token counts from `prompt_eval_count` and
//! `eval_count`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::{estimate_tokens, Generator, RawModelOutput};
use crate::config::{GenerationConfig, TOKEN_CEILING};
use crate::error::Result;
use crate::PipelineError;

/// Generator for an Ollama server.
///
/// # Example
///
/// ```no_run
/// use doc_classifier::generator::OllamaGenerator;
///
/// let generator = OllamaGenerator::new("http://localhost:11434", "mixtral:8x7b-instruct");
/// ```
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, model)
    }

    /// Reuse an existing HTTP client (connection pool, timeouts, proxies).
    pub fn with_client(client: Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the Ollama `options` object from a GenerationConfig.
    fn build_options(config: &GenerationConfig) -> Value {
        let temperature = if config.do_sample {
            config.temperature
        } else {
            0.0
        };
        let num_ctx = config
            .max_input_length
            .saturating_add(config.max_new_tokens)
            .min(TOKEN_CEILING);
        json!({
            "num_predict": config.max_new_tokens,
            "temperature": temperature,
            "top_p": config.top_p,
            "top_k": config.top_k,
            "repeat_penalty": config.repetition_penalty,
            "num_ctx": num_ctx,
        })
    }

    /// Build the JSON body for `/api/generate`.
    fn build_generate_body(&self, prompt: &str, config: &GenerationConfig) -> Value {
        json!({
            "model": self.model,
            "prompt": prompt,
            "raw": true,
            "stream": false,
            "options": Self::build_options(config),
        })
    }

    /// Pull the completion and token counts out of an Ollama response.
    ///
    /// A missing `eval_count` is estimated from the text, so an absent count
    /// never reads as an early stop.
    fn parse_response(json_resp: &Value) -> RawModelOutput {
        let count = |key: &str| {
            json_resp
                .get(key)
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
        };
        let text = json_resp
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let output_token_count = count("eval_count").unwrap_or_else(|| {
            let estimate = estimate_tokens(&text);
            debug!(estimate, "ollama response has no eval_count, estimating");
            estimate
        });
        RawModelOutput {
            input_token_count: count("prompt_eval_count").unwrap_or(0),
            output_token_count,
            text,
        }
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<RawModelOutput> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let body = self.build_generate_body(prompt, config);

        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::HttpError { status, body: text });
        }

        let json_resp: Value = resp.json().await?;
        if let Some(err) = json_resp.get("error").and_then(Value::as_str) {
            return Err(PipelineError::generation(err.to_string()));
        }

        let output = Self::parse_response(&json_resp);
        debug!(
            model = %self.model,
            input_tokens = output.input_token_count,
            output_tokens = output.output_token_count,
            "ollama generation finished"
        );
        Ok(output)
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Stage;

    fn generator() -> OllamaGenerator {
        OllamaGenerator::new("http://localhost:11434/", "mixtral")
    }

    #[test]
    fn test_generate_body_is_raw() {
        let config = GenerationConfig::for_stage(Stage::ActionSelection);
        let body = generator().build_generate_body("<s>[INST] hi [/INST]{", &config);

        assert_eq!(body["model"], "mixtral");
        assert_eq!(body["prompt"], "<s>[INST] hi [/INST]{");
        assert_eq!(body["raw"], true);
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 2500);
        assert_eq!(body["options"]["temperature"], 0.1);
        assert_eq!(body["options"]["top_k"], 50);
        assert_eq!(body["options"]["repeat_penalty"], 1.1);
        assert_eq!(body["options"]["num_ctx"], 31_991);
    }

    #[test]
    fn test_greedy_config_sends_zero_temperature() {
        let mut config = GenerationConfig::for_stage(Stage::FieldMapping);
        config.do_sample = false;
        let options = OllamaGenerator::build_options(&config);
        assert_eq!(options["temperature"], 0.0);
    }

    #[test]
    fn test_num_ctx_capped_at_ceiling() {
        let config = GenerationConfig::for_stage(Stage::FieldMapping)
            .with_max_input_length(TOKEN_CEILING)
            .with_max_new_tokens(TOKEN_CEILING);
        let options = OllamaGenerator::build_options(&config);
        assert_eq!(options["num_ctx"], TOKEN_CEILING);
    }

    #[test]
    fn test_parse_response_token_counts() {
        let resp = json!({
            "model": "mixtral",
            "response": "\"passed\": true}",
            "done": true,
            "prompt_eval_count": 812,
            "eval_count": 9
        });
        let out = OllamaGenerator::parse_response(&resp);
        assert_eq!(out.text, "\"passed\": true}");
        assert_eq!(out.input_token_count, 812);
        assert_eq!(out.output_token_count, 9);
    }

    #[test]
    fn test_missing_eval_count_is_estimated() {
        let text = "I could not find any billable items in this document, sorry. ".repeat(10);
        let resp = json!({"response": text, "done": true});
        let out = OllamaGenerator::parse_response(&resp);
        assert_eq!(out.output_token_count, estimate_tokens(&text));
        assert!(out.output_token_count >= 100);
        assert_eq!(out.input_token_count, 0);
    }

    #[test]
    fn test_parse_response_missing_fields() {
        let out = OllamaGenerator::parse_response(&json!({}));
        assert_eq!(out, RawModelOutput::default());
    }
}
