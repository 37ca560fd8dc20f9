//! Query synthesis: question → structured query via one model round-trip.

use std::sync::Arc;

use sales_insight_store::AccessContext;
use serde_json::Value;

use crate::config::PipelineConfig;
use crate::llm::{CompletionRequest, LLMError, LLMProvider};
use crate::prompts::{render_query_prompt, render_repair_prompt, QUERY_SYSTEM_PROMPT};
use crate::query::StructuredQuery;
use crate::snippet::parse_json_payload;

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("model output is not valid JSON: {detail}")]
    MalformedOutput { detail: String },

    #[error("model output has the wrong shape: {detail}")]
    SchemaViolation { detail: String },

    #[error("language model call failed: {0}")]
    Model(#[from] LLMError),
}

impl SynthesisError {
    /// Whether feeding the error back to the model could help.
    fn is_repairable(&self) -> bool {
        matches!(
            self,
            SynthesisError::MalformedOutput { .. } | SynthesisError::SchemaViolation { .. }
        )
    }
}

/// Send `system` + `prompt`, extract the JSON payload and hand it to `accept`.
///
/// With `repair_attempts > 0` an unusable response is followed by a repair
/// prompt carrying the error, up to that many extra round-trips.
pub(crate) async fn complete_json<T>(
    model: &dyn LLMProvider,
    stage: &'static str,
    system: &str,
    prompt: &str,
    config: &PipelineConfig,
    mut accept: impl FnMut(Value) -> Result<T, SynthesisError>,
) -> Result<T, SynthesisError> {
    let mut user_prompt = prompt.to_string();
    let mut attempt = 0usize;

    loop {
        let mut request = CompletionRequest::exchange(system, user_prompt.as_str());
        request.max_tokens = config.max_tokens;
        request.temperature = config.temperature;

        let response = model.complete(request).await?;
        tracing::debug!(stage, attempt, raw = %response.content, "model response");

        let outcome = match parse_json_payload(&response.content) {
            Ok((value, extracted)) => {
                tracing::debug!(stage, extracted = %extracted, "extracted payload");
                accept(value)
            }
            Err(e) => Err(SynthesisError::MalformedOutput {
                detail: e.to_string(),
            }),
        };

        match outcome {
            Err(err) if err.is_repairable() && attempt < config.repair_attempts => {
                attempt += 1;
                tracing::info!(stage, attempt, error = %err, "retrying with repair prompt");
                user_prompt = render_repair_prompt(prompt, &response.content, &err.to_string());
            }
            other => return other,
        }
    }
}

/// Turns a natural-language question into a [`StructuredQuery`].
pub struct QuerySynthesizer {
    model: Arc<dyn LLMProvider>,
    config: PipelineConfig,
}

impl QuerySynthesizer {
    pub fn new(model: Arc<dyn LLMProvider>, config: PipelineConfig) -> Self {
        Self { model, config }
    }

    pub async fn synthesize(
        &self,
        question: &str,
        ctx: &AccessContext,
    ) -> Result<StructuredQuery, SynthesisError> {
        let prompt = render_query_prompt(question);
        let query = complete_json(
            self.model.as_ref(),
            "query",
            QUERY_SYSTEM_PROMPT,
            &prompt,
            &self.config,
            StructuredQuery::from_value,
        )
        .await?;

        tracing::info!(
            subject = %ctx.subject_id,
            entity = %query.target_entity,
            operation = %query.operation,
            "synthesized query"
        );
        Ok(query)
    }
}
