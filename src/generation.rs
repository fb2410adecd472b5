//! Shared generation pipeline.
//!
//! Every generated artifact goes through the same eight steps:
//! gather, select, render, build, invoke, parse, map, persist.
//! A [`GenerationFlavor`] supplies the variable parts and [`run`] drives them
//! in order, stopping at the first failure.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::ai::{AiChatClient, AiRequest};
use crate::db::Pool;
use crate::error::{PipelineError, PipelineResult};
use crate::extract;
use crate::prompt::{PromptContext, PromptStrategy};

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 4000;

#[async_trait]
pub trait GenerationFlavor: Send + Sync {
    /// Domain records produced by the map step.
    type Output: Send;
    /// What the persist step hands back to the caller.
    type Persisted: Send;

    /// Short label used in logs.
    fn name(&self) -> &'static str;

    async fn gather_context(&self, studyflow_id: Uuid) -> PipelineResult<PromptContext>;

    fn prompt_strategy(&self) -> &dyn PromptStrategy;

    fn system_prompt(&self) -> &str;

    fn model(&self) -> &str;

    fn temperature(&self) -> f64 {
        DEFAULT_TEMPERATURE
    }

    fn max_tokens(&self) -> u32 {
        DEFAULT_MAX_TOKENS
    }

    fn build_request(&self, prompt: String) -> AiRequest {
        AiRequest::builder(self.model())
            .system(self.system_prompt())
            .user(prompt)
            .temperature(self.temperature())
            .max_tokens(self.max_tokens())
            .build()
    }

    fn parse_response(&self, content: &str) -> PipelineResult<Value> {
        parse_json(content)
    }

    fn map_response(&self, parsed: Value) -> PipelineResult<Self::Output>;

    async fn persist(
        &self,
        studyflow_id: Uuid,
        output: Self::Output,
    ) -> PipelineResult<Self::Persisted>;
}

/// Context shared by the stock flavors: every ordinary resource, the
/// registered indicator tags and the indicator resource when one exists.
pub async fn gather_context(pool: &Pool, studyflow_id: Uuid) -> PipelineResult<PromptContext> {
    let resource_contents = extract::extract_all(pool, studyflow_id).await?;
    let existing_indicators = extract::extract_indicator_tags(pool, studyflow_id).await?;
    let indicator_text = extract::extract_indicator(pool, studyflow_id).await?;
    Ok(PromptContext {
        resource_contents,
        existing_indicators,
        indicator_text,
    })
}

/// Drive one flavor through the pipeline for a studyflow.
#[instrument(skip_all, fields(flavor = flavor.name(), %studyflow_id))]
pub async fn run<F: GenerationFlavor>(
    flavor: &F,
    client: &dyn AiChatClient,
    studyflow_id: Uuid,
) -> PipelineResult<F::Persisted> {
    let ctx = flavor.gather_context(studyflow_id).await?;
    debug!(
        blocks = ctx.resource_contents.len(),
        tags = ctx.existing_indicators.len(),
        has_indicator = ctx.indicator_text.is_some(),
        "gathered context"
    );

    let strategy = flavor.prompt_strategy();
    let prompt = strategy.render(&ctx);
    debug!(prompt_len = prompt.len(), "rendered prompt");

    let request = flavor.build_request(prompt);
    debug!(
        model = %request.model,
        temperature = request.temperature,
        max_tokens = request.max_tokens,
        "built request"
    );

    let response = client.send(&request).await?;
    debug!(status = response.status, content_len = response.content.len(), "received response");

    let parsed = flavor.parse_response(&response.content)?;
    debug!("parsed response");

    let output = flavor.map_response(parsed)?;
    debug!("mapped response");

    let persisted = flavor.persist(studyflow_id, output).await?;
    info!("generation finished");
    Ok(persisted)
}

/// Strict JSON, optionally wrapped in a markdown fence.
pub fn parse_json(content: &str) -> PipelineResult<Value> {
    serde_json::from_str(strip_code_fences(content))
        .map_err(|e| PipelineError::ai(format!("response is not valid JSON: {}", e)))
}

/// Remove a surrounding ```` ``` ```` / ```` ```json ```` fence if the whole
/// content is wrapped in one.
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`, `markdown`, ...) on the opening line.
    match body.split_once('\n') {
        Some((_, inner)) => inner.trim(),
        None => body.trim(),
    }
}
