//! Study overview generation.
//!
//! The overview markdown is generated once per studyflow and cached as a
//! resource under [`OVERVIEW_FILENAME`]; every later request renders the
//! cached copy without calling the provider.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::ai::AiChatClient;
use crate::db::{self, OverviewInsert, Pool};
use crate::error::{PipelineError, PipelineResult};
use crate::generation::{self, GenerationFlavor};
use crate::model::{Resource, OVERVIEW_FILENAME};
use crate::prompt::{OverviewPromptStrategy, PromptContext, PromptStrategy};
use crate::render;

const SYSTEM_PROMPT: &str = "You are an assistant that answers ONLY with the markdown document \
     the user asks for. Output nothing but the overview markdown.";
const OVERVIEW_TEMPERATURE: f64 = 0.2;

pub struct OverviewGenerator {
    pool: Pool,
    client: Arc<dyn AiChatClient>,
    model: String,
    strategy: OverviewPromptStrategy,
}

impl OverviewGenerator {
    pub fn new(pool: Pool, client: Arc<dyn AiChatClient>, model: impl Into<String>) -> Self {
        Self {
            pool,
            client,
            model: model.into(),
            strategy: OverviewPromptStrategy,
        }
    }

    /// Cached overview markdown, generating and persisting it on first use.
    #[instrument(skip_all, fields(%studyflow_id))]
    pub async fn overview_markdown(&self, studyflow_id: Uuid) -> PipelineResult<String> {
        if let Some(cached) = self.cached(studyflow_id).await? {
            info!("serving cached overview");
            return resource_markdown(cached);
        }

        let outcome = generation::run(self, self.client.as_ref(), studyflow_id).await?;
        if outcome == OverviewInsert::AlreadyPresent {
            info!("overview was persisted concurrently, using the stored copy");
        }

        let stored = self.cached(studyflow_id).await?.ok_or_else(|| {
            PipelineError::processing(format!(
                "overview for studyflow {} missing after generation",
                studyflow_id
            ))
        })?;
        resource_markdown(stored)
    }

    pub async fn overview_pdf(&self, studyflow_id: Uuid) -> PipelineResult<Vec<u8>> {
        let markdown = self.overview_markdown(studyflow_id).await?;
        render::markdown_to_pdf(&markdown)
    }

    pub async fn overview_html(&self, studyflow_id: Uuid) -> PipelineResult<String> {
        let markdown = self.overview_markdown(studyflow_id).await?;
        render::html_document(&markdown)
    }

    async fn cached(&self, studyflow_id: Uuid) -> PipelineResult<Option<Resource>> {
        db::find_resource_by_filename(&self.pool, studyflow_id, OVERVIEW_FILENAME).await
    }
}

fn resource_markdown(resource: Resource) -> PipelineResult<String> {
    String::from_utf8(resource.file_data)
        .map_err(|e| PipelineError::processing(format!("cached overview is not UTF-8: {}", e)))
}

/// Unwrap a response wrapped whole in a ```` ```markdown ```` / ```` ```md ```` fence.
fn unwrap_markdown_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let opening = ["```markdown\n", "```md\n"]
        .iter()
        .find_map(|fence| trimmed.strip_prefix(fence));
    match opening.and_then(|rest| rest.strip_suffix("```")) {
        Some(inner) => inner.trim(),
        None => trimmed,
    }
}

#[async_trait]
impl GenerationFlavor for OverviewGenerator {
    type Output = String;
    type Persisted = OverviewInsert;

    fn name(&self) -> &'static str {
        "overview"
    }

    async fn gather_context(&self, studyflow_id: Uuid) -> PipelineResult<PromptContext> {
        generation::gather_context(&self.pool, studyflow_id).await
    }

    fn prompt_strategy(&self) -> &dyn PromptStrategy {
        &self.strategy
    }

    fn system_prompt(&self) -> &str {
        SYSTEM_PROMPT
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn temperature(&self) -> f64 {
        OVERVIEW_TEMPERATURE
    }

    /// The content is markdown, not JSON.
    fn parse_response(&self, content: &str) -> PipelineResult<Value> {
        Ok(json!({ "markdown": unwrap_markdown_fence(content) }))
    }

    fn map_response(&self, parsed: Value) -> PipelineResult<String> {
        let markdown = parsed
            .get("markdown")
            .and_then(Value::as_str)
            .ok_or_else(|| PipelineError::ai("overview response has no markdown"))?;
        if markdown.trim().is_empty() {
            return Err(PipelineError::processing("overview markdown is empty"));
        }
        Ok(markdown.to_string())
    }

    async fn persist(&self, studyflow_id: Uuid, markdown: String) -> PipelineResult<OverviewInsert> {
        let outcome = db::insert_overview(&self.pool, studyflow_id, &markdown).await?;
        if let OverviewInsert::Inserted(resource_id) = outcome {
            info!(%resource_id, bytes = markdown.len(), "overview persisted");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiRequest, AiResponse};

    struct Unreachable;

    #[async_trait]
    impl AiChatClient for Unreachable {
        async fn send(&self, _request: &AiRequest) -> PipelineResult<AiResponse> {
            Err(PipelineError::ai("provider must not be called"))
        }
    }

    async fn generator() -> OverviewGenerator {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        OverviewGenerator::new(pool, Arc::new(Unreachable), "test/model")
    }

    #[test]
    fn markdown_fence_is_unwrapped_only_when_it_wraps_everything() {
        assert_eq!(unwrap_markdown_fence("```markdown\n# T\n```"), "# T");
        assert_eq!(unwrap_markdown_fence("```md\n# T\n```\n"), "# T");
        let mixed = "# T\n\n```md\nx\n```";
        assert_eq!(unwrap_markdown_fence(mixed), mixed);
    }

    #[tokio::test]
    async fn map_rejects_missing_and_blank_markdown() {
        let overview = generator().await;
        assert!(matches!(
            overview.map_response(json!({})),
            Err(PipelineError::AiProvider { .. })
        ));
        assert!(matches!(
            overview.map_response(json!({"markdown": "  "})),
            Err(PipelineError::ResourceProcessing(_))
        ));
        assert_eq!(overview.map_response(json!({"markdown": "# T"})).unwrap(), "# T");
    }

    #[tokio::test]
    async fn parse_trims_content() {
        let overview = generator().await;
        assert_eq!(
            overview.parse_response("\n  # Title\n\nBody\n  ").unwrap(),
            json!({"markdown": "# Title\n\nBody"})
        );
    }

    #[tokio::test]
    async fn cached_overview_skips_provider() {
        let overview = generator().await;
        let sid = db::create_studyflow(&overview.pool, "Cached").await.unwrap();
        db::insert_overview(&overview.pool, sid, "# Cached\n\nFrom storage.")
            .await
            .unwrap();

        let md = overview.overview_markdown(sid).await.unwrap();
        assert_eq!(md, "# Cached\n\nFrom storage.");
        let pdf = overview.overview_pdf(sid).await.unwrap();
        assert!(pdf.starts_with(b"%PDF-"));
    }

    #[tokio::test]
    async fn unknown_studyflow_is_not_found() {
        let overview = generator().await;
        let err = overview.overview_pdf(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }
}
