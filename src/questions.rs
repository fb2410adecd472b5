//! Quiz question generation.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::ai::AiChatClient;
use crate::db::{self, Pool};
use crate::error::{PipelineError, PipelineResult};
use crate::generation::{self, GenerationFlavor};
use crate::model::{NewQuestion, Question, QuestionType};
use crate::prompt::{PromptContext, PromptStrategy, QuestionPromptStrategy};

const SYSTEM_PROMPT: &str = "You write study quiz questions. Respond with a JSON array only, \
     no prose and no markdown.";
const QUESTION_MAX_TOKENS: u32 = 8000;

pub struct QuestionGenerator {
    pool: Pool,
    client: Arc<dyn AiChatClient>,
    model: String,
    strategy: QuestionPromptStrategy,
}

impl QuestionGenerator {
    pub fn new(pool: Pool, client: Arc<dyn AiChatClient>, model: impl Into<String>) -> Self {
        Self {
            pool,
            client,
            model: model.into(),
            strategy: QuestionPromptStrategy,
        }
    }

    /// Generate a fresh question set and attach it to the studyflow. Earlier
    /// sets are kept; every call appends.
    #[instrument(skip_all, fields(%studyflow_id))]
    pub async fn generate_questions(&self, studyflow_id: Uuid) -> PipelineResult<Vec<Question>> {
        generation::run(self, self.client.as_ref(), studyflow_id).await
    }
}

/// Jackson-style text of a scalar node; containers and null read as "".
fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
    }
}

fn text_field(node: &Value, field: &str) -> String {
    node.get(field).map(text_of).unwrap_or_default()
}

fn question_type(node: &Value) -> QuestionType {
    let Some(raw) = node.get("type") else {
        warn!("missing question type, defaulting to SHORT_ANSWER");
        return QuestionType::ShortAnswer;
    };
    let text = text_of(raw);
    QuestionType::parse_type(text.trim()).unwrap_or_else(|| {
        warn!(question_type = %raw, "invalid question type, defaulting to SHORT_ANSWER");
        QuestionType::ShortAnswer
    })
}

/// Candidate answers as JSON array text; anything but an array reads as `[]`.
fn answers(node: &Value) -> String {
    let list: Vec<String> = node
        .get("answers")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(text_of).collect())
        .unwrap_or_default();
    serde_json::to_string(&list).unwrap_or_else(|_| "[]".to_string())
}

fn tags(node: &Value) -> String {
    match node.get("tags") {
        Some(Value::Array(items)) => items.iter().map(text_of).collect::<Vec<_>>().join(","),
        Some(other) => text_of(other),
        None => String::new(),
    }
}

pub fn question_from_node(node: &Value) -> NewQuestion {
    NewQuestion {
        question_type: question_type(node),
        question: text_field(node, "question"),
        expected_answer: text_field(node, "expectedAnswer"),
        answers: answers(node),
        tags: tags(node),
    }
}

#[async_trait]
impl GenerationFlavor for QuestionGenerator {
    type Output = Vec<NewQuestion>;
    type Persisted = Vec<Question>;

    fn name(&self) -> &'static str {
        "questions"
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

    fn max_tokens(&self) -> u32 {
        QUESTION_MAX_TOKENS
    }

    /// Accepts a top-level array or an object carrying a `questions` array.
    fn parse_response(&self, content: &str) -> PipelineResult<Value> {
        match generation::parse_json(content)? {
            Value::Array(items) => Ok(Value::Array(items)),
            Value::Object(mut map) => match map.remove("questions") {
                Some(Value::Array(items)) => Ok(Value::Array(items)),
                _ => Err(PipelineError::ai(
                    "question response object has no questions array",
                )),
            },
            _ => Err(PipelineError::ai("question response is not a JSON array")),
        }
    }

    fn map_response(&self, parsed: Value) -> PipelineResult<Vec<NewQuestion>> {
        let items = parsed
            .as_array()
            .ok_or_else(|| PipelineError::ai("question response is not a JSON array"))?;
        Ok(items.iter().map(question_from_node).collect())
    }

    async fn persist(
        &self,
        studyflow_id: Uuid,
        questions: Vec<NewQuestion>,
    ) -> PipelineResult<Vec<Question>> {
        let saved = db::insert_questions(&self.pool, studyflow_id, &questions).await?;
        info!(count = saved.len(), "questions saved");
        Ok(saved)
    }
}
