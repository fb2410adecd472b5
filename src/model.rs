use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    MultipleChoice,
    ShortAnswer,
    TrueFalse,
    FillInTheBlank,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::MultipleChoice => "MULTIPLE_CHOICE",
            QuestionType::ShortAnswer => "SHORT_ANSWER",
            QuestionType::TrueFalse => "TRUE_FALSE",
            QuestionType::FillInTheBlank => "FILL_IN_THE_BLANK",
        }
    }

    /// Exact match on the wire token; callers decide the fallback.
    pub fn parse_type(s: &str) -> Option<Self> {
        match s {
            "MULTIPLE_CHOICE" => Some(QuestionType::MultipleChoice),
            "SHORT_ANSWER" => Some(QuestionType::ShortAnswer),
            "TRUE_FALSE" => Some(QuestionType::TrueFalse),
            "FILL_IN_THE_BLANK" => Some(QuestionType::FillInTheBlank),
            _ => None,
        }
    }

    pub fn all() -> [QuestionType; 4] {
        [
            QuestionType::MultipleChoice,
            QuestionType::ShortAnswer,
            QuestionType::TrueFalse,
            QuestionType::FillInTheBlank,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Studyflow {
    pub id: Uuid,
    pub title: String,
    pub indicator_resource_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// An uploaded study material or a pipeline-generated artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub studyflow_id: Uuid,
    pub filename: String,
    pub mime_type: String,
    #[serde(skip)]
    pub file_data: Vec<u8>,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

/// A question produced by the generator, before it is attached to a studyflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuestion {
    pub question_type: QuestionType,
    pub question: String,
    pub expected_answer: String,
    pub answers: String,
    pub tags: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub studyflow_id: Uuid,
    pub question_type: QuestionType,
    pub question: String,
    pub expected_answer: String,
    pub answers: String,
    pub tags: String,
    pub answered: bool,
    pub user_answer: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Reserved filename of the cached overview markdown. Must match the partial
/// unique index in `migrations/0001_init.sql`.
pub const OVERVIEW_FILENAME: &str = ".studyflow-overview-5b1e0c9a7d.md";

pub const MARKDOWN_MIME: &str = "text/markdown";
