//! Error taxonomy shared by every stage of the generation pipeline.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A referenced studyflow, resource, question or tag set does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The chat-completion provider failed, timed out or answered with an
    /// unusable payload.
    #[error("AI provider error: {message}")]
    AiProvider {
        message: String,
        status: Option<u16>,
    },

    /// Generated or cached content could not be processed (empty markdown,
    /// rendering failure, missing artifact after generation).
    #[error("resource processing error: {0}")]
    ResourceProcessing(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl PipelineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn ai(message: impl Into<String>) -> Self {
        Self::AiProvider {
            message: message.into(),
            status: None,
        }
    }

    pub fn ai_status(status: u16, message: impl Into<String>) -> Self {
        Self::AiProvider {
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::ResourceProcessing(message.into())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
