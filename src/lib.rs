//! AI generation pipeline for studyflows: extract text from uploaded study
//! materials, prompt a chat-completion provider and persist the generated
//! quiz questions and overview.

pub mod ai;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod generation;
pub mod model;
pub mod overview;
pub mod prompt;
pub mod questions;
pub mod render;

pub use error::{PipelineError, PipelineResult};
