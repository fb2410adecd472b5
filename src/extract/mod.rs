//! Text extraction over a studyflow's stored resources.
//!
//! Every block handed to the prompt layer is framed with a marker line that
//! names the source file. A resource that cannot be read becomes a failure
//! marker instead of aborting the whole studyflow.

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::db::{self, Pool};
use crate::error::{PipelineError, PipelineResult};
use crate::model::{Resource, OVERVIEW_FILENAME};

pub mod formats;

pub use formats::{extract_text, guess_mime, DocumentFormat, ExtractError};

pub const FILE_MARKER: &str = "=== FILE: ";

/// Result of reading one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Text(String),
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedBlock {
    pub filename: String,
    pub extraction: Extraction,
}

impl ExtractedBlock {
    pub fn from_resource(resource: &Resource) -> Self {
        let extraction = match extract_text(
            &resource.file_data,
            &resource.mime_type,
            &resource.filename,
        ) {
            Ok(text) => Extraction::Text(text),
            Err(err) => {
                warn!(
                    resource_id = %resource.id,
                    filename = %resource.filename,
                    error = %err,
                    "failed to extract text from resource"
                );
                Extraction::Failed {
                    reason: err.to_string(),
                }
            }
        };
        Self {
            filename: resource.filename.clone(),
            extraction,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.extraction, Extraction::Failed { .. })
    }

    /// Framed text as it appears in prompts.
    pub fn render(&self) -> String {
        match &self.extraction {
            Extraction::Text(text) => {
                format!("{}{} ===\n{}\n\n", FILE_MARKER, self.filename, text)
            }
            Extraction::Failed { .. } => {
                format!("{}{} (FAILED TO PARSE) ===\n\n", FILE_MARKER, self.filename)
            }
        }
    }
}

/// Resources that count as study material: everything except the designated
/// indicator and the cached overview artifact. Upload order is preserved.
pub fn ordinary_resources(resources: Vec<Resource>, indicator: Option<Uuid>) -> Vec<Resource> {
    resources
        .into_iter()
        .filter(|r| Some(r.id) != indicator)
        .filter(|r| r.filename != OVERVIEW_FILENAME)
        .collect()
}

/// One framed block per ordinary resource, in upload order.
#[instrument(skip_all, fields(%studyflow_id))]
pub async fn extract_all(pool: &Pool, studyflow_id: Uuid) -> PipelineResult<Vec<String>> {
    let studyflow = db::require_studyflow(pool, studyflow_id).await?;
    let resources = db::list_resources(pool, studyflow_id).await?;
    let ordinary = ordinary_resources(resources, studyflow.indicator_resource_id);

    let blocks: Vec<ExtractedBlock> = ordinary.iter().map(ExtractedBlock::from_resource).collect();
    let failed = blocks.iter().filter(|b| b.is_failed()).count();
    debug!(blocks = blocks.len(), failed, "extracted studyflow resources");

    Ok(blocks.iter().map(ExtractedBlock::render).collect())
}

/// Framed block for the studyflow's indicator resource, if one is designated.
#[instrument(skip_all, fields(%studyflow_id))]
pub async fn extract_indicator(pool: &Pool, studyflow_id: Uuid) -> PipelineResult<Option<String>> {
    let studyflow = db::require_studyflow(pool, studyflow_id).await?;
    let Some(indicator_id) = studyflow.indicator_resource_id else {
        return Ok(None);
    };
    match db::find_resource(pool, indicator_id).await? {
        Some(resource) => Ok(Some(ExtractedBlock::from_resource(&resource).render())),
        None => {
            warn!(%indicator_id, "indicator reference points at a missing resource");
            Ok(None)
        }
    }
}

/// Registered indicator tags, de-duplicated in registration order.
#[instrument(skip_all, fields(%studyflow_id))]
pub async fn extract_indicator_tags(pool: &Pool, studyflow_id: Uuid) -> PipelineResult<Vec<String>> {
    let mut tags: Vec<String> = Vec::new();
    for tag in db::list_indicator_tags(pool, studyflow_id).await? {
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    if tags.is_empty() {
        return Err(PipelineError::not_found(format!(
            "indicator tags for studyflow {}",
            studyflow_id
        )));
    }
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn resource(filename: &str, mime: &str, data: &[u8]) -> Resource {
        Resource {
            id: Uuid::new_v4(),
            studyflow_id: Uuid::nil(),
            filename: filename.into(),
            mime_type: mime.into(),
            file_data: data.to_vec(),
            size_bytes: data.len() as i64,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn render_frames_text_with_filename() {
        let block = ExtractedBlock::from_resource(&resource("a.txt", "text/plain", b"hello"));
        assert_eq!(block.render(), "=== FILE: a.txt ===\nhello\n\n");
    }

    #[test]
    fn render_marks_failures() {
        let block = ExtractedBlock::from_resource(&resource("pic.png", "image/png", b"\x89PNG"));
        assert!(block.is_failed());
        assert_eq!(block.render(), "=== FILE: pic.png (FAILED TO PARSE) ===\n\n");
    }

    #[test]
    fn ordinary_resources_skip_indicator_and_overview() {
        let a = resource("a.txt", "text/plain", b"a");
        let ind = resource("goals.txt", "text/plain", b"g");
        let cached = resource(OVERVIEW_FILENAME, "text/markdown", b"# o");
        let b = resource("b.txt", "text/plain", b"b");
        let kept = ordinary_resources(
            vec![a.clone(), ind.clone(), cached, b.clone()],
            Some(ind.id),
        );
        assert_eq!(
            kept.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![a.id, b.id]
        );
    }
}
