//! Database view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use uuid::Uuid;

/// Studyflow slice the extractor needs: existence plus the indicator reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyflowRef {
    pub id: Uuid,
    pub indicator_resource_id: Option<Uuid>,
}

/// Outcome of writing the cached overview artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverviewInsert {
    /// This call created the row.
    Inserted(Uuid),
    /// Another writer already persisted an overview for the studyflow.
    AlreadyPresent,
}
