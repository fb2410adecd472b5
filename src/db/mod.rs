//! Database module: view models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: slim view models returned by repositories for the pipeline.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules import from `studyflow_gen::db`, which re-exports the
//! repository API and the view models.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{OverviewInsert, StudyflowRef};
