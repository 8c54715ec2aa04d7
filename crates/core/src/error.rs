//! Error types shared by the store, history and session

use crate::annotation::AnnotationId;
use thiserror::Error;

/// Recoverable failures of annotation editing operations
///
/// None of these should end an editing session. `NothingToUndo` and
/// `NothingToRedo` are boundary signals a UI maps to disabled buttons.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnnotationError {
    #[error("annotation not found: {0}")]
    NotFound(AnnotationId),

    #[error("nothing to undo")]
    NothingToUndo,

    #[error("nothing to redo")]
    NothingToRedo,

    #[error("invalid annotation: {0}")]
    InvalidDraft(String),

    #[error("page {page} is out of range (document has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: u32 },
}

/// Result type for annotation editing operations
pub type AnnotationResult<T> = Result<T, AnnotationError>;
