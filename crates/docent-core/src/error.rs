//! Error taxonomy for document processing, retrieval, and generation.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced to callers of the pipeline and document base manager.
///
/// Extraction and indexing errors are scoped to a single file; the
/// ingest loop reports them and moves on. Generation errors abort the
/// current answer only.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("unsupported format '{extension}' for {}", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("failed to extract {}: {reason}", path.display())]
    Extraction { path: PathBuf, reason: String },

    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("document base not found: {0}")]
    NotFound(String),

    #[error("document base already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl RagError {
    pub fn extraction(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        RagError::Extraction {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_path() {
        let err = RagError::UnsupportedFormat {
            path: PathBuf::from("notes/photo.png"),
            extension: "png".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unsupported format 'png' for notes/photo.png"
        );
    }

    #[test]
    fn test_store_error_is_transparent() {
        let err: RagError = anyhow::anyhow!("disk full").into();
        assert_eq!(err.to_string(), "disk full");
    }
}
