use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to open document {}: {reason}", .path.display())]
    DocumentOpen { path: PathBuf, reason: String },

    #[error("Failed to render page {page}: {reason}")]
    Render { page: usize, reason: String },

    #[error("Page artifact missing: {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Completion service error: {0}")]
    Completion(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Operation failed: {0}")]
    Operation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
