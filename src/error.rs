//! Error taxonomy of the storage engine and its mapping to client/server responses.
//! Frontends only need `code_str`, `http_status` and `is_client_error`; the variants carry
//! enough context (names and physical paths) for logs and manual reconciliation.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::assets::codec::CodecError;
use crate::assets::metadata::MetadataError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("name '{0}' is already in use")]
    NameCollision(String),

    #[error("no free name derived from '{name}' after {attempts} attempts")]
    NameSpaceExhausted { name: String, attempts: u32 },

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("write failed at '{}': {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("metadata store failed: {0}")]
    MetadataFailed(#[source] MetadataError),

    /// A compensation step failed; the two stores disagree until reconciled.
    #[error("{op} of '{name}' left stores inconsistent: {detail} (paths: {paths:?})")]
    Inconsistent {
        op: &'static str,
        name: String,
        paths: Vec<PathBuf>,
        detail: String,
    },

    #[error("{op} cancelled: {reason}")]
    Cancelled { op: &'static str, reason: String },
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub fn write_failed<P: AsRef<Path>>(path: P, source: std::io::Error) -> Self {
        StorageError::WriteFailed { path: path.as_ref().to_path_buf(), source }
    }

    pub fn code_str(&self) -> &'static str {
        match self {
            StorageError::NotFound(_) => "not_found",
            StorageError::NameCollision(_) => "name_collision",
            StorageError::NameSpaceExhausted { .. } => "name_space_exhausted",
            StorageError::ValidationFailed(_) => "validation_failed",
            StorageError::WriteFailed { .. } => "write_failed",
            StorageError::MetadataFailed(_) => "metadata_failed",
            StorageError::Inconsistent { .. } => "inconsistent",
            StorageError::Cancelled { .. } => "cancelled",
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            StorageError::NotFound(_) => 404,
            StorageError::NameCollision(_) | StorageError::NameSpaceExhausted { .. } => 409,
            StorageError::ValidationFailed(_) => 400,
            StorageError::WriteFailed { .. } => 500,
            StorageError::MetadataFailed(_) => 503,
            StorageError::Inconsistent { .. } => 500,
            StorageError::Cancelled { .. } => 503,
        }
    }

    /// Rejections caused by the request itself rather than by the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StorageError::NotFound(_)
                | StorageError::NameCollision(_)
                | StorageError::NameSpaceExhausted { .. }
                | StorageError::ValidationFailed(_)
        )
    }

    pub fn is_inconsistent(&self) -> bool {
        matches!(self, StorageError::Inconsistent { .. })
    }
}

impl From<CodecError> for StorageError {
    fn from(err: CodecError) -> Self {
        StorageError::ValidationFailed(err.to_string())
    }
}
