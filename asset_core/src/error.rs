use thiserror::Error;

use crate::asset_id::AssetKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssetErrorKind {
    MalformedPath,
    NotFound,
    UnsupportedType,
    Initialization,
    Cancelled,
    TypeMismatch,
    Rejected,
}

/// Failures surfaced by key resolution and loading. Cloneable so a task can
/// hand the same failure to every caller that observes it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AssetError {
    #[error("malformed asset path '{path}': {reason}")]
    MalformedPath { path: String, reason: String },
    #[error("asset '{key}' not found: {reason}")]
    NotFound { key: String, reason: String },
    #[error("no loader registered for type {kind} (asset '{key}')")]
    UnsupportedType { key: String, kind: String },
    #[error("failed to initialize asset '{key}': {reason}")]
    Initialization { key: String, reason: String },
    #[error("load of asset '{key}' was cancelled")]
    Cancelled { key: String },
    #[error("asset '{key}' is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },
    #[error("load of asset '{key}' was rejected: {reason}")]
    Rejected { key: String, reason: String },
}

impl AssetError {
    pub fn malformed(path: &str, reason: impl Into<String>) -> Self {
        AssetError::MalformedPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub fn not_found(key: &AssetKey, reason: impl Into<String>) -> Self {
        AssetError::NotFound {
            key: key.path().to_string(),
            reason: reason.into(),
        }
    }

    pub fn unsupported_type(key: &AssetKey) -> Self {
        AssetError::UnsupportedType {
            key: key.path().to_string(),
            kind: key.kind().extension().to_string(),
        }
    }

    pub fn initialization(key: &AssetKey, reason: impl Into<String>) -> Self {
        AssetError::Initialization {
            key: key.path().to_string(),
            reason: reason.into(),
        }
    }

    pub fn cancelled(key: &AssetKey) -> Self {
        AssetError::Cancelled {
            key: key.path().to_string(),
        }
    }

    pub fn type_mismatch(key: &AssetKey, expected: &'static str) -> Self {
        AssetError::TypeMismatch {
            key: key.path().to_string(),
            expected,
        }
    }

    pub fn rejected(key: &AssetKey, reason: impl Into<String>) -> Self {
        AssetError::Rejected {
            key: key.path().to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> AssetErrorKind {
        match self {
            AssetError::MalformedPath { .. } => AssetErrorKind::MalformedPath,
            AssetError::NotFound { .. } => AssetErrorKind::NotFound,
            AssetError::UnsupportedType { .. } => AssetErrorKind::UnsupportedType,
            AssetError::Initialization { .. } => AssetErrorKind::Initialization,
            AssetError::Cancelled { .. } => AssetErrorKind::Cancelled,
            AssetError::TypeMismatch { .. } => AssetErrorKind::TypeMismatch,
            AssetError::Rejected { .. } => AssetErrorKind::Rejected,
        }
    }

    /// The path the failure refers to.
    pub fn path(&self) -> &str {
        match self {
            AssetError::MalformedPath { path, .. } => path,
            AssetError::NotFound { key, .. }
            | AssetError::UnsupportedType { key, .. }
            | AssetError::Initialization { key, .. }
            | AssetError::Cancelled { key }
            | AssetError::TypeMismatch { key, .. }
            | AssetError::Rejected { key, .. } => key,
        }
    }
}
