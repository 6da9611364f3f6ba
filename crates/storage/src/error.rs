// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage error taxonomy.

use thiserror::Error;

/// Errors from store operations.
///
/// `Validation` identifies the first invalid field and what was expected;
/// it is returned to the caller and never retried.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("validation failed: field '{field}' {expected}")]
    Validation {
        field: &'static str,
        expected: String,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Checkpoint(#[from] kbot_core::CheckpointError),
}

impl StorageError {
    pub fn validation(field: &'static str, expected: impl Into<String>) -> Self {
        StorageError::Validation {
            field,
            expected: expected.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StorageError::NotFound {
            kind,
            id: id.into(),
        }
    }
}
