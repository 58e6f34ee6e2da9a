//! Typed error hierarchy for the dashboard.
//!
//! Two top-level enums cover the two halves of the system:
//! - `DashboardError`: request validation, document store and pipeline failures
//! - `RenderError`: failures surfaced by the rendering pipeline as a visible error state

use thiserror::Error;

/// Errors from the document store and the HTTP-facing operations built on it.
#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Document {id} not found in collection {collection}")]
    DocumentNotFound { collection: String, id: String },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Invalid pipeline: {0}")]
    Pipeline(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DashboardError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors that replace a render target with the error state.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RenderError {
    #[error("Failed to load data: {0}")]
    Fetch(String),

    #[error("Failed to read response: {0}")]
    Parse(String),

    #[error("Response belongs to tab '{actual}', expected '{expected}'")]
    TabMismatch { expected: String, actual: String },
}
