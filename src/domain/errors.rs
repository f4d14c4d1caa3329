//! Domain-specific error types

use thiserror::Error;

/// Domain-level errors for project and dependency modeling
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid version format: {version}")]
    InvalidVersion { version: String },

    #[error("Invalid project source: {name}")]
    InvalidSource { name: String },

    #[error("Invalid input for field {field}: {message}")]
    InvalidInput { field: String, message: String },
}
