//! Error types for relstat.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Pipeline errors
    #[error("Invalid pipeline definition: {0}")]
    InvalidPipeline(String),

    #[error("Pipeline validation failed: {0}")]
    PipelineValidation(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    // Planning errors
    #[error("Variable not defined: {0}")]
    MissingVariable(String),

    #[error("Invalid repository URL {url}: {reason}")]
    InvalidRepositoryUrl { url: String, reason: String },

    #[error("Runtime {name} {version} ({arch}) not found")]
    RuntimeNotFound {
        name: String,
        version: String,
        arch: String,
    },

    // Step errors
    #[error("Step {step} failed with exit code {exit_code}")]
    StepFailed { step: String, exit_code: i32 },

    #[error("Failed to spawn {program}: {message}")]
    SpawnFailed { program: String, message: String },

    #[error("Job timeout after {minutes} minutes")]
    JobTimeout { minutes: u32 },

    // Secret errors
    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::InvalidPipeline(err.to_string())
    }
}
