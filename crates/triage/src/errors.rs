//! Error types for the investigation engine.

use thiserror::Error;

/// Errors surfaced by the engine and its AI layer.
///
/// Probe-level failures never appear here: they are captured as failed
/// outcomes and fed back into the investigation.
#[derive(Debug, Error)]
pub enum TriageError {
    /// AI provider errors (API failures, missing credentials).
    #[error("AI error: {0}")]
    Ai(String),

    /// AI response could not be parsed as the expected structure.
    #[error("AI response parse error: {reason}")]
    AiResponseParse { reason: String },

    /// Configuration loading or validation errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No probes survived catalog construction.
    #[error("No probes available: every probe family failed to initialize or is disabled")]
    EmptyCatalog,

    /// Transcript or report persistence errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias used throughout the engine.
pub type TriageResult<T> = Result<T, TriageError>;
