//! Error types for the detection pipeline.
//!
//! Most failures never leave the crate: inference and resolution errors are
//! downgraded to the next fallback. Only [`PipelineError`] reaches a caller,
//! as a `success: false` result.

/// Failure talking to the inference service.
#[derive(thiserror::Error, Debug)]
pub enum InferenceError {
    #[error("inference service not configured: {0}")]
    NotConfigured(String),

    #[error("inference request failed: {0}")]
    Transport(String),

    #[error("inference timed out after {0}s")]
    Timeout(u64),

    #[error("inference service returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("inference response contained no text")]
    EmptyResponse,
}

/// The inference output could not be turned into a candidate list.
#[derive(thiserror::Error, Debug)]
pub enum ResponseFormatError {
    #[error("no JSON object found in response")]
    NoJson,

    #[error("invalid JSON: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error("schema violation: {0}")]
    Schema(String),
}

/// Why the AI-assisted path gave up.
#[derive(thiserror::Error, Debug)]
pub enum AiPathError {
    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Format(#[from] ResponseFormatError),
}

/// Engine pool failures.
#[derive(thiserror::Error, Debug, Clone)]
pub enum PoolError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("engine pool is closed")]
    Closed,

    #[error("failed to open browser context: {0}")]
    Context(String),
}

/// Unrecoverable pipeline failures.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("document handle unusable: {0}")]
    DocumentUnavailable(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
