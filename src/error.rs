//! Error taxonomy for the rating pipeline.
//!
//! Four families are kept apart so callers can tell a technical fault from
//! a policy decision: backend (transport) errors, content-validation issues,
//! guardrail violations and configuration errors. Unparseable ratings are
//! recovered inside strategies; only blank free text after a retry surfaces,
//! as `BackendError::EmptyContent`.

use thiserror::Error;

/// Failure reported by the text-generation / embedding backend.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("rate limited by backend: {0}")]
    RateLimited(String),

    #[error("backend server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("backend rejected credentials: {0}")]
    Auth(String),

    #[error("backend rejected request ({status}): {message}")]
    InvalidRequest { status: u16, message: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("backend has no embedding capability")]
    EmbeddingsUnsupported,

    /// The model answered with no usable text, twice.
    #[error("empty {0} response after retry")]
    EmptyContent(&'static str),
}

impl BackendError {
    /// Classify an HTTP status code returned by a backend.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => BackendError::RateLimited(message),
            401 | 403 => BackendError::Auth(message),
            s if s >= 500 => BackendError::Server { status: s, message },
            s => BackendError::InvalidRequest { status: s, message },
        }
    }

    /// 429 and 5xx class errors are retried by the throttler with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::RateLimited(_) | BackendError::Server { .. })
    }

    /// Errors that will fail every subsequent call of the run as well.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BackendError::Auth(_)
                | BackendError::InvalidRequest { .. }
                | BackendError::EmbeddingsUnsupported
        )
    }
}

/// Caller bugs detected before any backend call is issued.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown rating method '{0}' (expected DLR, FLR or SSR)")]
    UnknownMethod(String),

    #[error("unknown pipeline stage '{0}'")]
    UnknownStage(String),

    #[error("SSR requires anchor embeddings but none were computed")]
    MissingAnchorEmbeddings,

    #[error("SSR requires an embedding-capable backend")]
    EmbeddingsUnavailable,

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read configuration: {0}")]
    Load(String),
}

/// Policy decisions, distinct from technical faults.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GuardrailError {
    #[error("projected cost ${projected_usd:.4} exceeds cap ${cap_usd:.4}")]
    CostCapExceeded { projected_usd: f64, cap_usd: f64 },

    #[error("Insufficient credits: need {needed}, have {available}")]
    InsufficientCredits { needed: u64, available: u64 },
}

/// Coarse classification handed to presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    ContentValidation,
    Guardrail,
    Configuration,
}

/// Terminal failure of a pipeline run.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Guardrail(#[from] GuardrailError),

    /// The cost cap tripped before every task was launched. The partial
    /// aggregate is deliberately not returned.
    #[error("run aborted after {completed}/{total} tasks: {cause}")]
    Aborted {
        completed: usize,
        total: usize,
        cause: GuardrailError,
    },

    #[error("all {total} tasks failed; first failure: {first}")]
    AllTasksFailed { total: usize, first: String },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Config(_) => ErrorKind::Configuration,
            PipelineError::Backend(BackendError::EmptyContent(_)) => ErrorKind::ContentValidation,
            PipelineError::Backend(_) | PipelineError::AllTasksFailed { .. } => ErrorKind::Transport,
            PipelineError::Guardrail(_) | PipelineError::Aborted { .. } => ErrorKind::Guardrail,
        }
    }
}
