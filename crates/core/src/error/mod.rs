use thiserror::Error;

#[derive(Error, Debug)]
pub enum MimicError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient data: {available} training examples available, {required} required")]
    InsufficientData { available: u64, required: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MimicError {
    /// Stable snake_case code for surfacing errors to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            MimicError::Validation(_) => "validation",
            MimicError::NotFound(_) => "not_found",
            MimicError::Upstream(_) => "upstream",
            MimicError::Conflict(_) => "conflict",
            MimicError::InsufficientData { .. } => "insufficient_data",
            MimicError::Storage(_) => "storage",
            MimicError::Config(_) => "config",
            MimicError::Internal(_) => "internal",
            MimicError::Other(_) => "other",
        }
    }

    /// Whether a caller may retry the whole operation later.
    /// Nothing inside the core retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MimicError::Upstream(_) | MimicError::Storage(_))
    }
}

impl From<validator::ValidationErrors> for MimicError {
    fn from(e: validator::ValidationErrors) -> Self {
        MimicError::Validation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MimicError>;
