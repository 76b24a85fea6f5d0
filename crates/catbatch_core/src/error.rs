use thiserror::Error;

/// Failure of a single call through a [`crate::gateway::WikiGateway`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("page not found: {0}")]
    NotFound(String),

    #[error("edit conflict on {0}")]
    EditConflict(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("MediaWiki API error [{code}]: {info}")]
    Api { code: String, info: String },

    #[error("failed to decode API response: {0}")]
    Decode(String),
}

/// Errors that stop a search or a batch before (or instead of) per-file work.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("{0}")]
    Validation(String),

    #[error("categories already present on selected files: {}", .categories.join(", "))]
    DuplicateCategory { categories: Vec<String> },

    #[error("cannot add {category} to itself")]
    CircularCategory { category: String },

    #[error("batch aborted before the first edit: {0}")]
    Fatal(GatewayError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl BatchError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
