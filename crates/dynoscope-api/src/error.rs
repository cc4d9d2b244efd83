use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Platform API failure classes.
///
/// `NotFound` is routine: a resource referenced by a log line may not be
/// queryable yet (eventual consistency), and a point query failing for a
/// previously-cached resource after a terminal state is a removal signal.
/// Callers branch on it via [`ApiError::is_not_found`]; everything else is a
/// genuine fault.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("authentication unavailable")]
    Unauthorized,

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}
