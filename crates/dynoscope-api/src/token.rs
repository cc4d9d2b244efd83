use async_trait::async_trait;

use crate::error::{ApiError, ApiResult};

/// Source of bearer tokens for the platform API.
///
/// The real session provider (login flow, token refresh) lives outside this
/// crate; this trait is its boundary. Returning `ApiError::Unauthorized`
/// signals authentication loss, which drains the resource cache upstream.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> ApiResult<String>;
}

/// Fixed token, handed in at construction
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> ApiResult<String> {
        Ok(self.0.clone())
    }
}

/// Reads the token from an environment variable on every request
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl TokenProvider for EnvToken {
    async fn token(&self) -> ApiResult<String> {
        match std::env::var(&self.var) {
            Ok(token) if !token.is_empty() => Ok(token),
            _ => Err(ApiError::Unauthorized),
        }
    }
}
