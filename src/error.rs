use thiserror::Error;

/// Closed taxonomy of provider-side failures.
///
/// Adapters translate every transport-level failure into one of these
/// variants; raw reqwest errors never cross the adapter boundary. This is
/// the vocabulary the token manager and orchestrator reason about.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Authorization code or client credentials rejected during connect.
    #[error("authorization rejected (http {status})")]
    Auth { status: u16 },

    /// Refresh token no longer valid; the user must re-link the account.
    #[error("authorization expired; re-link required")]
    AuthExpired,

    #[error("provider refused the request")]
    Forbidden,

    #[error("provider rate limit exceeded")]
    RateLimited,

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider request timed out")]
    Timeout,

    #[error("provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// True when the failure cannot be retried without the user
    /// re-authorizing the connection.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, ProviderError::AuthExpired | ProviderError::Forbidden)
    }

    /// True when a later sync cycle may plausibly succeed unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited | ProviderError::Unavailable(_) | ProviderError::Timeout
        )
    }
}

/// Caller-facing failures of the sync engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("secrets error: {0}")]
    Secrets(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
