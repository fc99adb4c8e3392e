//! Bank provider adapters.
//!
//! Each adapter hides one bank's OAuth dialect and feed schema behind the
//! [`BankProvider`] contract. Provider-specific quirks (date formats, page
//! limits, direction encoding, description boilerplate) are fully contained
//! here; nothing above this layer knows which bank it is talking to beyond
//! the [`Provider`] tag.

mod dbs;
mod ocbc;
pub mod normalize;
mod uob;

pub use dbs::DbsProvider;
pub use ocbc::OcbcProvider;
pub use uob::UobProvider;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use secrecy::SecretString;

use crate::config::EngineConfig;
use crate::error::ProviderError;
use crate::models::{AccountType, Direction, Provider};

/// Token pair issued by a provider's OAuth endpoint.
#[derive(Debug)]
pub struct TokenGrant {
    pub access_token: SecretString,
    /// Providers that omit a rotated refresh token get the old one passed
    /// through by the adapter; `None` only when no prior token existed.
    pub refresh_token: Option<SecretString>,
    pub expires_in: u64,
}

/// One account as reported by a provider, normalized.
#[derive(Debug, Clone)]
pub struct FeedAccount {
    pub account_number: String,
    pub account_type: AccountType,
    pub balance: Decimal,
    pub currency: String,
}

/// One transaction as reported by a provider, normalized but not yet
/// categorized or persisted.
#[derive(Debug, Clone)]
pub struct FeedTransaction {
    pub external_id: String,
    /// Unsigned magnitude; sign information lives in `direction`.
    pub amount: Decimal,
    pub direction: Direction,
    /// Description with provider boilerplate stripped.
    pub description: String,
    /// Best-effort merchant token; never an error when extraction fails.
    pub merchant: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub running_balance: Option<Decimal>,
}

/// Capability set implemented once per supported bank.
#[async_trait::async_trait]
pub trait BankProvider: Send + Sync {
    fn name(&self) -> Provider;

    /// Pure URL construction; no network call.
    fn authorization_url(&self, redirect_uri: &str, state: &str) -> String;

    async fn authenticate(
        &self,
        authorization_code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ProviderError>;

    async fn refresh_access_token(&self, refresh_token: &str)
        -> Result<TokenGrant, ProviderError>;

    async fn get_accounts(&self, access_token: &str) -> Result<Vec<FeedAccount>, ProviderError>;

    async fn get_transactions(
        &self,
        access_token: &str,
        account_number: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<FeedTransaction>, ProviderError>;
}

/// One adapter per [`Provider`] variant, resolved by a total match.
pub struct ProviderRegistry {
    dbs: Arc<dyn BankProvider>,
    ocbc: Arc<dyn BankProvider>,
    uob: Arc<dyn BankProvider>,
}

impl ProviderRegistry {
    pub fn new(
        dbs: Arc<dyn BankProvider>,
        ocbc: Arc<dyn BankProvider>,
        uob: Arc<dyn BankProvider>,
    ) -> Self {
        Self { dbs, ocbc, uob }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            Arc::new(DbsProvider::from_config(&config.dbs)),
            Arc::new(OcbcProvider::from_config(&config.ocbc)),
            Arc::new(UobProvider::from_config(&config.uob)),
        )
    }

    pub fn adapter(&self, provider: Provider) -> &dyn BankProvider {
        match provider {
            Provider::Dbs => self.dbs.as_ref(),
            Provider::Ocbc => self.ocbc.as_ref(),
            Provider::Uob => self.uob.as_ref(),
        }
    }
}

/// Map a reqwest transport failure into the closed taxonomy.
pub(crate) fn map_transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else if err.is_connect() {
        ProviderError::Unavailable(err.to_string())
    } else {
        ProviderError::Unknown(err.to_string())
    }
}

/// Status mapping for authenticated API calls (accounts, transactions,
/// refresh): 401 means the token or grant is gone, not bad credentials.
pub(crate) fn map_api_status(status: StatusCode) -> ProviderError {
    match status.as_u16() {
        401 => ProviderError::AuthExpired,
        403 => ProviderError::Forbidden,
        429 => ProviderError::RateLimited,
        s if (500..600).contains(&s) => ProviderError::Unavailable(format!("http {s}")),
        s => ProviderError::Unknown(format!("unexpected http {s}")),
    }
}

/// Status mapping for the authorization-code exchange, where a 4xx means the
/// code or client credentials were rejected.
pub(crate) fn map_auth_status(status: StatusCode) -> ProviderError {
    match status.as_u16() {
        429 => ProviderError::RateLimited,
        s if (500..600).contains(&s) => ProviderError::Unavailable(format!("http {s}")),
        s => ProviderError::Auth { status: s },
    }
}

/// Build an OAuth authorize URL with properly encoded query parameters.
pub(crate) fn build_authorize_url(endpoint: &str, params: &[(&str, &str)]) -> String {
    match reqwest::Url::parse_with_params(endpoint, params) {
        Ok(url) => url.into(),
        // Only reachable with a malformed base url override.
        Err(_) => endpoint.to_string(),
    }
}
