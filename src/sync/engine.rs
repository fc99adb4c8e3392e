//! Sync orchestration.
//!
//! The engine owns the connect / sync / disconnect lifecycle. Connections
//! are processed sequentially under one overall time budget, and a failure
//! on one connection never aborts the others; whatever happened is reported
//! in the [`SyncReport`].

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Duration;
use secrecy::ExposeSecret;

use super::SyncReport;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{EngineError, ProviderError};
use crate::models::{BankConnection, Id, Provider};
use crate::providers::{FeedAccount, ProviderRegistry};
use crate::reconcile::Reconciler;
use crate::secrets::TokenCipher;
use crate::storage::{Storage, TransactionPage, TransactionQuery};
use crate::tokens::TokenManager;

/// Overall budget for one sync invocation.
const DEFAULT_SYNC_TIMEOUT: StdDuration = StdDuration::from_secs(120);

/// How far back the first sync of a connection reaches.
const INITIAL_WINDOW_DAYS: i64 = 30;

/// Result of linking an account: the connection row that now exists plus
/// every account the provider reported during the exchange.
#[derive(Debug)]
pub struct ConnectOutcome {
    pub connection_id: Id,
    pub accounts: Vec<FeedAccount>,
}

struct ConnectionStats {
    accounts: u32,
    added: u32,
    updated: u32,
    errors: Vec<String>,
}

pub struct SyncEngine {
    storage: Arc<dyn Storage>,
    cipher: Arc<dyn TokenCipher>,
    providers: Arc<ProviderRegistry>,
    tokens: TokenManager,
    reconciler: Reconciler,
    clock: Arc<dyn Clock>,
    sync_timeout: StdDuration,
}

impl SyncEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        cipher: Arc<dyn TokenCipher>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        Self::build(
            storage,
            cipher,
            providers,
            Arc::new(SystemClock),
            DEFAULT_SYNC_TIMEOUT,
        )
    }

    /// Build adapters from configuration and honor its sync timeout.
    pub fn from_config(
        config: &EngineConfig,
        storage: Arc<dyn Storage>,
        cipher: Arc<dyn TokenCipher>,
    ) -> Self {
        Self::new(
            storage,
            cipher,
            Arc::new(ProviderRegistry::from_config(config)),
        )
        .with_sync_timeout(StdDuration::from_secs(config.sync_timeout_secs))
    }

    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self::build(
            self.storage,
            self.cipher,
            self.providers,
            clock,
            self.sync_timeout,
        )
    }

    pub fn with_sync_timeout(mut self, timeout: StdDuration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    fn build(
        storage: Arc<dyn Storage>,
        cipher: Arc<dyn TokenCipher>,
        providers: Arc<ProviderRegistry>,
        clock: Arc<dyn Clock>,
        sync_timeout: StdDuration,
    ) -> Self {
        let tokens = TokenManager::new(storage.clone(), cipher.clone(), clock.clone());
        let reconciler = Reconciler::new(storage.clone());
        Self {
            storage,
            cipher,
            providers,
            tokens,
            reconciler,
            clock,
            sync_timeout,
        }
    }

    /// URL the user visits to authorize one provider. The state parameter
    /// round-trips the (owner, provider) pair through the OAuth redirect.
    pub fn authorization_url(&self, owner_id: &Id, provider: Provider, redirect_uri: &str) -> String {
        let state = encode_state(owner_id, provider);
        self.providers
            .adapter(provider)
            .authorization_url(redirect_uri, &state)
    }

    pub fn authorization_urls(&self, owner_id: &Id, redirect_uri: &str) -> Vec<(Provider, String)> {
        Provider::ALL
            .into_iter()
            .map(|provider| {
                (
                    provider,
                    self.authorization_url(owner_id, provider, redirect_uri),
                )
            })
            .collect()
    }

    /// Exchange an authorization code and persist the resulting connection.
    ///
    /// Re-linking an account the owner already connected updates the
    /// existing row in place (fresh tokens, reactivated) rather than
    /// creating a duplicate.
    pub async fn connect(
        &self,
        owner_id: &Id,
        provider: Provider,
        authorization_code: &str,
        redirect_uri: &str,
    ) -> Result<ConnectOutcome, EngineError> {
        let adapter = self.providers.adapter(provider);

        let grant = adapter.authenticate(authorization_code, redirect_uri).await?;
        let refresh_token = grant.refresh_token.as_ref().ok_or_else(|| {
            EngineError::Validation(format!("{provider} did not issue a refresh token"))
        })?;

        let accounts = adapter
            .get_accounts(grant.access_token.expose_secret())
            .await?;
        let Some(primary) = accounts.first() else {
            return Err(EngineError::Validation(format!(
                "{provider} reported no accounts for this authorization"
            )));
        };

        let access_ct = self
            .cipher
            .encrypt(&grant.access_token)
            .map_err(|err| EngineError::Secrets(format!("{err:#}")))?;
        let refresh_ct = self
            .cipher
            .encrypt(refresh_token)
            .map_err(|err| EngineError::Secrets(format!("{err:#}")))?;

        let connection = match self
            .storage
            .find_connection(owner_id, provider, &primary.account_number)
            .await?
        {
            Some(mut existing) => {
                existing.access_token = access_ct;
                existing.refresh_token = refresh_ct;
                existing.account_type = primary.account_type;
                existing.balance = primary.balance;
                existing.currency = primary.currency.clone();
                existing.is_active = true;
                existing
            }
            None => BankConnection::new(
                owner_id.clone(),
                provider,
                &primary.account_number,
                primary.account_type,
                self.clock.now(),
                access_ct,
                refresh_ct,
            )
            .with_balance(primary.balance, &primary.currency),
        };
        self.storage.save_connection(&connection).await?;

        // The freshly-granted token is good for immediate use.
        self.tokens.cache_token(
            owner_id,
            &connection.id,
            grant.access_token,
            grant.expires_in,
        );

        tracing::info!(
            owner_id = %owner_id,
            connection_id = %connection.id,
            provider = %provider,
            accounts = accounts.len(),
            "Connected bank account"
        );

        Ok(ConnectOutcome {
            connection_id: connection.id,
            accounts,
        })
    }

    /// Remove a connection and everything stored under it.
    pub async fn disconnect(&self, owner_id: &Id, connection_id: &Id) -> Result<(), EngineError> {
        let connection = self
            .storage
            .get_connection(owner_id, connection_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("connection {connection_id}")))?;

        self.tokens.evict(owner_id, connection_id);
        self.storage.delete_connection_cascade(connection_id).await?;

        tracing::info!(
            owner_id = %owner_id,
            connection_id = %connection_id,
            provider = %connection.provider,
            "Disconnected bank account"
        );
        Ok(())
    }

    /// Sync one named connection, or every active connection of the owner.
    ///
    /// Each connection runs under the remainder of the overall time budget.
    /// Per-connection failures land in the report as `"{provider}: reason"`
    /// strings; the call itself errors only when the named target is
    /// missing or inactive.
    pub async fn sync(
        &self,
        owner_id: &Id,
        connection_id: Option<&Id>,
    ) -> Result<SyncReport, EngineError> {
        let targets = match connection_id {
            Some(id) => {
                let connection = self
                    .storage
                    .get_connection(owner_id, id)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(format!("connection {id}")))?;
                if !connection.is_active {
                    return Err(EngineError::Validation(format!(
                        "connection {id} is not active"
                    )));
                }
                vec![connection]
            }
            None => self.storage.list_active_connections(owner_id).await?,
        };

        let mut report = SyncReport::default();
        let started = Instant::now();

        for mut connection in targets {
            let provider = connection.provider;
            let remaining = self
                .sync_timeout
                .checked_sub(started.elapsed())
                .filter(|d| !d.is_zero());
            let Some(remaining) = remaining else {
                report
                    .errors
                    .push(format!("{provider}: {}", ProviderError::Timeout));
                continue;
            };

            match tokio::time::timeout(remaining, self.sync_connection(&mut connection)).await {
                Ok(Ok(stats)) => {
                    report.accounts_updated += stats.accounts;
                    report.transactions_added += stats.added;
                    report.transactions_updated += stats.updated;
                    report
                        .errors
                        .extend(stats.errors.into_iter().map(|e| format!("{provider}: {e}")));
                }
                Ok(Err(err)) => {
                    tracing::warn!(
                        connection_id = %connection.id,
                        provider = %provider,
                        error = %err,
                        "Connection sync failed"
                    );
                    report.errors.push(format!("{provider}: {err}"));
                }
                Err(_) => {
                    report
                        .errors
                        .push(format!("{provider}: {}", ProviderError::Timeout));
                }
            }
        }

        tracing::info!(
            owner_id = %owner_id,
            accounts_updated = report.accounts_updated,
            transactions_added = report.transactions_added,
            transactions_updated = report.transactions_updated,
            errors = report.errors.len(),
            "Sync finished"
        );
        Ok(report)
    }

    /// Full cycle for one connection: token, accounts, feed, reconcile.
    ///
    /// `last_sync_at` and the balance snapshot advance only when the cycle
    /// reaches the merge; a provider failure leaves the row untouched so
    /// the next sync retries the same window.
    async fn sync_connection(
        &self,
        connection: &mut BankConnection,
    ) -> Result<ConnectionStats, EngineError> {
        let adapter = self.providers.adapter(connection.provider);
        let token = self.tokens.valid_token(connection, adapter).await?;

        let accounts = adapter.get_accounts(token.expose_secret()).await?;

        let now = self.clock.now();
        let floor = now - Duration::days(INITIAL_WINDOW_DAYS);
        let from = connection
            .last_sync_at
            .map_or(floor, |last| last.max(floor));
        let batch = adapter
            .get_transactions(token.expose_secret(), &connection.account_number, from, now)
            .await?;

        let outcome = self.reconciler.merge(connection, &batch).await;

        // Re-read the row before saving: a concurrent caller may have
        // rotated the stored token pair since this copy was loaded, and
        // writing the old ciphertexts back would strand the connection.
        // Only the fields sync owns are merged into the fresh row.
        let Some(mut stored) = self
            .storage
            .get_connection(&connection.owner_id, &connection.id)
            .await?
        else {
            return Err(EngineError::NotFound(format!(
                "connection {}",
                connection.id
            )));
        };
        if let Some(primary) = accounts
            .iter()
            .find(|a| a.account_number == stored.account_number)
        {
            stored.account_type = primary.account_type;
            stored.balance = primary.balance;
            stored.currency = primary.currency.clone();
        }
        stored.last_sync_at = Some(now);
        self.storage.save_connection(&stored).await?;
        *connection = stored;

        tracing::debug!(
            connection_id = %connection.id,
            fetched = batch.len(),
            added = outcome.added,
            updated = outcome.updated,
            "Reconciled connection"
        );

        Ok(ConnectionStats {
            accounts: accounts.len() as u32,
            added: outcome.added,
            updated: outcome.updated,
            errors: outcome.errors,
        })
    }

    /// Read-only view over stored transactions. Never touches a provider.
    pub async fn transactions(
        &self,
        query: &TransactionQuery,
    ) -> Result<TransactionPage, EngineError> {
        if let Some(connection_id) = &query.connection_id {
            self.storage
                .get_connection(&query.owner_id, connection_id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("connection {connection_id}")))?;
        }
        Ok(self.storage.list_transactions(query).await?)
    }
}

/// Encode the (owner, provider) pair into an opaque OAuth state value.
pub fn encode_state(owner_id: &Id, provider: Provider) -> String {
    URL_SAFE_NO_PAD.encode(format!("{owner_id}:{provider}"))
}

/// Recover the (owner, provider) pair from a redirect's state parameter.
pub fn decode_state(state: &str) -> Result<(Id, Provider), EngineError> {
    let raw = URL_SAFE_NO_PAD
        .decode(state)
        .map_err(|_| EngineError::Validation("malformed state parameter".to_string()))?;
    let raw = String::from_utf8(raw)
        .map_err(|_| EngineError::Validation("malformed state parameter".to_string()))?;
    let (owner, provider) = raw
        .rsplit_once(':')
        .ok_or_else(|| EngineError::Validation("malformed state parameter".to_string()))?;
    Ok((Id::from_string(owner), Provider::parse(provider)?))
}
