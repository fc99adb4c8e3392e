//! Token lifecycle management.
//!
//! Produces a currently-valid access token for a connection. Tokens are
//! cached in-process with a safety margin shaved off their reported
//! lifetime; a cache miss takes a per-connection lock so that concurrent
//! callers trigger at most one refresh against the provider (most providers
//! invalidate the old refresh token on use, so a second concurrent refresh
//! would strand the connection).

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::error::EngineError;
use crate::models::{BankConnection, Id};
use crate::providers::BankProvider;
use crate::secrets::TokenCipher;
use crate::storage::Storage;

/// Remaining lifetime below which a cached token is treated as expired.
pub const EXPIRY_SAFETY_MARGIN_SECS: u64 = 300;

struct CachedToken {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

pub struct TokenManager {
    storage: Arc<dyn Storage>,
    cipher: Arc<dyn TokenCipher>,
    clock: Arc<dyn Clock>,
    cache: StdMutex<HashMap<(Id, Id), CachedToken>>,
    refresh_locks: StdMutex<HashMap<Id, Arc<Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        cipher: Arc<dyn TokenCipher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            cipher,
            clock,
            cache: StdMutex::new(HashMap::new()),
            refresh_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Return a valid access token for the connection, refreshing through
    /// the provider when the cache misses.
    ///
    /// On refresh, the new pair is encrypted and persisted onto the
    /// connection row before the token is handed out; a grant that omits a
    /// rotated refresh token leaves the stored one untouched.
    pub async fn valid_token(
        &self,
        connection: &mut BankConnection,
        provider: &dyn BankProvider,
    ) -> Result<SecretString, EngineError> {
        if let Some(token) = self.cached(&connection.owner_id, &connection.id) {
            return Ok(token);
        }

        let lock = self.refresh_lock(&connection.id);
        let _guard = lock.lock().await;

        // A concurrent caller may have refreshed while we waited.
        if let Some(token) = self.cached(&connection.owner_id, &connection.id) {
            return Ok(token);
        }

        tracing::info!(
            connection_id = %connection.id,
            provider = %connection.provider,
            "Refreshing access token"
        );

        let refresh_token = self
            .cipher
            .decrypt(&connection.refresh_token)
            .map_err(|err| EngineError::Secrets(format!("{err:#}")))?;
        let grant = provider
            .refresh_access_token(refresh_token.expose_secret())
            .await?;

        connection.access_token = self
            .cipher
            .encrypt(&grant.access_token)
            .map_err(|err| EngineError::Secrets(format!("{err:#}")))?;
        if let Some(rotated) = &grant.refresh_token {
            connection.refresh_token = self
                .cipher
                .encrypt(rotated)
                .map_err(|err| EngineError::Secrets(format!("{err:#}")))?;
        }
        self.storage.save_connection(connection).await?;

        self.cache_token(
            &connection.owner_id,
            &connection.id,
            grant.access_token.clone(),
            grant.expires_in,
        );

        Ok(grant.access_token)
    }

    /// Cache a token with TTL = reported lifetime minus the safety margin,
    /// floored at zero (an already-short-lived token misses on next use).
    pub fn cache_token(
        &self,
        owner_id: &Id,
        connection_id: &Id,
        token: SecretString,
        expires_in: u64,
    ) {
        let ttl = expires_in.saturating_sub(EXPIRY_SAFETY_MARGIN_SECS);
        let expires_at = self.clock.now() + Duration::seconds(ttl as i64);
        let mut cache = self.cache.lock().expect("token cache lock poisoned");
        cache.insert(
            (owner_id.clone(), connection_id.clone()),
            CachedToken { token, expires_at },
        );
    }

    /// Drop the cached token and the per-connection lock; called on
    /// disconnect so the maps do not grow with connection churn.
    pub fn evict(&self, owner_id: &Id, connection_id: &Id) {
        let mut cache = self.cache.lock().expect("token cache lock poisoned");
        cache.remove(&(owner_id.clone(), connection_id.clone()));
        drop(cache);

        let mut locks = self
            .refresh_locks
            .lock()
            .expect("refresh lock map poisoned");
        locks.remove(connection_id);
    }

    fn cached(&self, owner_id: &Id, connection_id: &Id) -> Option<SecretString> {
        let cache = self.cache.lock().expect("token cache lock poisoned");
        cache
            .get(&(owner_id.clone(), connection_id.clone()))
            .filter(|entry| entry.expires_at > self.clock.now())
            .map(|entry| entry.token.clone())
    }

    fn refresh_lock(&self, connection_id: &Id) -> Arc<Mutex<()>> {
        let mut locks = self
            .refresh_locks
            .lock()
            .expect("refresh lock map poisoned");
        locks
            .entry(connection_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
