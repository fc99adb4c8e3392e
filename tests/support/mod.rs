#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};

use fareledger::error::ProviderError;
use fareledger::models::{AccountType, BankConnection, Ciphertext, Direction, Id, Provider, Transaction};
use fareledger::providers::{BankProvider, FeedAccount, FeedTransaction, TokenGrant};
use fareledger::secrets::TokenCipher;
use fareledger::storage::{
    MemoryStorage, Storage, TransactionPage, TransactionQuery, UpsertOutcome,
};

/// Reversible stand-in cipher so tests stay fast and can assert on
/// ciphertext contents.
pub struct PlainCipher;

impl TokenCipher for PlainCipher {
    fn encrypt(&self, plaintext: &SecretString) -> Result<Ciphertext> {
        Ok(Ciphertext::new(STANDARD.encode(plaintext.expose_secret())))
    }

    fn decrypt(&self, ciphertext: &Ciphertext) -> Result<SecretString> {
        let bytes = STANDARD.decode(ciphertext.as_str())?;
        Ok(SecretString::new(String::from_utf8(bytes)?.into()))
    }
}

#[derive(Clone)]
pub struct ScriptedGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: u64,
}

impl ScriptedGrant {
    fn into_grant(self) -> TokenGrant {
        TokenGrant {
            access_token: SecretString::new(self.access_token.into()),
            refresh_token: self
                .refresh_token
                .map(|t| SecretString::new(t.into())),
            expires_in: self.expires_in,
        }
    }
}

/// Programmable in-process bank: every response is whatever the test
/// scripted, and refresh traffic is counted.
pub struct ScriptedProvider {
    tag: Provider,
    accounts: Mutex<Vec<FeedAccount>>,
    transactions: Mutex<Vec<FeedTransaction>>,
    accounts_error: Mutex<Option<ProviderError>>,
    authenticate_grant: Mutex<ScriptedGrant>,
    refresh_grant: Mutex<ScriptedGrant>,
    refresh_error: Mutex<Option<ProviderError>>,
    refresh_delay: Mutex<Option<Duration>>,
    refresh_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(tag: Provider) -> Self {
        let grant = ScriptedGrant {
            access_token: format!("access-{tag}"),
            refresh_token: Some(format!("refresh-{tag}")),
            expires_in: 3600,
        };
        Self {
            tag,
            accounts: Mutex::new(Vec::new()),
            transactions: Mutex::new(Vec::new()),
            accounts_error: Mutex::new(None),
            authenticate_grant: Mutex::new(grant.clone()),
            refresh_grant: Mutex::new(grant),
            refresh_error: Mutex::new(None),
            refresh_delay: Mutex::new(None),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_accounts(self, accounts: Vec<FeedAccount>) -> Self {
        *self.accounts.lock().unwrap() = accounts;
        self
    }

    pub fn set_transactions(&self, transactions: Vec<FeedTransaction>) {
        *self.transactions.lock().unwrap() = transactions;
    }

    pub fn fail_accounts_with(&self, error: ProviderError) {
        *self.accounts_error.lock().unwrap() = Some(error);
    }

    pub fn set_authenticate_grant(&self, grant: ScriptedGrant) {
        *self.authenticate_grant.lock().unwrap() = grant;
    }

    pub fn set_refresh_grant(&self, grant: ScriptedGrant) {
        *self.refresh_grant.lock().unwrap() = grant;
    }

    pub fn fail_refresh_with(&self, error: ProviderError) {
        *self.refresh_error.lock().unwrap() = Some(error);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = Some(delay);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BankProvider for ScriptedProvider {
    fn name(&self) -> Provider {
        self.tag
    }

    fn authorization_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "https://{}.test/authorize?redirect_uri={redirect_uri}&state={state}",
            self.tag
        )
    }

    async fn authenticate(
        &self,
        _authorization_code: &str,
        _redirect_uri: &str,
    ) -> Result<TokenGrant, ProviderError> {
        Ok(self.authenticate_grant.lock().unwrap().clone().into_grant())
    }

    async fn refresh_access_token(
        &self,
        _refresh_token: &str,
    ) -> Result<TokenGrant, ProviderError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.refresh_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.refresh_grant.lock().unwrap().clone().into_grant())
    }

    async fn get_accounts(&self, _access_token: &str) -> Result<Vec<FeedAccount>, ProviderError> {
        if let Some(err) = self.accounts_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.accounts.lock().unwrap().clone())
    }

    async fn get_transactions(
        &self,
        _access_token: &str,
        _account_number: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<FeedTransaction>, ProviderError> {
        Ok(self.transactions.lock().unwrap().clone())
    }
}

/// Storage wrapper that rejects upserts for configured external ids,
/// delegating everything else to an in-memory store.
pub struct FlakyStorage {
    inner: MemoryStorage,
    fail_external_ids: Vec<String>,
}

impl FlakyStorage {
    pub fn new(fail_external_ids: &[&str]) -> Self {
        Self {
            inner: MemoryStorage::new(),
            fail_external_ids: fail_external_ids.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait::async_trait]
impl Storage for FlakyStorage {
    async fn list_active_connections(&self, owner_id: &Id) -> Result<Vec<BankConnection>> {
        self.inner.list_active_connections(owner_id).await
    }

    async fn get_connection(&self, owner_id: &Id, id: &Id) -> Result<Option<BankConnection>> {
        self.inner.get_connection(owner_id, id).await
    }

    async fn find_connection(
        &self,
        owner_id: &Id,
        provider: Provider,
        account_number: &str,
    ) -> Result<Option<BankConnection>> {
        self.inner
            .find_connection(owner_id, provider, account_number)
            .await
    }

    async fn save_connection(&self, connection: &BankConnection) -> Result<()> {
        self.inner.save_connection(connection).await
    }

    async fn delete_connection_cascade(&self, id: &Id) -> Result<bool> {
        self.inner.delete_connection_cascade(id).await
    }

    async fn upsert_transaction(&self, tx: &Transaction) -> Result<UpsertOutcome> {
        if self.fail_external_ids.contains(&tx.external_id) {
            anyhow::bail!("storage rejected row");
        }
        self.inner.upsert_transaction(tx).await
    }

    async fn delete_transactions_for_connection(&self, connection_id: &Id) -> Result<usize> {
        self.inner
            .delete_transactions_for_connection(connection_id)
            .await
    }

    async fn list_transactions(&self, query: &TransactionQuery) -> Result<TransactionPage> {
        self.inner.list_transactions(query).await
    }
}

pub fn sgd(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

pub fn savings_account(account_number: &str, balance_cents: i64) -> FeedAccount {
    FeedAccount {
        account_number: account_number.to_string(),
        account_type: AccountType::Savings,
        balance: sgd(balance_cents),
        currency: "SGD".to_string(),
    }
}

pub fn credit(external_id: &str, cents: i64, description: &str) -> FeedTransaction {
    FeedTransaction {
        external_id: external_id.to_string(),
        amount: sgd(cents),
        direction: Direction::Credit,
        description: description.to_string(),
        merchant: None,
        occurred_at: Utc::now(),
        running_balance: None,
    }
}

pub fn debit(external_id: &str, cents: i64, description: &str) -> FeedTransaction {
    FeedTransaction {
        direction: Direction::Debit,
        ..credit(external_id, cents, description)
    }
}

pub fn cipher() -> Arc<PlainCipher> {
    Arc::new(PlainCipher)
}
