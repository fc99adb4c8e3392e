mod memory;

pub use memory::MemoryStorage;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{BankConnection, Direction, Id, Transaction};

/// Outcome of a keyed transaction upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Read-only transaction query. No provider call is ever made on this path.
#[derive(Debug, Clone)]
pub struct TransactionQuery {
    pub owner_id: Id,
    pub connection_id: Option<Id>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub direction: Option<Direction>,
    pub limit: usize,
    pub offset: usize,
}

impl TransactionQuery {
    pub fn for_owner(owner_id: Id) -> Self {
        Self {
            owner_id,
            connection_id: None,
            from: None,
            to: None,
            direction: None,
            limit: 50,
            offset: 0,
        }
    }

    pub fn with_connection(mut self, connection_id: Id) -> Self {
        self.connection_id = Some(connection_id);
        self
    }

    pub fn with_window(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

/// One page of stored transactions plus the total match count.
#[derive(Debug, Clone)]
pub struct TransactionPage {
    pub transactions: Vec<Transaction>,
    pub total: usize,
}

/// Persistence port for connections and transactions.
///
/// The store behind this trait is the single source of truth; the engine
/// never caches transaction data beyond the lifetime of one sync call.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    // Connections
    async fn list_active_connections(&self, owner_id: &Id) -> Result<Vec<BankConnection>>;
    async fn get_connection(&self, owner_id: &Id, id: &Id) -> Result<Option<BankConnection>>;
    /// Lookup by the (owner, provider, account number) uniqueness key.
    async fn find_connection(
        &self,
        owner_id: &Id,
        provider: crate::models::Provider,
        account_number: &str,
    ) -> Result<Option<BankConnection>>;
    async fn save_connection(&self, connection: &BankConnection) -> Result<()>;
    /// Delete a connection and everything it owns. Returns false when the
    /// connection did not exist.
    async fn delete_connection_cascade(&self, id: &Id) -> Result<bool>;

    // Transactions
    /// Insert-or-update keyed by (connection_id, external_id). Updates touch
    /// only the mutable fields of the stored row.
    async fn upsert_transaction(&self, tx: &Transaction) -> Result<UpsertOutcome>;
    async fn delete_transactions_for_connection(&self, connection_id: &Id) -> Result<usize>;
    async fn list_transactions(&self, query: &TransactionQuery) -> Result<TransactionPage>;
}
