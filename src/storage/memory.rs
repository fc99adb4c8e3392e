//! In-memory storage implementation for tests and embedded use.

use std::collections::HashMap;

use anyhow::Result;
use tokio::sync::Mutex;

use crate::models::{BankConnection, Id, Provider, Transaction};

use super::{Storage, TransactionPage, TransactionQuery, UpsertOutcome};

pub struct MemoryStorage {
    connections: Mutex<HashMap<Id, BankConnection>>,
    /// Transactions grouped by owning connection.
    transactions: Mutex<HashMap<Id, Vec<Transaction>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Total stored transaction count, for invariant checks in tests.
    pub async fn transaction_count(&self, connection_id: &Id) -> usize {
        let txns = self.transactions.lock().await;
        txns.get(connection_id).map(Vec::len).unwrap_or(0)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn list_active_connections(&self, owner_id: &Id) -> Result<Vec<BankConnection>> {
        let conns = self.connections.lock().await;
        let mut active: Vec<BankConnection> = conns
            .values()
            .filter(|c| &c.owner_id == owner_id && c.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(active)
    }

    async fn get_connection(&self, owner_id: &Id, id: &Id) -> Result<Option<BankConnection>> {
        let conns = self.connections.lock().await;
        Ok(conns
            .get(id)
            .filter(|c| &c.owner_id == owner_id)
            .cloned())
    }

    async fn find_connection(
        &self,
        owner_id: &Id,
        provider: Provider,
        account_number: &str,
    ) -> Result<Option<BankConnection>> {
        let conns = self.connections.lock().await;
        Ok(conns
            .values()
            .find(|c| {
                &c.owner_id == owner_id
                    && c.provider == provider
                    && c.account_number == account_number
            })
            .cloned())
    }

    async fn save_connection(&self, connection: &BankConnection) -> Result<()> {
        let mut conns = self.connections.lock().await;
        conns.insert(connection.id.clone(), connection.clone());
        Ok(())
    }

    async fn delete_connection_cascade(&self, id: &Id) -> Result<bool> {
        let mut conns = self.connections.lock().await;
        let mut txns = self.transactions.lock().await;
        txns.remove(id);
        Ok(conns.remove(id).is_some())
    }

    async fn upsert_transaction(&self, tx: &Transaction) -> Result<UpsertOutcome> {
        let mut txns = self.transactions.lock().await;
        let rows = txns.entry(tx.connection_id.clone()).or_default();

        match rows.iter_mut().find(|t| t.external_id == tx.external_id) {
            Some(existing) => {
                existing.apply_update(tx);
                Ok(UpsertOutcome::Updated)
            }
            None => {
                rows.push(tx.clone());
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn delete_transactions_for_connection(&self, connection_id: &Id) -> Result<usize> {
        let mut txns = self.transactions.lock().await;
        Ok(txns.remove(connection_id).map(|rows| rows.len()).unwrap_or(0))
    }

    async fn list_transactions(&self, query: &TransactionQuery) -> Result<TransactionPage> {
        let conns = self.connections.lock().await;
        let owned: Vec<Id> = conns
            .values()
            .filter(|c| c.owner_id == query.owner_id)
            .filter(|c| {
                query
                    .connection_id
                    .as_ref()
                    .map(|id| &c.id == id)
                    .unwrap_or(true)
            })
            .map(|c| c.id.clone())
            .collect();
        drop(conns);

        let txns = self.transactions.lock().await;
        let mut matched: Vec<Transaction> = owned
            .iter()
            .flat_map(|id| txns.get(id).cloned().unwrap_or_default())
            .filter(|t| query.from.map(|from| t.occurred_at >= from).unwrap_or(true))
            .filter(|t| query.to.map(|to| t.occurred_at <= to).unwrap_or(true))
            .filter(|t| {
                query
                    .direction
                    .map(|d| t.direction == d)
                    .unwrap_or(true)
            })
            .collect();

        // Newest first, external id as a stable tiebreak.
        matched.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| a.external_id.cmp(&b.external_id))
        });

        let total = matched.len();
        let page = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();

        Ok(TransactionPage {
            transactions: page,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountType, Ciphertext, Direction};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn connection(owner: &str) -> BankConnection {
        BankConnection::new(
            Id::from_string(owner),
            Provider::Dbs,
            "001-1",
            AccountType::Savings,
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            Ciphertext::new("a"),
            Ciphertext::new("r"),
        )
    }

    fn tx(conn: &Id, external_id: &str, day: u32) -> Transaction {
        Transaction::new(
            conn.clone(),
            external_id,
            Decimal::new(500, 2),
            Direction::Debit,
            "TEST",
            Utc.with_ymd_and_hms(2026, 2, day, 12, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn upsert_inserts_then_updates() -> Result<()> {
        let storage = MemoryStorage::new();
        let conn = connection("owner-1");
        storage.save_connection(&conn).await?;

        let first = tx(&conn.id, "ext-1", 1);
        assert_eq!(
            storage.upsert_transaction(&first).await?,
            UpsertOutcome::Inserted
        );

        let mut second = tx(&conn.id, "ext-1", 1);
        second.amount = Decimal::new(750, 2);
        assert_eq!(
            storage.upsert_transaction(&second).await?,
            UpsertOutcome::Updated
        );

        assert_eq!(storage.transaction_count(&conn.id).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn cascade_delete_removes_transactions() -> Result<()> {
        let storage = MemoryStorage::new();
        let conn = connection("owner-1");
        storage.save_connection(&conn).await?;
        storage.upsert_transaction(&tx(&conn.id, "ext-1", 1)).await?;
        storage.upsert_transaction(&tx(&conn.id, "ext-2", 2)).await?;

        assert!(storage.delete_connection_cascade(&conn.id).await?);
        assert_eq!(storage.transaction_count(&conn.id).await, 0);
        assert!(storage
            .get_connection(&conn.owner_id, &conn.id)
            .await?
            .is_none());
        Ok(())
    }

    #[tokio::test]
    async fn list_transactions_filters_and_pages() -> Result<()> {
        let storage = MemoryStorage::new();
        let conn = connection("owner-1");
        storage.save_connection(&conn).await?;
        for day in 1..=5 {
            storage
                .upsert_transaction(&tx(&conn.id, &format!("ext-{day}"), day))
                .await?;
        }

        let query = TransactionQuery::for_owner(conn.owner_id.clone()).with_page(2, 1);
        let page = storage.list_transactions(&query).await?;
        assert_eq!(page.total, 5);
        assert_eq!(page.transactions.len(), 2);
        // Newest first with offset 1: days 4 and 3.
        assert_eq!(page.transactions[0].external_id, "ext-4");
        assert_eq!(page.transactions[1].external_id, "ext-3");
        Ok(())
    }

    #[tokio::test]
    async fn list_transactions_excludes_other_owners() -> Result<()> {
        let storage = MemoryStorage::new();
        let mine = connection("owner-1");
        let theirs = connection("owner-2");
        storage.save_connection(&mine).await?;
        storage.save_connection(&theirs).await?;
        storage.upsert_transaction(&tx(&theirs.id, "ext-1", 1)).await?;

        let page = storage
            .list_transactions(&TransactionQuery::for_owner(mine.owner_id.clone()))
            .await?;
        assert_eq!(page.total, 0);
        Ok(())
    }
}
