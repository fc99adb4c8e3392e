//! Reconciliation: merge a fetched batch into stored state without
//! duplicates, assigning each transaction a spending category.
//!
//! Reconciliation commits per transaction, not per batch; one malformed row
//! in a 200-row page is recorded as an error string and the rest of the
//! batch still lands.

use std::sync::Arc;

use crate::models::{BankConnection, Category, Transaction};
use crate::providers::FeedTransaction;
use crate::storage::{Storage, UpsertOutcome};

struct Rule {
    category: Category,
    /// Substring patterns against the lower-cased description.
    substrings: &'static [&'static str],
    /// Exact word tokens, for short codes that would over-match as
    /// substrings ("erp" inside "enterprise").
    words: &'static [&'static str],
}

/// Ordered, first-match-wins. Wallet tokens come before the PHV operator
/// tokens because "grabpay" contains "grab"; everything else runs most
/// specific to least, with Other as the unconditional fallback.
const RULES: &[Rule] = &[
    Rule {
        category: Category::DigitalPayment,
        substrings: &["grabpay", "paynow", "paylah", "shopeepay"],
        words: &[],
    },
    Rule {
        category: Category::PhvEarning,
        substrings: &["grab", "gojek", "tada", "ryde", "comfortdelgro"],
        words: &["cdg"],
    },
    Rule {
        category: Category::Fuel,
        substrings: &["shell", "esso", "caltex", "sinopec", "petrol", "fuel"],
        words: &["spc"],
    },
    Rule {
        category: Category::VehicleMaintenance,
        substrings: &["workshop", "servicing", "repair", "tyre", "service"],
        words: &[],
    },
    Rule {
        category: Category::Insurance,
        substrings: &["insurance", "assurance", "takaful"],
        words: &[],
    },
    Rule {
        category: Category::Transport,
        substrings: &["parking", "carpark", "ezlink", "ez-link", "toll"],
        words: &["erp", "lta"],
    },
];

/// Assign a category from the cleaned description. Total: unmatched text
/// falls through to [`Category::Other`], never an error.
pub fn categorize(description: &str) -> Category {
    let lowered = description.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    for rule in RULES {
        if rule.substrings.iter().any(|p| lowered.contains(p))
            || rule.words.iter().any(|w| tokens.contains(w))
        {
            return rule.category;
        }
    }
    Category::Other
}

/// Counts and per-row errors for one merged batch.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub added: u32,
    pub updated: u32,
    pub errors: Vec<String>,
}

pub struct Reconciler {
    storage: Arc<dyn Storage>,
}

impl Reconciler {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Merge one provider batch for one connection.
    ///
    /// Insert-or-update keyed by (connection_id, external_id); a repeated
    /// sighting updates the mutable fields only. Zero-amount rows are
    /// recorded like any other, and rows outside the requested window are
    /// accepted as-is (the adapter's date parameters are trusted).
    pub async fn merge(
        &self,
        connection: &BankConnection,
        batch: &[FeedTransaction],
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        for feed in batch {
            let tx = Transaction::new(
                connection.id.clone(),
                &feed.external_id,
                feed.amount,
                feed.direction,
                &feed.description,
                feed.occurred_at,
            )
            .with_merchant(feed.merchant.clone())
            .with_category(categorize(&feed.description))
            .with_running_balance(feed.running_balance);

            match self.storage.upsert_transaction(&tx).await {
                Ok(UpsertOutcome::Inserted) => outcome.added += 1,
                Ok(UpsertOutcome::Updated) => outcome.updated += 1,
                Err(err) => {
                    tracing::warn!(
                        connection_id = %connection.id,
                        external_id = %feed.external_id,
                        error = %err,
                        "Failed to persist transaction; continuing with batch"
                    );
                    outcome
                        .errors
                        .push(format!("transaction {}: {err:#}", feed.external_id));
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountType, Ciphertext, Direction, Id, Provider};
    use crate::storage::MemoryStorage;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    #[test]
    fn categorization_is_deterministic() {
        assert_eq!(categorize("GRAB *RIDE SG"), Category::PhvEarning);
        assert_eq!(categorize("SHELL PETROL STATION"), Category::Fuel);
        assert_eq!(categorize("ACME WORKSHOP SERVICE"), Category::VehicleMaintenance);
        assert_eq!(categorize("NTUC FAIRPRICE GROCERIES"), Category::Other);
    }

    #[test]
    fn wallet_tokens_win_over_phv_tokens() {
        assert_eq!(categorize("GRABPAY TOPUP"), Category::DigitalPayment);
        assert_eq!(categorize("PAYNOW TO LIM AH SENG"), Category::DigitalPayment);
    }

    #[test]
    fn short_codes_match_as_words_not_substrings() {
        assert_eq!(categorize("ERP GANTRY CBD"), Category::Transport);
        assert_eq!(categorize("ACME ENTERPRISE PTE LTD"), Category::Other);
    }

    #[test]
    fn insurance_and_transport_rules() {
        assert_eq!(categorize("NTUC INCOME INSURANCE PREM"), Category::Insurance);
        assert_eq!(categorize("WILSON PARKING ORCHARD"), Category::Transport);
    }

    fn connection() -> BankConnection {
        BankConnection::new(
            Id::from_string("owner-1"),
            Provider::Dbs,
            "001-1",
            AccountType::Savings,
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            Ciphertext::new("a"),
            Ciphertext::new("r"),
        )
    }

    fn feed(external_id: &str, amount: Decimal, description: &str) -> FeedTransaction {
        FeedTransaction {
            external_id: external_id.to_string(),
            amount,
            direction: Direction::Debit,
            description: description.to_string(),
            merchant: None,
            occurred_at: Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
            running_balance: None,
        }
    }

    #[tokio::test]
    async fn merging_twice_is_idempotent() {
        let storage = Arc::new(MemoryStorage::new());
        let reconciler = Reconciler::new(storage.clone());
        let connection = connection();
        storage.save_connection(&connection).await.unwrap();

        let batch = vec![
            feed("ext-1", Decimal::new(1580, 2), "SHELL TAMPINES"),
            feed("ext-2", Decimal::new(5200, 2), "GRAB *RIDE"),
        ];

        let first = reconciler.merge(&connection, &batch).await;
        assert_eq!((first.added, first.updated), (2, 0));
        assert!(first.errors.is_empty());

        let second = reconciler.merge(&connection, &batch).await;
        assert_eq!((second.added, second.updated), (0, 2));
        assert_eq!(storage.transaction_count(&connection.id).await, 2);
    }

    #[tokio::test]
    async fn zero_amount_rows_are_recorded() {
        let storage = Arc::new(MemoryStorage::new());
        let reconciler = Reconciler::new(storage.clone());
        let connection = connection();
        storage.save_connection(&connection).await.unwrap();

        let outcome = reconciler
            .merge(&connection, &[feed("ext-0", Decimal::ZERO, "FEE REVERSAL")])
            .await;
        assert_eq!(outcome.added, 1);
        assert_eq!(storage.transaction_count(&connection.id).await, 1);
    }
}
