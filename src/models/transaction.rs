use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Debit => "debit",
            Direction::Credit => "credit",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spending category assigned by the reconciliation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    PhvEarning,
    Fuel,
    VehicleMaintenance,
    Insurance,
    Transport,
    DigitalPayment,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::PhvEarning => "phv_earning",
            Category::Fuel => "fuel",
            Category::VehicleMaintenance => "vehicle_maintenance",
            Category::Insurance => "insurance",
            Category::Transport => "transport",
            Category::DigitalPayment => "digital_payment",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored bank transaction.
///
/// (connection_id, external_id) is the dedup key: a later sync that sees the
/// same external id updates the mutable fields instead of inserting a second
/// row. external_id, connection_id, and occurred_at are never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Id,
    pub connection_id: Id,
    /// Provider-assigned transaction identifier, unique within a connection.
    pub external_id: String,
    /// Unsigned magnitude; sign lives in `direction`.
    pub amount: Decimal,
    pub direction: Direction,
    /// Cleaned provider description.
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,
    pub category: Category,
    pub occurred_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running_balance: Option<Decimal>,
}

impl Transaction {
    pub fn new(
        connection_id: Id,
        external_id: impl Into<String>,
        amount: Decimal,
        direction: Direction,
        description: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let external_id = external_id.into();
        let id = Id::from_external(&format!("{connection_id}:{external_id}"));
        Self {
            id,
            connection_id,
            external_id,
            amount,
            direction,
            description: description.into(),
            merchant: None,
            category: Category::Other,
            occurred_at,
            running_balance: None,
        }
    }

    pub fn with_merchant(mut self, merchant: Option<String>) -> Self {
        self.merchant = merchant;
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_running_balance(mut self, balance: Option<Decimal>) -> Self {
        self.running_balance = balance;
        self
    }

    /// Apply the mutable fields of a newer sighting of the same transaction.
    pub fn apply_update(&mut self, update: &Transaction) {
        self.amount = update.amount;
        self.direction = update.direction;
        self.description = update.description.clone();
        self.merchant = update.merchant.clone();
        self.category = update.category;
        self.running_balance = update.running_balance;
    }
}
