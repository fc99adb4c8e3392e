use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Id, Provider};

/// Normalized account type across providers.
///
/// Each adapter maps its own type vocabulary into this enum; nothing above
/// the adapter layer sees a provider-specific account type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Savings,
    Current,
    FixedDeposit,
    ForeignCurrency,
    CreditCard,
    Loan,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Savings => "savings",
            AccountType::Current => "current",
            AccountType::FixedDeposit => "fixed_deposit",
            AccountType::ForeignCurrency => "foreign_currency",
            AccountType::CreditCard => "credit_card",
            AccountType::Loan => "loan",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque encrypted token material.
///
/// The engine only ever moves ciphertext between the secrets port and the
/// storage port; `Debug` is redacted so token material cannot leak through
/// logging of a connection row.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ciphertext(String);

impl Ciphertext {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Ciphertext(..)")
    }
}

/// A user's authorized link to one account at one provider.
///
/// Exactly one row exists per (owner_id, provider, account_number); inactive
/// connections are never targeted by sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankConnection {
    pub id: Id,
    pub owner_id: Id,
    pub provider: Provider,
    /// Provider-assigned number of the primary account.
    pub account_number: String,
    pub account_type: AccountType,
    /// Balance snapshot of the primary account as of the last sync.
    pub balance: Decimal,
    pub currency: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    pub access_token: Ciphertext,
    pub refresh_token: Ciphertext,
}

impl BankConnection {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner_id: Id,
        provider: Provider,
        account_number: impl Into<String>,
        account_type: AccountType,
        created_at: DateTime<Utc>,
        access_token: Ciphertext,
        refresh_token: Ciphertext,
    ) -> Self {
        Self {
            id: Id::new(),
            owner_id,
            provider,
            account_number: account_number.into(),
            account_type,
            balance: Decimal::ZERO,
            currency: "SGD".to_string(),
            is_active: true,
            created_at,
            last_sync_at: None,
            access_token,
            refresh_token,
        }
    }

    pub fn with_id(mut self, id: Id) -> Self {
        self.id = id;
        self
    }

    pub fn with_balance(mut self, balance: Decimal, currency: impl Into<String>) -> Self {
        self.balance = balance;
        self.currency = currency.into();
        self
    }
}
