//! DBS adapter.
//!
//! DBS reports direction via an explicit debit/credit indicator, amounts as
//! decimal strings, and pages transactions with a limit/offset pair capped
//! at 200 rows per call.

use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::models::{AccountType, Direction, Provider};

use super::normalize::{clean_description, extract_merchant};
use super::{
    build_authorize_url, map_api_status, map_auth_status, map_transport, BankProvider,
    FeedAccount, FeedTransaction, TokenGrant,
};

const DBS_PRODUCTION_BASE: &str = "https://api.dbs.com.sg";

const TX_PAGE_SIZE: usize = 200;
const TX_MAX_PAGES: usize = 50;

pub struct DbsProvider {
    client_id: String,
    client_secret: SecretString,
    base_url: String,
    client: Client,
}

impl DbsProvider {
    pub fn new(client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            base_url: DBS_PRODUCTION_BASE.to_string(),
            client: Client::new(),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        let provider = Self::new(
            config.client_id.clone(),
            SecretString::new(config.client_secret.clone().into()),
        );
        match &config.base_url {
            Some(base_url) => provider.with_base_url(base_url.clone()),
            None => provider,
        }
    }

    /// Override API base URL (used by tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn token_exchange(
        &self,
        params: &[(&str, &str)],
        is_auth_exchange: bool,
    ) -> Result<DbsTokenResponse, ProviderError> {
        let response = self
            .client
            .post(self.endpoint("/oauth2/token"))
            .form(params)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(if is_auth_exchange {
                map_auth_status(status)
            } else {
                map_api_status(status)
            });
        }

        response
            .json::<DbsTokenResponse>()
            .await
            .map_err(|err| ProviderError::Unknown(format!("malformed token response: {err}")))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        access_token: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(self.endpoint(path))
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(map_api_status(status));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| ProviderError::Unknown(format!("malformed response: {err}")))
    }
}

#[async_trait::async_trait]
impl BankProvider for DbsProvider {
    fn name(&self) -> Provider {
        Provider::Dbs
    }

    fn authorization_url(&self, redirect_uri: &str, state: &str) -> String {
        build_authorize_url(
            &self.endpoint("/oauth2/authorize"),
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", "accounts transactions"),
                ("state", state),
            ],
        )
    }

    async fn authenticate(
        &self,
        authorization_code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ProviderError> {
        let response = self
            .token_exchange(
                &[
                    ("grant_type", "authorization_code"),
                    ("code", authorization_code),
                    ("redirect_uri", redirect_uri),
                    ("client_id", &self.client_id),
                    ("client_secret", self.client_secret.expose_secret()),
                ],
                true,
            )
            .await?;

        Ok(TokenGrant {
            access_token: SecretString::new(response.access_token.into()),
            refresh_token: response
                .refresh_token
                .map(|t| SecretString::new(t.into())),
            expires_in: response.expires_in,
        })
    }

    async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenGrant, ProviderError> {
        let response = self
            .token_exchange(
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                    ("client_id", &self.client_id),
                    ("client_secret", self.client_secret.expose_secret()),
                ],
                false,
            )
            .await?;

        // DBS rotates refresh tokens only sometimes; keep the old one when
        // the response omits a replacement.
        let rotated = response
            .refresh_token
            .unwrap_or_else(|| refresh_token.to_string());

        Ok(TokenGrant {
            access_token: SecretString::new(response.access_token.into()),
            refresh_token: Some(SecretString::new(rotated.into())),
            expires_in: response.expires_in,
        })
    }

    async fn get_accounts(&self, access_token: &str) -> Result<Vec<FeedAccount>, ProviderError> {
        let response: DbsAccountsResponse =
            self.get_json("/v1/accounts", access_token, &[]).await?;

        Ok(response
            .accounts
            .into_iter()
            .filter_map(|account| {
                let balance = match account.account_balance.parse::<Decimal>() {
                    Ok(balance) => balance,
                    Err(_) => {
                        tracing::warn!(
                            account_no = %account.account_no,
                            "Skipping DBS account with unparsable balance"
                        );
                        return None;
                    }
                };
                Some(FeedAccount {
                    account_number: account.account_no,
                    account_type: map_account_type(&account.product_type),
                    balance,
                    currency: account.currency_code,
                })
            })
            .collect())
    }

    async fn get_transactions(
        &self,
        access_token: &str,
        account_number: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<FeedTransaction>, ProviderError> {
        let path = format!("/v1/accounts/{account_number}/transactions");
        let mut transactions = Vec::new();

        for page in 0..TX_MAX_PAGES {
            let query = [
                ("fromDate", from.format("%Y-%m-%d").to_string()),
                ("toDate", to.format("%Y-%m-%d").to_string()),
                ("limit", TX_PAGE_SIZE.to_string()),
                ("offset", (page * TX_PAGE_SIZE).to_string()),
            ];
            let response: DbsTransactionsResponse =
                self.get_json(&path, access_token, &query).await?;

            let fetched = response.transactions.len();
            transactions.extend(response.transactions.into_iter().filter_map(normalize_row));

            if fetched < TX_PAGE_SIZE {
                return Ok(transactions);
            }
        }

        Err(ProviderError::Unknown(format!(
            "DBS transaction feed exceeded {TX_MAX_PAGES} pages"
        )))
    }
}

fn map_account_type(product_type: &str) -> AccountType {
    match product_type.to_ascii_uppercase().as_str() {
        "SAVINGS" => AccountType::Savings,
        "CURRENT" => AccountType::Current,
        "FIXED DEPOSIT" | "FD" => AccountType::FixedDeposit,
        "FOREIGN CURRENCY" | "FCY" => AccountType::ForeignCurrency,
        "CREDIT CARD" => AccountType::CreditCard,
        "LOAN" => AccountType::Loan,
        _ => AccountType::Current,
    }
}

fn normalize_row(row: DbsTransaction) -> Option<FeedTransaction> {
    let amount = match row.amount.parse::<Decimal>() {
        Ok(amount) => amount.abs(),
        Err(_) => {
            tracing::warn!(
                transaction_id = %row.transaction_id,
                "Skipping DBS transaction with unparsable amount"
            );
            return None;
        }
    };

    let direction = match row.dr_cr_indicator.as_str() {
        "D" => Direction::Debit,
        "C" => Direction::Credit,
        other => {
            tracing::warn!(
                transaction_id = %row.transaction_id,
                indicator = other,
                "Skipping DBS transaction with unknown direction indicator"
            );
            return None;
        }
    };

    let occurred_at = match DateTime::parse_from_rfc3339(&row.transaction_timestamp) {
        Ok(parsed) => parsed.with_timezone(&Utc),
        Err(_) => {
            tracing::warn!(
                transaction_id = %row.transaction_id,
                "Skipping DBS transaction with unparsable timestamp"
            );
            return None;
        }
    };

    let description = clean_description(&row.description);
    let merchant = extract_merchant(&description);
    let running_balance = row
        .running_balance
        .and_then(|raw| raw.parse::<Decimal>().ok());

    Some(FeedTransaction {
        external_id: row.transaction_id,
        amount,
        direction,
        description,
        merchant,
        occurred_at,
        running_balance,
    })
}

#[derive(Debug, Deserialize)]
struct DbsTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct DbsAccountsResponse {
    accounts: Vec<DbsAccount>,
}

#[derive(Debug, Deserialize)]
struct DbsAccount {
    #[serde(rename = "accountNo")]
    account_no: String,
    #[serde(rename = "productType")]
    product_type: String,
    #[serde(rename = "accountBalance")]
    account_balance: String,
    #[serde(rename = "currencyCode")]
    currency_code: String,
}

#[derive(Debug, Deserialize)]
struct DbsTransactionsResponse {
    transactions: Vec<DbsTransaction>,
}

#[derive(Debug, Deserialize)]
struct DbsTransaction {
    #[serde(rename = "transactionId")]
    transaction_id: String,
    #[serde(rename = "transactionTimestamp")]
    transaction_timestamp: String,
    amount: String,
    #[serde(rename = "drCrIndicator")]
    dr_cr_indicator: String,
    description: String,
    #[serde(rename = "runningBalance", default)]
    running_balance: Option<String>,
}
