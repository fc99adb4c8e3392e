//! OCBC adapter.
//!
//! OCBC encodes direction in the amount's sign, wraps payloads in a `data`
//! envelope, timestamps rows with a naive local datetime, and pages with a
//! pageIndex/hasMore pair capped at 100 rows per call.

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::models::{AccountType, Direction, Provider};

use super::normalize::{clean_description, extract_merchant};
use super::{
    build_authorize_url, map_api_status, map_auth_status, map_transport, BankProvider,
    FeedAccount, FeedTransaction, TokenGrant,
};

const OCBC_PRODUCTION_BASE: &str = "https://api.ocbc.com";

const TX_PAGE_SIZE: usize = 100;
const TX_MAX_PAGES: usize = 100;

pub struct OcbcProvider {
    client_id: String,
    client_secret: SecretString,
    base_url: String,
    client: Client,
}

impl OcbcProvider {
    pub fn new(client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            base_url: OCBC_PRODUCTION_BASE.to_string(),
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
        body: &OcbcTokenRequest<'_>,
        is_auth_exchange: bool,
    ) -> Result<OcbcTokenResponse, ProviderError> {
        let response = self
            .client
            .post(self.endpoint("/ogw/oauth/token"))
            .json(body)
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
            .json::<OcbcTokenResponse>()
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
impl BankProvider for OcbcProvider {
    fn name(&self) -> Provider {
        Provider::Ocbc
    }

    fn authorization_url(&self, redirect_uri: &str, state: &str) -> String {
        build_authorize_url(
            &self.endpoint("/ogw/oauth/authorize"),
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", "transactional"),
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
                &OcbcTokenRequest {
                    grant_type: "authorization_code",
                    client_id: &self.client_id,
                    client_secret: self.client_secret.expose_secret(),
                    code: Some(authorization_code),
                    redirect_uri: Some(redirect_uri),
                    refresh_token: None,
                },
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
                &OcbcTokenRequest {
                    grant_type: "refresh_token",
                    client_id: &self.client_id,
                    client_secret: self.client_secret.expose_secret(),
                    code: None,
                    redirect_uri: None,
                    refresh_token: Some(refresh_token),
                },
                false,
            )
            .await?;

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
        let response: OcbcEnvelope<OcbcAccountList> = self
            .get_json("/transactional/v1/accounts", access_token, &[])
            .await?;

        Ok(response
            .data
            .accounts
            .into_iter()
            .map(|account| FeedAccount {
                account_type: map_account_type(&account.account_type),
                account_number: account.account_number,
                balance: account.available_balance,
                currency: account.currency,
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
        let mut transactions = Vec::new();

        for page_index in 0..TX_MAX_PAGES {
            let query = [
                ("accountNumber", account_number.to_string()),
                ("startDate", from.format("%Y-%m-%d").to_string()),
                ("endDate", to.format("%Y-%m-%d").to_string()),
                ("pageSize", TX_PAGE_SIZE.to_string()),
                ("pageIndex", page_index.to_string()),
            ];
            let response: OcbcEnvelope<OcbcTransactionList> = self
                .get_json("/transactional/v1/transactions", access_token, &query)
                .await?;

            transactions.extend(
                response
                    .data
                    .transactions
                    .into_iter()
                    .filter_map(normalize_row),
            );

            if !response.data.has_more {
                return Ok(transactions);
            }
        }

        Err(ProviderError::Unknown(format!(
            "OCBC transaction feed exceeded {TX_MAX_PAGES} pages"
        )))
    }
}

fn map_account_type(raw: &str) -> AccountType {
    let raw = raw.to_ascii_uppercase();
    if raw.contains("SAVING") {
        AccountType::Savings
    } else if raw.contains("CURRENT") || raw.contains("CHECKING") {
        AccountType::Current
    } else if raw.contains("FIXED") || raw.contains("TIME DEPOSIT") {
        AccountType::FixedDeposit
    } else if raw.contains("FOREIGN") {
        AccountType::ForeignCurrency
    } else if raw.contains("CARD") {
        AccountType::CreditCard
    } else if raw.contains("LOAN") {
        AccountType::Loan
    } else {
        AccountType::Current
    }
}

fn normalize_row(row: OcbcTransaction) -> Option<FeedTransaction> {
    let occurred_at =
        match NaiveDateTime::parse_from_str(&row.transaction_date, "%Y-%m-%d %H:%M:%S") {
            Ok(naive) => DateTime::from_naive_utc_and_offset(naive, Utc),
            Err(_) => {
                tracing::warn!(
                    transaction_id = %row.id,
                    "Skipping OCBC transaction with unparsable date"
                );
                return None;
            }
        };

    // Sign carries direction: negative is money out.
    let direction = if row.amount.is_sign_negative() {
        Direction::Debit
    } else {
        Direction::Credit
    };

    let description = clean_description(&row.narrative);
    let merchant = extract_merchant(&description);

    Some(FeedTransaction {
        external_id: row.id,
        amount: row.amount.abs(),
        direction,
        description,
        merchant,
        occurred_at,
        running_balance: row.balance,
    })
}

#[derive(Debug, Serialize)]
struct OcbcTokenRequest<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect_uri: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct OcbcTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct OcbcEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct OcbcAccountList {
    accounts: Vec<OcbcAccount>,
}

#[derive(Debug, Deserialize)]
struct OcbcAccount {
    #[serde(rename = "accountNumber")]
    account_number: String,
    #[serde(rename = "accountType")]
    account_type: String,
    #[serde(rename = "availableBalance")]
    available_balance: Decimal,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct OcbcTransactionList {
    transactions: Vec<OcbcTransaction>,
    #[serde(rename = "hasMore", default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct OcbcTransaction {
    id: String,
    #[serde(rename = "transactionDate")]
    transaction_date: String,
    /// Signed amount; negative means debit.
    amount: Decimal,
    narrative: String,
    #[serde(default)]
    balance: Option<Decimal>,
}
