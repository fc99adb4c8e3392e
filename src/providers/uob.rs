//! UOB adapter.
//!
//! UOB reports direction via a DR/CR type field, dates day-first without a
//! time component, and pages transactions with an opaque continuation token
//! at 150 rows per call.

use chrono::{DateTime, NaiveDate, Utc};
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

const UOB_PRODUCTION_BASE: &str = "https://api.uobgroup.com";

const TX_PAGE_SIZE: usize = 150;
const TX_MAX_PAGES: usize = 60;

pub struct UobProvider {
    client_id: String,
    client_secret: SecretString,
    base_url: String,
    client: Client,
}

impl UobProvider {
    pub fn new(client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            base_url: UOB_PRODUCTION_BASE.to_string(),
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
    ) -> Result<UobTokenResponse, ProviderError> {
        let response = self
            .client
            .post(self.endpoint("/oauth2/v1/token"))
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
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
            .json::<UobTokenResponse>()
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
impl BankProvider for UobProvider {
    fn name(&self) -> Provider {
        Provider::Uob
    }

    fn authorization_url(&self, redirect_uri: &str, state: &str) -> String {
        build_authorize_url(
            &self.endpoint("/oauth2/v1/authorize"),
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", "personal.accounts personal.transactions"),
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
                ],
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
        let response: UobAccountsResponse = self
            .get_json("/personal/v2/accounts", access_token, &[])
            .await?;

        Ok(response
            .account_list
            .into_iter()
            .filter_map(|account| {
                let balance = match account.acct_balance.parse::<Decimal>() {
                    Ok(balance) => balance,
                    Err(_) => {
                        tracing::warn!(
                            account_no = %account.acct_no,
                            "Skipping UOB account with unparsable balance"
                        );
                        return None;
                    }
                };
                Some(FeedAccount {
                    account_number: account.acct_no,
                    account_type: map_account_type(&account.acct_type),
                    balance,
                    currency: account.ccy,
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
        let path = format!("/personal/v2/accounts/{account_number}/transactions");
        let mut transactions = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..TX_MAX_PAGES {
            let mut query = vec![
                ("fromDate", from.format("%d/%m/%Y").to_string()),
                ("toDate", to.format("%d/%m/%Y").to_string()),
                ("pageSize", TX_PAGE_SIZE.to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let response: UobTransactionsResponse =
                self.get_json(&path, access_token, &query).await?;

            transactions.extend(
                response
                    .transaction_list
                    .into_iter()
                    .filter_map(normalize_row),
            );

            match response.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(transactions),
            }
        }

        Err(ProviderError::Unknown(format!(
            "UOB transaction feed exceeded {TX_MAX_PAGES} pages"
        )))
    }
}

fn map_account_type(raw: &str) -> AccountType {
    match raw.to_ascii_uppercase().as_str() {
        "SAV" => AccountType::Savings,
        "CUR" => AccountType::Current,
        "FD" => AccountType::FixedDeposit,
        "FCY" => AccountType::ForeignCurrency,
        "CC" => AccountType::CreditCard,
        "LN" => AccountType::Loan,
        _ => AccountType::Current,
    }
}

fn normalize_row(row: UobTransaction) -> Option<FeedTransaction> {
    let amount = match row.txn_amount.parse::<Decimal>() {
        Ok(amount) => amount.abs(),
        Err(_) => {
            tracing::warn!(
                txn_ref = %row.txn_ref_no,
                "Skipping UOB transaction with unparsable amount"
            );
            return None;
        }
    };

    let direction = match row.txn_type.as_str() {
        "DR" => Direction::Debit,
        "CR" => Direction::Credit,
        other => {
            tracing::warn!(
                txn_ref = %row.txn_ref_no,
                txn_type = other,
                "Skipping UOB transaction with unknown type"
            );
            return None;
        }
    };

    // Feed carries dates only; pin rows to noon UTC so they stay inside the
    // requested day regardless of timezone arithmetic.
    let occurred_at = match NaiveDate::parse_from_str(&row.txn_date, "%d/%m/%Y") {
        Ok(date) => match date.and_hms_opt(12, 0, 0) {
            Some(noon) => DateTime::from_naive_utc_and_offset(noon, Utc),
            None => return None,
        },
        Err(_) => {
            tracing::warn!(
                txn_ref = %row.txn_ref_no,
                "Skipping UOB transaction with unparsable date"
            );
            return None;
        }
    };

    let description = clean_description(&row.txn_desc);
    let merchant = extract_merchant(&description);
    let running_balance = row
        .balance_after
        .and_then(|raw| raw.parse::<Decimal>().ok());

    Some(FeedTransaction {
        external_id: row.txn_ref_no,
        amount,
        direction,
        description,
        merchant,
        occurred_at,
        running_balance,
    })
}

#[derive(Debug, Deserialize)]
struct UobTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct UobAccountsResponse {
    #[serde(rename = "accountList")]
    account_list: Vec<UobAccount>,
}

#[derive(Debug, Deserialize)]
struct UobAccount {
    #[serde(rename = "acctNo")]
    acct_no: String,
    #[serde(rename = "acctType")]
    acct_type: String,
    #[serde(rename = "acctBalance")]
    acct_balance: String,
    ccy: String,
}

#[derive(Debug, Deserialize)]
struct UobTransactionsResponse {
    #[serde(rename = "transactionList")]
    transaction_list: Vec<UobTransaction>,
    #[serde(rename = "nextPageToken", default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UobTransaction {
    #[serde(rename = "txnRefNo")]
    txn_ref_no: String,
    #[serde(rename = "txnDate")]
    txn_date: String,
    #[serde(rename = "txnAmount")]
    txn_amount: String,
    #[serde(rename = "txnType")]
    txn_type: String,
    #[serde(rename = "txnDesc")]
    txn_desc: String,
    #[serde(rename = "balanceAfter", default)]
    balance_after: Option<String>,
}
