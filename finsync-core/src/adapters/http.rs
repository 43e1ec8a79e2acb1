//! HTTP remote gateway
//!
//! Talks to the finance backend over JSON:
//! - `GET {base}/accounts`
//! - `GET {base}/transactions[?since=<RFC 3339>]`
//!
//! Requests carry the access token as a bearer header. The gateway performs
//! exactly one request per call; retrying is the coordinator's job.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, error};
use url::Url;

use crate::config::SyncSettings;
use crate::domain::result::GatewayError;
use crate::domain::{Account, AccountType, Transaction, TransactionStatus, TransactionType};
use crate::ports::RemoteGateway;

// =============================================================================
// Wire models
// =============================================================================

/// Body of a list endpoint: a bare array or an object wrapping it
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListBody<T> {
    Bare(Vec<T>),
    Accounts { accounts: Vec<T> },
    Transactions { transactions: Vec<T> },
}

impl<T> ListBody<T> {
    fn into_items(self) -> Vec<T> {
        match self {
            ListBody::Bare(items) => items,
            ListBody::Accounts { accounts } => accounts,
            ListBody::Transactions { transactions } => transactions,
        }
    }
}

/// Account as returned by the backend
#[derive(Debug, Clone, Deserialize)]
struct RemoteAccount {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
    name: String,
    #[serde(default, rename = "type", alias = "account_type", alias = "accountType")]
    account_type: Option<String>,
    #[serde(deserialize_with = "deserialize_amount")]
    balance: Decimal,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default = "default_active", alias = "isActive")]
    is_active: bool,
    #[serde(alias = "updatedAt")]
    updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl RemoteAccount {
    fn into_account(self) -> Result<Account, GatewayError> {
        let account = Account {
            id: self.id,
            name: self.name,
            account_type: self
                .account_type
                .as_deref()
                .map(AccountType::parse)
                .unwrap_or(AccountType::Other),
            balance: self.balance,
            currency: Account::normalize_currency(self.currency.as_deref().unwrap_or("USD")),
            is_active: self.is_active,
            last_synced_at: None,
            updated_at: self.updated_at,
        };
        account
            .validate()
            .map_err(|e| GatewayError::malformed(format!("account {}: {}", account.id, e)))?;
        Ok(account)
    }
}

/// Transaction as returned by the backend
#[derive(Debug, Clone, Deserialize)]
struct RemoteTransaction {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
    #[serde(alias = "accountId", deserialize_with = "deserialize_id")]
    account_id: String,
    #[serde(deserialize_with = "deserialize_amount")]
    amount: Decimal,
    #[serde(default)]
    description: Option<String>,
    /// `YYYY-MM-DD`, or a full timestamp whose date part is used
    date: String,
    #[serde(rename = "type", alias = "transaction_type", alias = "transactionType")]
    transaction_type: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(alias = "updatedAt")]
    updated_at: DateTime<Utc>,
}

impl RemoteTransaction {
    fn into_transaction(self) -> Result<Transaction, GatewayError> {
        let date = parse_date(&self.date).ok_or_else(|| {
            GatewayError::malformed(format!("transaction {}: invalid date '{}'", self.id, self.date))
        })?;
        let transaction_type = TransactionType::parse(&self.transaction_type).ok_or_else(|| {
            GatewayError::malformed(format!(
                "transaction {}: unknown type '{}'",
                self.id, self.transaction_type
            ))
        })?;
        let status = match self.status.as_deref() {
            None => TransactionStatus::Pending,
            Some(raw) => TransactionStatus::parse(raw).ok_or_else(|| {
                GatewayError::malformed(format!("transaction {}: unknown status '{}'", self.id, raw))
            })?,
        };

        let tx = Transaction {
            id: self.id,
            account_id: self.account_id,
            amount: self.amount,
            description: self.description.unwrap_or_default(),
            date,
            transaction_type,
            status,
            updated_at: self.updated_at,
        };
        tx.validate()
            .map_err(|e| GatewayError::malformed(format!("transaction {}: {}", tx.id, e)))?;
        Ok(tx)
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

/// Deserialize ID that can be number or string
fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: JsonValue = Deserialize::deserialize(deserializer)?;
    match value {
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::String(s) => Ok(s),
        _ => Err(D::Error::custom("expected number or string for id")),
    }
}

/// Deserialize amount that can be number or string
fn deserialize_amount<'de, D>(deserializer: D) -> std::result::Result<Decimal, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: JsonValue = Deserialize::deserialize(deserializer)?;
    let text = match value {
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s,
        _ => return Err(D::Error::custom("expected number or string for amount")),
    };
    text.trim()
        .parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(text.trim()))
        .map_err(|e| D::Error::custom(format!("invalid decimal '{}': {}", text, e)))
}

// =============================================================================
// Gateway
// =============================================================================

/// Remote gateway backed by reqwest
pub struct HttpGateway {
    base_url: Url,
    access_token: String,
    client: Client,
}

impl HttpGateway {
    pub fn new(base_url: &str, access_token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let mut base_url =
            Url::parse(base_url).with_context(|| format!("Invalid base URL: {}", base_url))?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            bail!("Base URL must use http or https, got '{}'", base_url.scheme());
        }
        // Url::join drops the last path segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url,
            access_token: access_token.into(),
            client,
        })
    }

    /// Build a gateway from the `sync` settings section
    pub fn from_settings(settings: &SyncSettings) -> Result<Self> {
        let base_url = settings
            .base_url
            .as_deref()
            .context("No backend URL configured (set sync.baseUrl or FINSYNC_BASE_URL)")?;
        Self::new(
            base_url,
            settings.access_token.clone().unwrap_or_default(),
            Duration::from_secs(settings.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path)
            .map_err(|e| GatewayError::malformed(format!("invalid endpoint {}: {}", path, e)))
    }

    /// Perform one GET and decode the list body
    async fn get_list<T: DeserializeOwned>(&self, url: Url) -> Result<Vec<T>, GatewayError> {
        debug!(url = %url, "GET");
        let mut request = self.client.get(url.clone());
        if !self.access_token.is_empty() {
            request = request.bearer_auth(&self.access_token);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GatewayError::Unauthorized);
        }
        if !status.is_success() {
            return Err(GatewayError::ServerError(status.as_u16()));
        }

        let body = response.text().await.map_err(map_transport_error)?;
        let list: ListBody<T> = serde_json::from_str(&body).map_err(|e| {
            error!(url = %url, error = %e, "undecodable response body");
            GatewayError::malformed(e.to_string())
        })?;
        Ok(list.into_items())
    }
}

fn map_transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_decode() {
        GatewayError::malformed(err.to_string())
    } else {
        // Connect, timeout and mid-body failures are all connectivity problems
        GatewayError::NetworkUnreachable(err.to_string())
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn fetch_accounts(&self) -> Result<Vec<Account>, GatewayError> {
        let url = self.endpoint("accounts")?;
        let remote: Vec<RemoteAccount> = self.get_list(url).await?;
        remote.into_iter().map(RemoteAccount::into_account).collect()
    }

    async fn fetch_transactions(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Transaction>, GatewayError> {
        let mut url = self.endpoint("transactions")?;
        if let Some(since) = since {
            url.query_pairs_mut()
                .append_pair("since", &since.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        let remote: Vec<RemoteTransaction> = self.get_list(url).await?;
        remote
            .into_iter()
            .map(RemoteTransaction::into_transaction)
            .collect()
    }
}
