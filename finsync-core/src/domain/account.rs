//! Account domain model

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kind of financial account, as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Checking,
    Savings,
    Credit,
    Investment,
    Loan,
    #[serde(other)]
    Other,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Checking => "checking",
            AccountType::Savings => "savings",
            AccountType::Credit => "credit",
            AccountType::Investment => "investment",
            AccountType::Loan => "loan",
            AccountType::Other => "other",
        }
    }

    /// Parse a stored or wire value; anything unrecognised is `Other`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "checking" => AccountType::Checking,
            "savings" => AccountType::Savings,
            "credit" => AccountType::Credit,
            "investment" => AccountType::Investment,
            "loan" => AccountType::Loan,
            _ => AccountType::Other,
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A linked financial account
///
/// The backend owns every field except `last_synced_at`, which the sync
/// engine stamps when it commits the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub account_type: AccountType,
    pub balance: Decimal,
    /// ISO 4217 currency code, normalized to uppercase
    pub currency: String,
    pub is_active: bool,
    /// When the sync engine last committed this account
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Modification timestamp used for conflict resolution
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new active account with a zero balance
    pub fn new(id: impl Into<String>, name: impl Into<String>, account_type: AccountType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            account_type,
            balance: Decimal::ZERO,
            currency: "USD".to_string(),
            is_active: true,
            last_synced_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Credit lines and loans count against net worth
    pub fn is_liability(&self) -> bool {
        matches!(self.account_type, AccountType::Credit | AccountType::Loan)
    }

    /// Normalize currency code to uppercase
    pub fn normalize_currency(currency: &str) -> String {
        currency.trim().to_uppercase()
    }

    /// Validate account data
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.id.trim().is_empty() {
            return Err("account id cannot be empty");
        }
        if self.name.trim().is_empty() {
            return Err("account name cannot be empty");
        }
        if self.currency.trim().len() != 3 {
            return Err("currency must be a three letter code");
        }
        Ok(())
    }
}
