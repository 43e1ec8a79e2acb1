//! Transaction domain model

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of money movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Debit,
    Credit,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Debit => "debit",
            TransactionType::Credit => "credit",
            TransactionType::Transfer => "transfer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "debit" => Some(TransactionType::Debit),
            "credit" => Some(TransactionType::Credit),
            "transfer" => Some(TransactionType::Transfer),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement status of a transaction
///
/// Backends disagree on naming: `cleared` is read as `Posted` and
/// `reconciled` as `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    #[serde(alias = "cleared")]
    Posted,
    #[serde(alias = "reconciled")]
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Posted => "posted",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Some(TransactionStatus::Pending),
            "posted" | "cleared" => Some(TransactionStatus::Posted),
            "cancelled" | "reconciled" => Some(TransactionStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single financial transaction belonging to an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub account_id: String,
    /// Signed amount; debits are negative
    pub amount: Decimal,
    pub description: String,
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    /// Modification timestamp used for conflict resolution
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a new pending transaction
    pub fn new(
        id: impl Into<String>,
        account_id: impl Into<String>,
        amount: Decimal,
        date: NaiveDate,
        transaction_type: TransactionType,
    ) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            amount,
            description: String::new(),
            date,
            transaction_type,
            status: TransactionStatus::Pending,
            updated_at: Utc::now(),
        }
    }

    /// Validate transaction data
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.id.trim().is_empty() {
            return Err("transaction id cannot be empty");
        }
        if self.account_id.trim().is_empty() {
            return Err("transaction must belong to an account");
        }
        Ok(())
    }
}

/// Query filter for local transactions
///
/// Every field is optional; an empty filter matches all transactions.
/// Date and amount bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFilter {
    pub account_id: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    /// Case-insensitive substring of the description
    pub search: Option<String>,
    pub types: Vec<TransactionType>,
    pub statuses: Vec<TransactionStatus>,
}

impl TransactionFilter {
    /// Filter matching every transaction
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter matching the transactions of one account
    pub fn for_account(account_id: impl Into<String>) -> Self {
        Self {
            account_id: Some(account_id.into()),
            ..Self::default()
        }
    }

    pub fn between(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    pub fn with_statuses(mut self, statuses: &[TransactionStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn with_types(mut self, types: &[TransactionType]) -> Self {
        self.types = types.to_vec();
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Evaluate the filter against a transaction in memory
    pub fn matches(&self, tx: &Transaction) -> bool {
        if let Some(account_id) = &self.account_id {
            if &tx.account_id != account_id {
                return false;
            }
        }
        if self.start_date.is_some_and(|start| tx.date < start) {
            return false;
        }
        if self.end_date.is_some_and(|end| tx.date > end) {
            return false;
        }
        if self.min_amount.is_some_and(|min| tx.amount < min) {
            return false;
        }
        if self.max_amount.is_some_and(|max| tx.amount > max) {
            return false;
        }
        if let Some(search) = &self.search {
            if !tx
                .description
                .to_lowercase()
                .contains(&search.to_lowercase())
            {
                return false;
            }
        }
        if !self.types.is_empty() && !self.types.contains(&tx.transaction_type) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&tx.status) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(amount: i64, day: u32) -> Transaction {
        let mut tx = Transaction::new(
            format!("tx-{}", day),
            "acc-1",
            Decimal::new(amount, 2),
            NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            TransactionType::Debit,
        );
        tx.description = "Corner Coffee Shop".to_string();
        tx
    }

    #[test]
    fn test_status_aliases() {
        let status: TransactionStatus = serde_json::from_str("\"cleared\"").unwrap();
        assert_eq!(status, TransactionStatus::Posted);
        let status: TransactionStatus = serde_json::from_str("\"reconciled\"").unwrap();
        assert_eq!(status, TransactionStatus::Cancelled);
        assert_eq!(TransactionStatus::parse("CLEARED"), Some(TransactionStatus::Posted));
        assert_eq!(TransactionStatus::parse("void"), None);
    }

    #[test]
    fn test_type_serializes_as_type_field() {
        let tx = sample(-4250, 1);
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "debit");
        assert_eq!(json["status"], "pending");
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = TransactionFilter::all();
        assert!(filter.is_empty());
        assert!(filter.matches(&sample(-100, 1)));
    }

    #[test]
    fn test_filter_bounds_are_inclusive() {
        let start = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let filter = TransactionFilter::all().between(start, end);

        assert!(!filter.matches(&sample(-100, 4)));
        assert!(filter.matches(&sample(-100, 5)));
        assert!(filter.matches(&sample(-100, 10)));
        assert!(!filter.matches(&sample(-100, 11)));

        let filter = TransactionFilter {
            min_amount: Some(Decimal::new(-5000, 2)),
            max_amount: Some(Decimal::ZERO),
            ..TransactionFilter::default()
        };
        assert!(filter.matches(&sample(-5000, 1)));
        assert!(!filter.matches(&sample(-5001, 1)));
        assert!(!filter.matches(&sample(1, 1)));
    }

    #[test]
    fn test_filter_search_and_enums() {
        let tx = sample(-100, 1);

        let filter = TransactionFilter {
            search: Some("coffee".to_string()),
            ..TransactionFilter::default()
        };
        assert!(filter.matches(&tx));

        let filter = TransactionFilter::for_account("acc-2");
        assert!(!filter.matches(&tx));

        let filter = TransactionFilter::all().with_statuses(&[TransactionStatus::Posted]);
        assert!(!filter.matches(&tx));

        let filter = TransactionFilter::all()
            .with_types(&[TransactionType::Debit, TransactionType::Transfer]);
        assert!(filter.matches(&tx));
    }
}
