//! Shared enumerations and the timestamp type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wall-clock instant used for `created_at`, `updated_at` and `deleted_at`.
pub type Timestamp = DateTime<Utc>;

/// The six replicable aggregate types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// A single income or expense entry.
    Transaction,
    /// A transaction category.
    Category,
    /// A money account.
    Account,
    /// A monthly spending or income limit.
    Budget,
    /// A movement between two accounts.
    Transfer,
    /// A rule that generates transactions periodically.
    Recurring,
}

impl EntityType {
    /// All entity types, in persistence order.
    pub const ALL: [EntityType; 6] = [
        EntityType::Transaction,
        EntityType::Category,
        EntityType::Account,
        EntityType::Budget,
        EntityType::Transfer,
        EntityType::Recurring,
    ];

    /// Returns the stable wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Transaction => "transaction",
            EntityType::Category => "category",
            EntityType::Account => "account",
            EntityType::Budget => "budget",
            EntityType::Transfer => "transfer",
            EntityType::Recurring => "recurring",
        }
    }

    /// Returns the plural collection name used for local persistence keys.
    #[must_use]
    pub fn collection_name(&self) -> &'static str {
        match self {
            EntityType::Transaction => "transactions",
            EntityType::Category => "categories",
            EntityType::Account => "accounts",
            EntityType::Budget => "budgets",
            EntityType::Transfer => "transfers",
            EntityType::Recurring => "recurring",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown entity type: {s}"))
    }
}

/// Direction of a transaction, category, budget or recurring rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Money coming in.
    Income,
    /// Money going out.
    Expense,
}

/// Kind of money account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    /// Physical cash.
    Cash,
    /// Bank or debit account.
    Bank,
    /// Credit card.
    Credit,
}

/// Repetition period of a recurring rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Every day.
    Daily,
    /// Every week.
    Weekly,
    /// Every month.
    Monthly,
}
