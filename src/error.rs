// Ledger error model
// Typed failures for the library; the binary wraps them with anyhow

use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Unknown book, account, transaction, statement or import file
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// Balance reasoning needs exactly two splits
    #[error("transaction {transaction} must have exactly two splits, but has {count}")]
    InvalidSplitCount { transaction: String, count: usize },

    #[error("no corresponding split for account {account} in transaction {transaction}")]
    CorrespondingSplitNotFound { account: i64, transaction: String },

    #[error("transaction '{description}' is unbalanced: splits sum to {sum}")]
    Unbalanced { description: String, sum: Decimal },

    #[error("assigning parent {parent} to account {account} would create a cycle")]
    AccountCycle { account: i64, parent: i64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid archive path: {0}")]
    InvalidPath(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::NotFound { .. })
    }
}
