// 📒 Ledger data model
// Books own a chart of accounts and balanced two-split transactions.
//
// Balance is enforced when a NewTransaction is built, never checked afterwards:
// the only constructors produce exactly two splits that sum to zero.

use crate::error::{LedgerError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type BookId = i64;
pub type AccountId = i64;
pub type TransactionId = i64;
pub type SplitId = i64;
pub type ImportFileId = i64;
pub type StatementId = i64;

// ============================================================================
// BOOK & ACCOUNT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountType {
    Asset,
    Liability,
    Income,
    Expense,
    Equity,
    Root,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Asset => "ASSET",
            AccountType::Liability => "LIABILITY",
            AccountType::Income => "INCOME",
            AccountType::Expense => "EXPENSE",
            AccountType::Equity => "EQUITY",
            AccountType::Root => "ROOT",
        }
    }
}

impl FromStr for AccountType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ASSET" => Ok(AccountType::Asset),
            "LIABILITY" => Ok(AccountType::Liability),
            "INCOME" => Ok(AccountType::Income),
            "EXPENSE" => Ok(AccountType::Expense),
            "EQUITY" => Ok(AccountType::Equity),
            "ROOT" => Ok(AccountType::Root),
            other => Err(LedgerError::Parse(format!("unknown account type '{}'", other))),
        }
    }
}

/// One node of a book's chart of accounts.
///
/// Accounts form a tree through `parent_id`; the store validates every parent
/// assignment so the chain stays acyclic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub book_id: BookId,
    pub parent_id: Option<AccountId>,
    pub code: String,
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub account_type: AccountType,
    pub hidden: bool,
    pub placeholder: bool,
}

/// Attributes for a new account, before the store assigns an id
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub code: String,
    pub name: String,
    pub full_name: String,
    pub account_type: AccountType,
    pub parent_id: Option<AccountId>,
    pub description: Option<String>,
    pub hidden: bool,
    pub placeholder: bool,
}

impl NewAccount {
    pub fn new(code: &str, full_name: &str, account_type: AccountType) -> Self {
        let name = full_name.rsplit(':').next().unwrap_or(full_name).to_string();
        NewAccount {
            code: code.to_string(),
            name,
            full_name: full_name.to_string(),
            account_type,
            parent_id: None,
            description: None,
            hidden: false,
            placeholder: false,
        }
    }

    pub fn with_parent(mut self, parent_id: AccountId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn placeholder(mut self) -> Self {
        self.placeholder = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

// ============================================================================
// STATUS CODES (single-letter columns)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    Unmatched,
    Matched,
}

impl MatchStatus {
    pub fn code(&self) -> &'static str {
        match self {
            MatchStatus::Unmatched => "n",
            MatchStatus::Matched => "m",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "n" => Ok(MatchStatus::Unmatched),
            "m" => Ok(MatchStatus::Matched),
            other => Err(LedgerError::Parse(format!("unknown match status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileState {
    NotReconciled,
    Cleared,
    Reconciled,
}

impl ReconcileState {
    pub fn code(&self) -> &'static str {
        match self {
            ReconcileState::NotReconciled => "n",
            ReconcileState::Cleared => "c",
            ReconcileState::Reconciled => "r",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "n" => Ok(ReconcileState::NotReconciled),
            "c" => Ok(ReconcileState::Cleared),
            "r" => Ok(ReconcileState::Reconciled),
            other => Err(LedgerError::Parse(format!("unknown reconcile state '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementStatus {
    NotReconciled,
    Reconciled,
    Discrepancy,
}

impl StatementStatus {
    pub fn code(&self) -> &'static str {
        match self {
            StatementStatus::NotReconciled => "n",
            StatementStatus::Reconciled => "r",
            StatementStatus::Discrepancy => "d",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "n" => Ok(StatementStatus::NotReconciled),
            "r" => Ok(StatementStatus::Reconciled),
            "d" => Ok(StatementStatus::Discrepancy),
            other => Err(LedgerError::Parse(format!("unknown statement status '{}'", other))),
        }
    }
}

// ============================================================================
// TRANSACTIONS & SPLITS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub id: SplitId,
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    /// Positive = debit, negative = credit
    pub amount: Decimal,
    pub memo: Option<String>,
    pub reconcile_state: ReconcileState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub book_id: BookId,
    pub import_file_id: Option<ImportFileId>,
    pub date: NaiveDate,
    pub description: String,
    pub memo: Option<String>,
    pub payee_norm: Option<String>,
    pub match_status: MatchStatus,
    pub splits: Vec<Split>,
}

impl Transaction {
    /// Net amount posted to one account by this transaction
    pub fn amount_for(&self, account_id: AccountId) -> Decimal {
        self.splits
            .iter()
            .filter(|s| s.account_id == account_id)
            .map(|s| s.amount)
            .sum()
    }

    pub fn is_balanced(&self) -> bool {
        self.splits.iter().map(|s| s.amount).sum::<Decimal>().is_zero()
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} [{}]",
            self.id,
            self.date,
            self.description,
            self.match_status.code()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSplit {
    pub account_id: AccountId,
    pub amount: Decimal,
    pub memo: Option<String>,
}

impl NewSplit {
    pub fn new(account_id: AccountId, amount: Decimal) -> Self {
        NewSplit {
            account_id,
            amount,
            memo: None,
        }
    }
}

/// A balanced transaction that has not been persisted yet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTransaction {
    pub book_id: BookId,
    pub date: NaiveDate,
    pub description: String,
    pub memo: Option<String>,
    pub payee_norm: Option<String>,
    pub import_file_id: Option<ImportFileId>,
    splits: Vec<NewSplit>,
}

impl NewTransaction {
    /// Debit `debit` and credit `credit` by the same amount
    pub fn transfer(
        book_id: BookId,
        date: NaiveDate,
        description: &str,
        debit: AccountId,
        credit: AccountId,
        amount: Decimal,
    ) -> Self {
        NewTransaction {
            book_id,
            date,
            description: description.to_string(),
            memo: None,
            payee_norm: None,
            import_file_id: None,
            splits: vec![NewSplit::new(debit, amount), NewSplit::new(credit, -amount)],
        }
    }

    /// Build from explicit splits; exactly two that sum to zero
    pub fn from_splits(
        book_id: BookId,
        date: NaiveDate,
        description: &str,
        splits: Vec<NewSplit>,
    ) -> Result<Self> {
        if splits.len() != 2 {
            return Err(LedgerError::InvalidSplitCount {
                transaction: description.to_string(),
                count: splits.len(),
            });
        }

        let sum: Decimal = splits.iter().map(|s| s.amount).sum();
        if !sum.is_zero() {
            return Err(LedgerError::Unbalanced {
                description: description.to_string(),
                sum,
            });
        }

        Ok(NewTransaction {
            book_id,
            date,
            description: description.to_string(),
            memo: None,
            payee_norm: None,
            import_file_id: None,
            splits,
        })
    }

    pub fn with_memo(mut self, memo: Option<String>) -> Self {
        self.memo = memo;
        self
    }

    pub fn with_payee(mut self, payee_norm: Option<String>) -> Self {
        self.payee_norm = payee_norm;
        self
    }

    pub fn with_import_file(mut self, import_file_id: ImportFileId) -> Self {
        self.import_file_id = Some(import_file_id);
        self
    }

    pub fn splits(&self) -> &[NewSplit] {
        &self.splits
    }
}

/// Split access shared by persisted and pending transactions
pub trait Legs {
    /// (account, amount) of every split
    fn legs(&self) -> Vec<(AccountId, Decimal)>;

    fn date(&self) -> NaiveDate;

    fn description(&self) -> &str;

    /// Label used in error messages
    fn reference(&self) -> String;

    /// The account on the other side of `account_id`.
    ///
    /// Fails hard unless there are exactly two splits.
    fn corresponding_account(&self, account_id: AccountId) -> Result<AccountId> {
        let legs = self.legs();
        if legs.len() != 2 {
            return Err(LedgerError::InvalidSplitCount {
                transaction: self.reference(),
                count: legs.len(),
            });
        }

        legs.iter()
            .map(|(id, _)| *id)
            .find(|id| *id != account_id)
            .ok_or_else(|| LedgerError::CorrespondingSplitNotFound {
                account: account_id,
                transaction: self.reference(),
            })
    }
}

impl Legs for Transaction {
    fn legs(&self) -> Vec<(AccountId, Decimal)> {
        self.splits.iter().map(|s| (s.account_id, s.amount)).collect()
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn reference(&self) -> String {
        self.id.to_string()
    }
}

impl Legs for NewTransaction {
    fn legs(&self) -> Vec<(AccountId, Decimal)> {
        self.splits.iter().map(|s| (s.account_id, s.amount)).collect()
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn reference(&self) -> String {
        format!("'{}' on {}", self.description, self.date)
    }
}

// ============================================================================
// IMPORT FILES, CACHE, STATEMENTS
// ============================================================================

/// Record of one ingested source file, unique per (book, account, filename)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportFile {
    pub id: ImportFileId,
    pub book_id: BookId,
    pub account_id: AccountId,
    pub filename: String,
    pub source_path: Option<String>,
    pub archive_path: Option<String>,
    pub source_type: String,
    pub file_hash: String,
    pub coverage_start: Option<NaiveDate>,
    pub coverage_end: Option<NaiveDate>,
    pub row_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewImportFile {
    pub account_id: AccountId,
    pub filename: String,
    pub source_path: Option<String>,
    pub archive_path: Option<String>,
    pub source_type: String,
    pub file_hash: String,
    pub coverage_start: Option<NaiveDate>,
    pub coverage_end: Option<NaiveDate>,
    pub row_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCacheEntry {
    pub payee_norm: String,
    pub account_id: AccountId,
    pub hit_count: i64,
    pub last_seen_at: DateTime<Utc>,
}

/// One externally reported statement period for an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountStatement {
    pub id: StatementId,
    pub book_id: BookId,
    pub account_id: AccountId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_balance: Decimal,
    pub end_balance: Decimal,
    pub statement_path: Option<String>,
    pub reconcile_status: StatementStatus,
    pub computed_end_balance: Option<Decimal>,
    pub discrepancy: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct NewAccountStatement {
    pub account_id: AccountId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_balance: Decimal,
    pub end_balance: Decimal,
    pub statement_path: Option<String>,
}
