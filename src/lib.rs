// Bookkeeper - double-entry ledger core
// Exposes all modules for use in the CLI and tests

pub mod error;
pub mod config;
pub mod logging;
pub mod model;
pub mod db;
pub mod context;
pub mod payee;
pub mod rules;          // Category + matching rule tables
pub mod categorize;     // Cache → rules → fallback
pub mod matching;       // Match/import decisions against existing entries
pub mod transaction;    // Manual entry
pub mod parser;
pub mod archive;
pub mod ingest;         // File-level idempotent import
pub mod statement;
pub mod reconciliation;

// Re-export commonly used types
pub use error::{LedgerError, Result};
pub use config::LedgerConfig;
pub use model::{
    Account, AccountId, AccountStatement, AccountType, Book, BookId, ImportFile, Legs,
    MatchStatus, NewAccount, NewSplit, NewTransaction, Split, StatementStatus, Transaction,
};
pub use db::{open_database, setup_database, Event};
pub use context::BookContext;
pub use payee::normalize_payee;
pub use rules::{CategoryRules, MatchRule, MatchingRules};
pub use categorize::{CategorizationEngine, Categorization, CategorizeFilter, CategorizeReport, Source};
pub use matching::{MatchDecision, MatchReport, MatchingEngine};
pub use parser::{CanonicalRecord, CanonicalSplit, CsvParser, StatementParser};
pub use archive::ArchivePath;
pub use ingest::{IngestOutcome, IngestReport, IngestRequest, IngestService};
pub use statement::{StatementImportOutcome, StatementImportReport, StatementRecord, StatementService};
pub use reconciliation::{ReconciliationEngine, ReconciliationResult};
pub use transaction::TransactionService;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
