// ⚙️ Configuration - environment variables with defaults

use crate::categorize::CategorizationEngine;
use crate::error::Result;
use crate::matching::MatchingEngine;
use crate::rules::{CategoryRules, MatchingRules};
use std::env;
use std::path::PathBuf;

pub const DB_PATH_VAR: &str = "LEDGER_DB_PATH";
pub const CATEGORY_RULES_VAR: &str = "LEDGER_CATEGORY_RULES_PATH";
pub const MATCHING_RULES_VAR: &str = "LEDGER_MATCHING_RULES_PATH";
pub const UNCATEGORIZED_VAR: &str = "LEDGER_UNCATEGORIZED_ACCOUNT";
pub const ARCHIVE_PATH_VAR: &str = "LEDGER_ARCHIVE_PATH";
pub const LOG_LEVEL_VAR: &str = "LEDGER_LOG_LEVEL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub db_path: PathBuf,
    pub category_rules_path: PathBuf,
    pub matching_rules_path: PathBuf,
    pub uncategorized_account: String,
    pub archive_path: PathBuf,
    pub log_level: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            db_path: PathBuf::from("ledger.db"),
            category_rules_path: PathBuf::from("etc/category-payee-lookup.json"),
            matching_rules_path: PathBuf::from("etc/matching-rules.json"),
            uncategorized_account: "Expenses:Uncategorized".to_string(),
            archive_path: PathBuf::from("archive"),
            log_level: "info".to_string(),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key → value source; unset or empty keys keep their default
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = LedgerConfig::default();

        LedgerConfig {
            db_path: get(DB_PATH_VAR).map(PathBuf::from).unwrap_or(defaults.db_path),
            category_rules_path: get(CATEGORY_RULES_VAR)
                .map(PathBuf::from)
                .unwrap_or(defaults.category_rules_path),
            matching_rules_path: get(MATCHING_RULES_VAR)
                .map(PathBuf::from)
                .unwrap_or(defaults.matching_rules_path),
            uncategorized_account: get(UNCATEGORIZED_VAR).unwrap_or(defaults.uncategorized_account),
            archive_path: get(ARCHIVE_PATH_VAR).map(PathBuf::from).unwrap_or(defaults.archive_path),
            log_level: get(LOG_LEVEL_VAR).unwrap_or(defaults.log_level),
        }
    }

    pub fn categorization_engine(&self) -> Result<CategorizationEngine> {
        let rules = CategoryRules::from_file(&self.category_rules_path)?;
        Ok(CategorizationEngine::new(rules, &self.uncategorized_account))
    }

    pub fn matching_engine(&self) -> Result<MatchingEngine> {
        Ok(MatchingEngine::new(MatchingRules::from_file(&self.matching_rules_path)?))
    }
}
