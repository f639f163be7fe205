// 🏷️ Rule Tables - Rules as Data
// Category rules (payee pattern → category account) and matching rules
// (source account → counter account → date window + description patterns).
// Both are parsed once into typed tables; nothing re-reads JSON at lookup time.

use crate::error::{LedgerError, Result};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

// ============================================================================
// CATEGORY RULES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Literal,
    Regex,
}

#[derive(Debug, Clone)]
pub struct CategoryPattern {
    pub source: String,
    pub kind: PatternKind,
    regex: Regex,
}

impl CategoryPattern {
    /// Case-insensitive pattern; literals are escaped first
    pub fn new(source: &str, kind: PatternKind) -> std::result::Result<Self, regex::Error> {
        let expr = match kind {
            PatternKind::Literal => regex::escape(source),
            PatternKind::Regex => source.to_string(),
        };
        let regex = RegexBuilder::new(&expr).case_insensitive(true).build()?;
        Ok(CategoryPattern {
            source: source.to_string(),
            kind,
            regex,
        })
    }

    /// Substring search anywhere in the payee
    pub fn matches(&self, payee: &str) -> bool {
        self.regex.is_match(payee)
    }
}

/// Payee → category lookup table, evaluated in file order
#[derive(Debug, Clone, Default)]
pub struct CategoryRules {
    categories: Vec<(String, Vec<CategoryPattern>)>,
}

impl CategoryRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file; a missing file gives an empty table
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "category rules file not found, no rules loaded");
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse `{category: [{"payee": ..., "type": "literal"|"regex"}]}`.
    ///
    /// A broken entry is logged and skipped; a broken document is an error.
    pub fn from_json(content: &str) -> Result<Self> {
        let doc: serde_json::Map<String, Value> = serde_json::from_str(content)
            .map_err(|e| LedgerError::Config(format!("category rules: {}", e)))?;

        let mut categories = Vec::with_capacity(doc.len());
        for (category, entries) in doc {
            let Some(entries) = entries.as_array() else {
                warn!(%category, "category rules: expected a list of patterns, skipping category");
                continue;
            };

            let mut patterns = Vec::with_capacity(entries.len());
            for entry in entries {
                match parse_category_entry(entry) {
                    Ok(pattern) => patterns.push(pattern),
                    Err(reason) => warn!(%category, %reason, "category rules: skipping entry"),
                }
            }
            categories.push((category, patterns));
        }

        let rules = CategoryRules { categories };
        debug!(
            categories = rules.categories.len(),
            patterns = rules.pattern_count(),
            "loaded category rules"
        );
        Ok(rules)
    }

    /// Append a category; later additions lose to earlier ones
    pub fn add(&mut self, category: &str, patterns: Vec<CategoryPattern>) {
        self.categories.push((category.to_string(), patterns));
    }

    /// First category (in file order) with a pattern found in `payee`
    pub fn find(&self, payee: &str) -> Option<&str> {
        if payee.is_empty() {
            return None;
        }
        self.categories
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| p.matches(payee)))
            .map(|(category, _)| category.as_str())
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|(c, _)| c.as_str())
    }

    pub fn pattern_count(&self) -> usize {
        self.categories.iter().map(|(_, p)| p.len()).sum()
    }
}

fn parse_category_entry(entry: &Value) -> std::result::Result<CategoryPattern, String> {
    let payee = entry
        .get("payee")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing 'payee'".to_string())?;

    let kind = match entry.get("type").and_then(Value::as_str).unwrap_or("literal") {
        "literal" => PatternKind::Literal,
        "regex" => PatternKind::Regex,
        other => return Err(format!("unknown pattern type '{}'", other)),
    };

    CategoryPattern::new(payee, kind).map_err(|e| format!("bad pattern '{}': {}", payee, e))
}

// ============================================================================
// MATCHING RULES
// ============================================================================

#[derive(Debug, Deserialize)]
struct MatchingRulesFile {
    matching_rules: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMatchRule {
    date_offset: u32,
    description_patterns: Vec<String>,
}

/// How an import on one account may pair with an existing entry against one counter account
#[derive(Debug, Clone)]
pub struct MatchRule {
    /// Maximum distance in days between the two dates
    pub date_offset: i64,
    /// Each anchored at the start of the description, case-sensitive
    pub description_patterns: Vec<Regex>,
}

impl MatchRule {
    pub fn new(date_offset: u32, patterns: &[&str]) -> Result<Self> {
        let description_patterns = patterns
            .iter()
            .map(|p| compile_prefix(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(MatchRule {
            date_offset: i64::from(date_offset),
            description_patterns,
        })
    }

    /// True if any pattern matches a prefix of `description`
    pub fn description_matches(&self, description: &str) -> bool {
        self.description_patterns
            .iter()
            .any(|p| p.is_match(description))
    }
}

fn parse_match_rule(raw: Value) -> std::result::Result<MatchRule, String> {
    let raw: RawMatchRule = serde_json::from_value(raw).map_err(|e| e.to_string())?;
    let patterns: Vec<&str> = raw.description_patterns.iter().map(String::as_str).collect();
    MatchRule::new(raw.date_offset, &patterns).map_err(|e| e.to_string())
}

fn compile_prefix(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})", pattern))
        .map_err(|e| LedgerError::Config(format!("matching rules: bad pattern '{}': {}", pattern, e)))
}

/// source account full name → counter account full name → rule
#[derive(Debug, Clone, Default)]
pub struct MatchingRules {
    rules: BTreeMap<String, BTreeMap<String, MatchRule>>,
}

impl MatchingRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file; a missing file gives no rules
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "matching rules file not found, no rules loaded");
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse `{"matching_rules": {account: {counter: {date_offset, description_patterns}}}}`.
    ///
    /// A broken rule (missing field, bad pattern) is logged and skipped so the
    /// rest still load; a broken document is an error.
    pub fn from_json(content: &str) -> Result<Self> {
        let file: MatchingRulesFile = serde_json::from_str(content)
            .map_err(|e| LedgerError::Config(format!("matching rules: {}", e)))?;

        let mut rules = MatchingRules::new();
        for (source, counters) in file.matching_rules {
            let Value::Object(counters) = counters else {
                warn!(%source, "matching rules: expected an object of counter accounts, skipping account");
                continue;
            };
            for (counter, raw) in counters {
                match parse_match_rule(raw) {
                    Ok(rule) => rules.insert(&source, &counter, rule),
                    Err(reason) => warn!(%source, %counter, %reason, "matching rules: skipping rule"),
                }
            }
        }
        Ok(rules)
    }

    pub fn insert(&mut self, source: &str, counter: &str, rule: MatchRule) {
        self.rules
            .entry(source.to_string())
            .or_default()
            .insert(counter.to_string(), rule);
    }

    /// Counter accounts with a rule under `source`, sorted
    pub fn matchable_accounts(&self, source: &str) -> Vec<String> {
        self.rules
            .get(source)
            .map(|counters| counters.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn rule(&self, source: &str, counter: &str) -> Option<&MatchRule> {
        self.rules.get(source)?.get(counter)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_literal_pattern_is_escaped_and_case_insensitive() {
        let pattern = CategoryPattern::new("AMAZON.COM", PatternKind::Literal).unwrap();
        assert!(pattern.matches("PURCHASE amazon.com MKTPLACE"));
        assert!(!pattern.matches("AMAZONXCOM"));
    }

    #[test]
    fn test_first_category_in_file_order_wins() {
        let rules = CategoryRules::from_json(
            r#"{
                "Expenses:Groceries": [{"payee": "WHOLE FOODS"}],
                "Expenses:Food": [{"payee": "FOODS", "type": "literal"}],
                "Expenses:Coffee": [{"payee": "^STAR", "type": "regex"}]
            }"#,
        )
        .unwrap();

        assert_eq!(rules.find("WHOLE FOODS MARKET"), Some("Expenses:Groceries"));
        assert_eq!(rules.find("JOES FOODS"), Some("Expenses:Food"));
        assert_eq!(rules.find("starbucks"), Some("Expenses:Coffee"));
        assert_eq!(rules.find("BUCKSTAR"), None);
        assert_eq!(rules.find(""), None);
        assert_eq!(
            rules.categories().collect::<Vec<_>>(),
            vec!["Expenses:Groceries", "Expenses:Food", "Expenses:Coffee"]
        );
    }

    #[test]
    fn test_malformed_category_entries_are_skipped() {
        let rules = CategoryRules::from_json(
            r#"{
                "Expenses:Rent": [
                    {"type": "literal"},
                    {"payee": "(unclosed", "type": "regex"},
                    {"payee": "X", "type": "glob"},
                    {"payee": "LANDLORD"}
                ],
                "Expenses:Broken": "not a list"
            }"#,
        )
        .unwrap();

        assert_eq!(rules.pattern_count(), 1);
        assert_eq!(rules.find("LANDLORD LLC"), Some("Expenses:Rent"));
    }

    #[test]
    fn test_missing_category_file_is_empty() {
        let rules = CategoryRules::from_file("/nonexistent/category-rules.json").unwrap();
        assert_eq!(rules.pattern_count(), 0);
    }

    #[test]
    fn test_matching_rules_load() {
        let rules = MatchingRules::from_json(
            r#"{"matching_rules": {
                "Assets:Checking": {
                    "Expenses:Rent": {"date_offset": 2, "description_patterns": ["RENT PAYMENT"]},
                    "Liabilities:Card": {"date_offset": 5, "description_patterns": ["CARD PMT", "AUTOPAY"]}
                }
            }}"#,
        )
        .unwrap();

        assert_eq!(
            rules.matchable_accounts("Assets:Checking"),
            vec!["Expenses:Rent".to_string(), "Liabilities:Card".to_string()]
        );
        assert!(rules.matchable_accounts("Assets:Savings").is_empty());

        let rent = rules.rule("Assets:Checking", "Expenses:Rent").unwrap();
        assert_eq!(rent.date_offset, 2);
        assert!(rent.description_matches("RENT PAYMENT"));
        assert!(rent.description_matches("RENT PAYMENT ONLINE"));
        // Prefix only, case-sensitive
        assert!(!rent.description_matches("ONLINE RENT PAYMENT"));
        assert!(!rent.description_matches("Rent Payment"));
    }

    #[test]
    fn test_broken_matching_rules_are_skipped() {
        let rules = MatchingRules::from_json(
            r#"{"matching_rules": {
                "Checking": {
                    "Rent": {"date_offset": 2, "description_patterns": ["RENT PAYMENT"]},
                    "Card": {"date_offset": 1, "description_patterns": ["(unclosed"]},
                    "Loan": {"description_patterns": ["LOAN"]}
                },
                "Savings": "not an object"
            }}"#,
        )
        .unwrap();

        assert_eq!(rules.matchable_accounts("Checking"), vec!["Rent".to_string()]);
        assert!(rules.rule("Checking", "Rent").unwrap().description_matches("RENT PAYMENT ONLINE"));
        assert!(rules.rule("Checking", "Card").is_none());
        assert!(rules.matchable_accounts("Savings").is_empty());
    }

    #[test]
    fn test_malformed_matching_document_is_error() {
        let err = MatchingRules::from_json(r#"{"rules": {}}"#).unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
        let err = MatchingRules::from_json("not json").unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
    }

    #[test]
    fn test_match_rule_bad_pattern_is_config_error() {
        let err = MatchRule::new(1, &["("]).unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
    }

    #[test]
    fn test_matching_rules_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"matching_rules": {{"A": {{"B": {{"date_offset": 0, "description_patterns": ["X"]}}}}}}}}"#
        )
        .unwrap();

        let rules = MatchingRules::from_file(file.path()).unwrap();
        assert!(rules.rule("A", "B").is_some());
        assert!(MatchingRules::from_file("/nonexistent/matching.json").unwrap().is_empty());
    }
}
