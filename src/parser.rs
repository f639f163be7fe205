// 🏗️ Parser Framework
// Vendor formats are turned into canonical two-split records before they reach
// the ledger. Each format implements StatementParser; CsvParser reads the
// canonical CSV layout (Date,Description,Amount[,Memo]).

use crate::payee::normalize_payee;
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// CORE TYPES
// ============================================================================

/// One leg of a canonical record, addressed by account full name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSplit {
    pub account_name: String,
    pub amount: Decimal,
}

/// Output of StatementParser::parse: exactly two splits that net to zero
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub date: NaiveDate,
    pub description: String,
    pub payee_norm: Option<String>,
    pub memo: Option<String>,
    pub splits: [CanonicalSplit; 2],
}

impl CanonicalRecord {
    /// `source` moves by `amount`; the other side takes the opposite
    pub fn new(
        date: NaiveDate,
        description: &str,
        source: &str,
        counter: &str,
        amount: Decimal,
    ) -> Self {
        CanonicalRecord {
            date,
            description: description.to_string(),
            payee_norm: None,
            memo: None,
            splits: [
                CanonicalSplit {
                    account_name: source.to_string(),
                    amount,
                },
                CanonicalSplit {
                    account_name: counter.to_string(),
                    amount: -amount,
                },
            ],
        }
    }

    pub fn with_payee(mut self, payee_norm: String) -> Self {
        self.payee_norm = Some(payee_norm);
        self
    }

    pub fn with_memo(mut self, memo: String) -> Self {
        self.memo = Some(memo);
        self
    }

    /// The split that is not on `source`, if any
    pub fn counter_split_mut(&mut self, source: &str) -> Option<&mut CanonicalSplit> {
        self.splits.iter_mut().find(|s| s.account_name != source)
    }
}

/// StatementParser - the one interface every import format implements
pub trait StatementParser: Send + Sync {
    /// Parse raw file bytes into canonical records
    fn parse(&self, bytes: &[u8]) -> Result<Vec<CanonicalRecord>>;

    /// Short identifier stored on the import file ("csv", "qif", ...)
    fn source_type(&self) -> &str;
}

// ============================================================================
// CSV PARSER
// ============================================================================

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Canonical CSV: `Date,Description,Amount[,Memo]`.
///
/// Amount is the signed movement of the source account; the counter split
/// lands on the parking account until categorization moves it.
pub struct CsvParser {
    account: String,
    counter_account: String,
    date_format: String,
}

impl CsvParser {
    pub fn new(account: &str, counter_account: &str) -> Self {
        CsvParser {
            account: account.to_string(),
            counter_account: counter_account.to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }

    pub fn with_date_format(mut self, format: &str) -> Self {
        self.date_format = format.to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Description")]
    description: String,
    #[serde(rename = "Amount")]
    amount: String,
    #[serde(rename = "Memo", default)]
    memo: Option<String>,
}

impl StatementParser for CsvParser {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<CanonicalRecord>> {
        use csv::{ReaderBuilder, Trim};

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(Trim::All)
            .flexible(true)
            .from_reader(bytes);

        let mut records = Vec::new();
        for (idx, result) in reader.deserialize::<CsvRow>().enumerate() {
            // +2: 1-indexed plus header row
            let line = idx + 2;
            let row = result.with_context(|| format!("Failed to parse CSV line {}", line))?;

            let date = NaiveDate::parse_from_str(&row.date, &self.date_format)
                .with_context(|| format!("Bad date '{}' on line {}", row.date, line))?;
            let amount = parse_amount(&row.amount)
                .with_context(|| format!("Bad amount '{}' on line {}", row.amount, line))?;
            if row.description.is_empty() {
                bail!("Empty description on line {}", line);
            }

            let mut record =
                CanonicalRecord::new(date, &row.description, &self.account, &self.counter_account, amount)
                    .with_payee(normalize_payee(&row.description));
            if let Some(memo) = row.memo.filter(|m| !m.is_empty()) {
                record = record.with_memo(memo);
            }
            records.push(record);
        }

        Ok(records)
    }

    fn source_type(&self) -> &str {
        "csv"
    }
}

/// "-1,234.50", "$12.00", "(45.99)" → Decimal
fn parse_amount(raw: &str) -> Result<Decimal> {
    let cleaned: String = raw.chars().filter(|c| !matches!(c, '$' | ',' | ' ')).collect();
    let (negative, digits) = match cleaned.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, cleaned.as_str()),
    };
    let value = Decimal::from_str(digits)?;
    Ok(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn parser() -> CsvParser {
        CsvParser::new("Assets:Checking", "Expenses:Uncategorized")
    }

    #[test]
    fn test_parse_canonical_csv() {
        let csv = "Date,Description,Amount,Memo\n\
                   2024-01-02,RENT PAYMENT ONLINE,-500.00,January\n\
                   2024-01-05,Payroll PPD ID: 123456,\"2,000.00\",\n";
        let records = parser().parse(csv.as_bytes()).unwrap();

        assert_eq!(records.len(), 2);
        let rent = &records[0];
        assert_eq!(rent.date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(rent.splits[0].account_name, "Assets:Checking");
        assert_eq!(rent.splits[0].amount, dec!(-500.00));
        assert_eq!(rent.splits[1].account_name, "Expenses:Uncategorized");
        assert_eq!(rent.splits[1].amount, dec!(500.00));
        assert_eq!(rent.memo.as_deref(), Some("January"));

        let payroll = &records[1];
        assert_eq!(payroll.splits[0].amount, dec!(2000.00));
        assert_eq!(payroll.payee_norm.as_deref(), Some("PAYROLL"));
        assert_eq!(payroll.memo, None);
    }

    #[test]
    fn test_memo_column_is_optional() {
        let csv = "Date,Description,Amount\n2024-03-01,COFFEE,-3.50\n";
        let records = parser().parse(csv.as_bytes()).unwrap();
        assert_eq!(records[0].splits[1].amount, dec!(3.50));
    }

    #[test]
    fn test_custom_date_format() {
        let csv = "Date,Description,Amount\n03/01/2024,COFFEE,(3.50)\n";
        let records = parser()
            .with_date_format("%m/%d/%Y")
            .parse(csv.as_bytes())
            .unwrap();
        assert_eq!(records[0].date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(records[0].splits[0].amount, dec!(-3.50));
    }

    #[test]
    fn test_bad_rows_are_errors() {
        let bad_date = "Date,Description,Amount\n2024-13-01,X,1.00\n";
        assert!(parser().parse(bad_date.as_bytes()).is_err());

        let bad_amount = "Date,Description,Amount\n2024-01-01,X,abc\n";
        let err = parser().parse(bad_amount.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_counter_split_lookup() {
        let mut record = CanonicalRecord::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            "X",
            "Assets:Checking",
            "Expenses:Uncategorized",
            dec!(-1),
        );
        record.counter_split_mut("Assets:Checking").unwrap().account_name = "Expenses:Rent".to_string();
        assert_eq!(record.splits[1].account_name, "Expenses:Rent");
    }
}
