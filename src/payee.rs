// 🏷️ Payee normalization - stable cache keys from noisy bank descriptions

use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static PPD_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+PPD ID:\s*\d+$").unwrap());
static TRANSACTION_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+TRANSACTION#:\s*\d+.*$").unwrap());
static REFERENCE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+#?\d{6,}$").unwrap());
static CARD_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+(?:XXXX|\.\.\.)?\d{4}$").unwrap());
static TRAILING_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+\d{2}/\d{2}(?:/\d{2,4})?$").unwrap());

/// Normalize a transaction description into a payee key.
///
/// Uppercases, collapses whitespace, then strips one trailing reference of
/// each kind in order: PPD id, `TRANSACTION#:` tail, long reference number,
/// card suffix, date. Empty input gives an empty string.
pub fn normalize_payee(description: &str) -> String {
    let upper = description.trim().to_uppercase();
    if upper.is_empty() {
        return String::new();
    }

    let mut payee = WHITESPACE.replace_all(&upper, " ").into_owned();

    // Transaction# must go before the card-number strip eats its digits
    for pattern in [
        &*PPD_ID,
        &*TRANSACTION_REF,
        &*REFERENCE_NUMBER,
        &*CARD_SUFFIX,
        &*TRAILING_DATE,
    ] {
        payee = pattern.replace(&payee, "").into_owned();
    }

    payee.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uppercase_and_collapse() {
        assert_eq!(normalize_payee("  Whole   Foods\tMarket "), "WHOLE FOODS MARKET");
    }

    #[test]
    fn test_strips_ppd_id() {
        assert_eq!(
            normalize_payee("ACME PAYROLL PPD ID: 1234567890"),
            "ACME PAYROLL"
        );
    }

    #[test]
    fn test_strips_transaction_reference() {
        assert_eq!(
            normalize_payee("Zelle payment to Sam transaction#: 98765 extra text"),
            "ZELLE PAYMENT TO SAM"
        );
    }

    #[test]
    fn test_strips_card_suffix_and_reference() {
        assert_eq!(normalize_payee("AMAZON MKTPLACE XXXX1234"), "AMAZON MKTPLACE");
        assert_eq!(normalize_payee("SHELL OIL ...4321"), "SHELL OIL");
        assert_eq!(normalize_payee("UTILITY CO #12345678"), "UTILITY CO");
    }

    #[test]
    fn test_strips_trailing_date() {
        assert_eq!(normalize_payee("STARBUCKS 07/14"), "STARBUCKS");
        assert_eq!(normalize_payee("STARBUCKS 07/14/2024"), "STARBUCKS");
    }

    #[test]
    fn test_empty_and_idempotent() {
        assert_eq!(normalize_payee(""), "");
        assert_eq!(normalize_payee("   "), "");
        let once = normalize_payee("Rent Payment Online 01/02");
        assert_eq!(normalize_payee(&once), once);
    }
}
