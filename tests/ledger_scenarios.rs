// End-to-end ledger scenarios over a file-backed database:
// matching vs. importing, reconciliation outcomes, and ingestion idempotency.

use bookkeeper::{
    db, AccountStatement, AccountType, BookContext, CategorizationEngine, CategoryRules, CsvParser,
    IngestOutcome, IngestRequest, IngestService, MatchRule, MatchStatus, MatchingEngine, MatchingRules,
    NewAccount, NewTransaction, ReconciliationEngine, StatementImportOutcome, StatementRecord,
    StatementService, StatementStatus,
};
use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

struct Ledger {
    _dir: TempDir,
    conn: Connection,
}

/// Book "b" with Checking (asset), Rent (expense), Salary (income) and the parking account
fn ledger() -> Ledger {
    let dir = tempfile::tempdir().unwrap();
    let conn = db::open_database(&dir.path().join("ledger.db")).unwrap();
    let book = db::create_book(&conn, "b").unwrap();
    for (code, name, ty) in [
        ("1000", "Checking", AccountType::Asset),
        ("4000", "Salary", AccountType::Income),
        ("5000", "Rent", AccountType::Expense),
        ("5999", "Expenses:Uncategorized", AccountType::Expense),
    ] {
        db::create_account(&conn, book.id, &NewAccount::new(code, name, ty)).unwrap();
    }
    Ledger { _dir: dir, conn }
}

fn account_id(conn: &Connection, full_name: &str) -> i64 {
    let book = db::require_book(conn, "b").unwrap();
    db::require_account(conn, book.id, full_name).unwrap().id
}

fn book_id(conn: &Connection) -> i64 {
    db::require_book(conn, "b").unwrap().id
}

/// Manual entry: debit Rent 500.00 / credit Checking 500.00 on 2024-01-01
fn manual_rent(conn: &Connection) -> i64 {
    let txn = NewTransaction::transfer(
        book_id(conn),
        date(2024, 1, 1),
        "Rent Payment",
        account_id(conn, "Rent"),
        account_id(conn, "Checking"),
        dec!(500.00),
    );
    db::insert_transaction(conn, &txn).unwrap()
}

fn engines(with_rule: bool) -> (CategorizationEngine, MatchingEngine) {
    let category = CategoryRules::from_json(r#"{"Rent": [{"payee": "RENT PAYMENT"}]}"#).unwrap();
    let mut matching = MatchingRules::new();
    if with_rule {
        matching.insert("Checking", "Rent", MatchRule::new(2, &["RENT PAYMENT"]).unwrap());
    }
    (
        CategorizationEngine::new(category, "Expenses:Uncategorized"),
        MatchingEngine::new(matching),
    )
}

const RENT_CSV: &str = "Date,Description,Amount\n2024-01-02,RENT PAYMENT ONLINE,-500.00\n";

fn ingest(conn: &mut Connection, engines: &(CategorizationEngine, MatchingEngine), request: &IngestRequest) -> bookkeeper::IngestReport {
    let (categorizer, matcher) = engines;
    let service = IngestService::new(categorizer, matcher);
    let parser = CsvParser::new("Checking", "Expenses:Uncategorized");
    BookContext::run(conn, "b", |ctx| service.ingest(ctx, request, &parser)).unwrap()
}

/// Checking statement for January 2024: 1000.00 → 1500.00
fn january_statement(conn: &mut Connection) -> AccountStatement {
    let record = StatementRecord {
        account_slug: "Checking".to_string(),
        start_date: date(2024, 1, 1),
        end_date: date(2024, 1, 31),
        start_balance: dec!(1000.00),
        end_balance: dec!(1500.00),
        source_path: None,
    };
    let report = BookContext::run(conn, "b", |ctx| StatementService::import_statement(ctx, &record)).unwrap();
    assert_eq!(report.outcome, StatementImportOutcome::Imported);
    report.statement
}

fn deposit(conn: &Connection, day: u32, amount: Decimal) {
    let txn = NewTransaction::transfer(
        book_id(conn),
        date(2024, 1, day),
        "Payroll",
        account_id(conn, "Checking"),
        account_id(conn, "Salary"),
        amount,
    );
    db::insert_transaction(conn, &txn).unwrap();
}

#[test]
fn scenario_a_import_matches_existing_entry() {
    let mut ledger = ledger();
    let manual = manual_rent(&ledger.conn);
    let engines = engines(true);

    let request = IngestRequest::new("Checking", "jan.csv", RENT_CSV.as_bytes().to_vec());
    let report = ingest(&mut ledger.conn, &engines, &request);

    assert_eq!(report.outcome, IngestOutcome::Imported);
    assert_eq!(report.matched, 1);
    assert_eq!(report.imported, 0);
    assert_eq!(db::count_transactions(&ledger.conn, book_id(&ledger.conn)).unwrap(), 1);
    let existing = db::require_transaction(&ledger.conn, manual).unwrap();
    assert_eq!(existing.match_status, MatchStatus::Matched);
}

#[test]
fn scenario_b_without_rule_imports() {
    let mut ledger = ledger();
    let manual = manual_rent(&ledger.conn);
    let engines = engines(false);

    let request = IngestRequest::new("Checking", "jan.csv", RENT_CSV.as_bytes().to_vec());
    let report = ingest(&mut ledger.conn, &engines, &request);

    assert_eq!(report.imported, 1);
    assert_eq!(report.matched, 0);
    assert_eq!(db::count_transactions(&ledger.conn, book_id(&ledger.conn)).unwrap(), 2);
    let existing = db::require_transaction(&ledger.conn, manual).unwrap();
    assert_eq!(existing.match_status, MatchStatus::Unmatched);

    // Every stored transaction balances
    for txn in db::list_transactions(&ledger.conn, book_id(&ledger.conn)).unwrap() {
        assert!(txn.is_balanced(), "{} is unbalanced", txn);
    }
}

#[test]
fn scenario_c_statement_reconciles() {
    let mut ledger = ledger();
    deposit(&ledger.conn, 5, dec!(300.00));
    deposit(&ledger.conn, 20, dec!(200.00));
    let statement = january_statement(&mut ledger.conn);

    let result =
        BookContext::run(&mut ledger.conn, "b", |ctx| ReconciliationEngine::reconcile_statement(ctx, statement.id))
            .unwrap();

    assert!(result.matches);
    assert_eq!(result.computed_end_balance, dec!(1500.00));
    assert_eq!(result.discrepancy, dec!(0.00));
    assert_eq!(result.statement.reconcile_status, StatementStatus::Reconciled);

    let stored = db::require_account_statement(&ledger.conn, statement.id).unwrap();
    assert_eq!(stored.reconcile_status, StatementStatus::Reconciled);
}

#[test]
fn scenario_d_statement_discrepancy() {
    let mut ledger = ledger();
    deposit(&ledger.conn, 5, dec!(400.00));
    let statement = january_statement(&mut ledger.conn);

    let result =
        BookContext::run(&mut ledger.conn, "b", |ctx| ReconciliationEngine::reconcile_statement(ctx, statement.id))
            .unwrap();

    assert!(!result.matches);
    assert_eq!(result.discrepancy, dec!(-100.00));
    assert_eq!(result.statement.reconcile_status, StatementStatus::Discrepancy);

    // Reconciling again changes nothing
    let again =
        BookContext::run(&mut ledger.conn, "b", |ctx| ReconciliationEngine::reconcile_statement(ctx, statement.id))
            .unwrap();
    assert_eq!(again.statement, result.statement);
}

#[test]
fn reingesting_same_file_is_skipped() {
    let mut ledger = ledger();
    let engines = engines(false);
    let request = IngestRequest::new("Checking", "jan.csv", RENT_CSV.as_bytes().to_vec());

    let first = ingest(&mut ledger.conn, &engines, &request);
    let count = db::count_transactions(&ledger.conn, book_id(&ledger.conn)).unwrap();

    let second = ingest(&mut ledger.conn, &engines, &request);
    assert_eq!(second.outcome, IngestOutcome::SkippedDuplicate);
    assert_eq!(second.import_file_id, first.import_file_id);
    assert_eq!(second.imported, 0);
    assert_eq!(db::count_transactions(&ledger.conn, book_id(&ledger.conn)).unwrap(), count);
    assert_eq!(db::list_import_files(&ledger.conn, book_id(&ledger.conn)).unwrap().len(), 1);
}

#[test]
fn same_name_different_content_is_hash_mismatch() {
    let mut ledger = ledger();
    let engines = engines(false);
    let first = IngestRequest::new("Checking", "jan.csv", RENT_CSV.as_bytes().to_vec());
    ingest(&mut ledger.conn, &engines, &first);
    let count = db::count_transactions(&ledger.conn, book_id(&ledger.conn)).unwrap();

    let changed = format!("{}2024-01-03,COFFEE,-3.50\n", RENT_CSV);
    let second = IngestRequest::new("Checking", "jan.csv", changed.into_bytes());
    let report = ingest(&mut ledger.conn, &engines, &second);

    assert_eq!(report.outcome, IngestOutcome::HashMismatch);
    assert_eq!(db::count_transactions(&ledger.conn, book_id(&ledger.conn)).unwrap(), count);
    let files = db::list_import_files(&ledger.conn, book_id(&ledger.conn)).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_hash, bookkeeper::ingest::file_hash(RENT_CSV.as_bytes()));
}

#[test]
fn failed_ingest_rolls_back_everything() {
    let mut ledger = ledger();
    let engines = engines(false);
    let (categorizer, matcher) = &engines;
    let service = IngestService::new(categorizer, matcher);
    // Counter account does not exist in the book
    let parser = CsvParser::new("Checking", "Expenses:Nowhere");
    let request = IngestRequest::new("Checking", "feb.csv", b"Date,Description,Amount\n2024-02-01,MYSTERY,-1.00\n".to_vec());

    let result = BookContext::run(&mut ledger.conn, "b", |ctx| service.ingest(ctx, &request, &parser));
    assert!(result.unwrap_err().is_not_found());

    assert_eq!(db::count_transactions(&ledger.conn, book_id(&ledger.conn)).unwrap(), 0);
    assert!(db::list_import_files(&ledger.conn, book_id(&ledger.conn)).unwrap().is_empty());
}
