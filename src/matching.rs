// 🔗 Matching Engine - pair imported transactions with ones already in the ledger
// A transfer between two of our own accounts shows up in both accounts' exports.
// The second import must flag the existing entry instead of booking it twice.

use crate::db::{self, Event};
use crate::error::Result;
use crate::model::{Account, AccountId, BookId, ImportFileId, Legs, NewTransaction, Transaction};
use crate::rules::MatchingRules;
use chrono::{Duration, NaiveDate};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// Candidates are fetched this many days either side of the batch's date range
pub const CANDIDATE_WINDOW_DAYS: i64 = 1;

/// Account id → full name, for resolving rule keys
pub type AccountNames = HashMap<AccountId, String>;

/// What to do with one imported transaction
#[derive(Debug, Clone, PartialEq)]
pub enum MatchDecision {
    /// `existing` already records this movement; flag it, keep `imported` out of the ledger
    Match {
        existing: Transaction,
        imported: NewTransaction,
    },
    /// No counterpart; insert as a new transaction
    Import(NewTransaction),
}

impl MatchDecision {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchDecision::Match { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchReport {
    pub imported: usize,
    pub matched: usize,
}

pub struct MatchingEngine {
    rules: MatchingRules,
}

impl MatchingEngine {
    pub fn new(rules: MatchingRules) -> Self {
        MatchingEngine { rules }
    }

    pub fn rules(&self) -> &MatchingRules {
        &self.rules
    }

    /// Does `candidate` already record the movement `imported` brings into `source`?
    ///
    /// All of: identical (account, amount) split multisets, a description
    /// pattern configured for the counter account matching the start of the
    /// candidate's description (or, failing that, of the imported one), and
    /// dates within that rule's offset. Patterns are case-sensitive.
    pub fn is_match<T: Legs>(
        &self,
        source: &Account,
        imported: &T,
        candidate: &Transaction,
        names: &AccountNames,
    ) -> Result<bool> {
        if !same_splits(&imported.legs(), &candidate.legs()) {
            return Ok(false);
        }

        let counter_id = imported.corresponding_account(source.id)?;
        let Some(rule) = names
            .get(&counter_id)
            .and_then(|counter| self.rules.rule(&source.full_name, counter))
        else {
            return Ok(false);
        };

        // Manual entries are often typed in a different case than the bank
        // prints, so the imported description may satisfy the pattern instead
        if !rule.description_matches(&candidate.description)
            && !rule.description_matches(imported.description())
        {
            return Ok(false);
        }

        let days = (imported.date() - candidate.date).num_days().abs();
        Ok(days <= rule.date_offset)
    }

    /// Classify a batch imported into `source`, in input order.
    ///
    /// Candidates are fetched once for the whole batch. A candidate claimed by
    /// one import is out of the pool for the rest of the batch.
    pub fn match_transactions(
        &self,
        conn: &Connection,
        book_id: BookId,
        source: &Account,
        imports: Vec<NewTransaction>,
    ) -> Result<Vec<MatchDecision>> {
        let matchable = self.rules.matchable_accounts(&source.full_name);
        let Some((start, end)) = candidate_window(&imports).filter(|_| !matchable.is_empty()) else {
            debug!(account = %source.full_name, "no matching rules, importing everything");
            return Ok(imports.into_iter().map(MatchDecision::Import).collect());
        };

        let mut pool = db::query_unmatched_in_range(conn, book_id, start, end, &matchable)?;
        debug!(
            account = %source.full_name,
            %start,
            %end,
            candidates = pool.len(),
            "fetched match candidates"
        );

        let names: AccountNames = db::list_accounts(conn, book_id)?
            .into_iter()
            .map(|a| (a.id, a.full_name))
            .collect();

        let mut decisions = Vec::with_capacity(imports.len());
        for imported in imports {
            let mut claimed = None;
            for (idx, candidate) in pool.iter().enumerate() {
                if self.is_match(source, &imported, candidate, &names)? {
                    claimed = Some(idx);
                    break;
                }
            }

            match claimed {
                Some(idx) => {
                    let existing = pool.remove(idx);
                    debug!(existing = %existing, imported = %imported.description, "matched");
                    decisions.push(MatchDecision::Match { existing, imported });
                }
                None => decisions.push(MatchDecision::Import(imported)),
            }
        }

        Ok(decisions)
    }

    /// Persist decisions: flag matches, insert imports (tagged with the import file if any)
    pub fn apply_decisions(
        &self,
        conn: &Connection,
        decisions: Vec<MatchDecision>,
        import_file_id: Option<ImportFileId>,
    ) -> Result<MatchReport> {
        let mut report = MatchReport::default();

        for decision in decisions {
            match decision {
                MatchDecision::Match { existing, .. } => {
                    db::mark_transaction_matched(conn, existing.book_id, existing.id)?;
                    db::insert_event(
                        conn,
                        &Event::new(
                            "transaction_matched",
                            "transaction",
                            existing.id,
                            serde_json::json!({ "import_file_id": import_file_id }),
                            "matching_engine",
                        ),
                    )?;
                    report.matched += 1;
                }
                MatchDecision::Import(txn) => {
                    let txn = match import_file_id {
                        Some(id) => txn.with_import_file(id),
                        None => txn,
                    };
                    let txn_id = db::insert_transaction(conn, &txn)?;
                    db::insert_event(
                        conn,
                        &Event::new(
                            "transaction_imported",
                            "transaction",
                            txn_id,
                            serde_json::json!({
                                "import_file_id": import_file_id,
                                "date": txn.date,
                                "description": txn.description,
                            }),
                            "matching_engine",
                        ),
                    )?;
                    report.imported += 1;
                }
            }
        }

        info!(imported = report.imported, matched = report.matched, "applied match decisions");
        Ok(report)
    }

    /// Classify and persist in one go
    pub fn import_transactions(
        &self,
        conn: &Connection,
        book_id: BookId,
        source: &Account,
        imports: Vec<NewTransaction>,
        import_file_id: Option<ImportFileId>,
    ) -> Result<MatchReport> {
        let decisions = self.match_transactions(conn, book_id, source, imports)?;
        self.apply_decisions(conn, decisions, import_file_id)
    }
}

/// `[min date - 1 day, max date + 1 day]` over the batch; None when empty
pub fn candidate_window<T: Legs>(batch: &[T]) -> Option<(NaiveDate, NaiveDate)> {
    let min = batch.iter().map(Legs::date).min()?;
    let max = batch.iter().map(Legs::date).max()?;
    let pad = Duration::days(CANDIDATE_WINDOW_DAYS);
    Some((min - pad, max + pad))
}

fn same_splits(a: &[(AccountId, Decimal)], b: &[(AccountId, Decimal)]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::model::{AccountType, MatchStatus, NewAccount, ReconcileState, Split};
    use crate::rules::MatchRule;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Fixture {
        conn: Connection,
        book_id: BookId,
        checking: Account,
        rent: Account,
    }

    fn setup(with_rule: bool) -> (Fixture, MatchingEngine) {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        let book = db::create_book(&conn, "b").unwrap();
        let checking =
            db::create_account(&conn, book.id, &NewAccount::new("1000", "Checking", AccountType::Asset)).unwrap();
        let rent =
            db::create_account(&conn, book.id, &NewAccount::new("5000", "Rent", AccountType::Expense)).unwrap();

        let mut rules = MatchingRules::new();
        if with_rule {
            rules.insert("Checking", "Rent", MatchRule::new(2, &["RENT PAYMENT"]).unwrap());
        }

        let fixture = Fixture {
            conn,
            book_id: book.id,
            checking,
            rent,
        };
        (fixture, MatchingEngine::new(rules))
    }

    fn rent(f: &Fixture, day: u32, description: &str) -> NewTransaction {
        NewTransaction::transfer(f.book_id, date(2024, 1, day), description, f.rent.id, f.checking.id, dec!(500.00))
    }

    fn names(f: &Fixture) -> AccountNames {
        db::list_accounts(&f.conn, f.book_id)
            .unwrap()
            .into_iter()
            .map(|a| (a.id, a.full_name))
            .collect()
    }

    #[test]
    fn test_candidate_window() {
        let (f, _) = setup(false);
        let batch = vec![rent(&f, 10, "a"), rent(&f, 3, "b"), rent(&f, 7, "c")];
        assert_eq!(candidate_window(&batch), Some((date(2024, 1, 2), date(2024, 1, 11))));
        assert_eq!(candidate_window::<NewTransaction>(&[]), None);
    }

    #[test]
    fn test_is_match_requires_all_conditions() {
        let (f, engine) = setup(true);
        let names = names(&f);
        let id = db::insert_transaction(&f.conn, &rent(&f, 1, "RENT PAYMENT")).unwrap();
        let candidate = db::require_transaction(&f.conn, id).unwrap();

        let ok = rent(&f, 2, "RENT PAYMENT ONLINE");
        assert!(engine.is_match(&f.checking, &ok, &candidate, &names).unwrap());

        let too_late = rent(&f, 4, "RENT PAYMENT ONLINE");
        assert!(!engine.is_match(&f.checking, &too_late, &candidate, &names).unwrap());

        let other_amount = NewTransaction::transfer(
            f.book_id,
            date(2024, 1, 2),
            "RENT PAYMENT",
            f.rent.id,
            f.checking.id,
            dec!(500.01),
        );
        assert!(!engine.is_match(&f.checking, &other_amount, &candidate, &names).unwrap());

        // Neither description starts with the pattern
        let id = db::insert_transaction(&f.conn, &rent(&f, 1, "Landlord")).unwrap();
        let unrelated = db::require_transaction(&f.conn, id).unwrap();
        let transfer = rent(&f, 2, "ONLINE TRANSFER");
        assert!(!engine.is_match(&f.checking, &transfer, &unrelated, &names).unwrap());
        assert!(engine.is_match(&f.checking, &transfer, &candidate, &names).unwrap());
    }

    #[test]
    fn test_description_patterns_are_case_sensitive() {
        let (f, engine) = setup(true);
        let names = names(&f);
        let id = db::insert_transaction(&f.conn, &rent(&f, 1, "Rent Payment")).unwrap();
        let candidate = db::require_transaction(&f.conn, id).unwrap();

        let lower = rent(&f, 2, "rent payment online");
        assert!(!engine.is_match(&f.checking, &lower, &candidate, &names).unwrap());

        let upper = rent(&f, 2, "RENT PAYMENT ONLINE");
        assert!(engine.is_match(&f.checking, &upper, &candidate, &names).unwrap());
    }

    #[test]
    fn test_imported_description_alone_can_satisfy_pattern() {
        let (f, engine) = setup(true);
        let names = names(&f);
        let id = db::insert_transaction(&f.conn, &rent(&f, 1, "Landlord")).unwrap();
        let candidate = db::require_transaction(&f.conn, id).unwrap();

        let bank_line = rent(&f, 2, "RENT PAYMENT ONLINE");
        assert!(engine.is_match(&f.checking, &bank_line, &candidate, &names).unwrap());

        // Same amount and dates but neither description fits
        let coffee = rent(&f, 2, "COFFEE");
        assert!(!engine.is_match(&f.checking, &coffee, &candidate, &names).unwrap());
    }

    #[test]
    fn test_is_match_without_rule_for_counter_is_false() {
        let (f, engine) = setup(false);
        let names = names(&f);
        let id = db::insert_transaction(&f.conn, &rent(&f, 1, "RENT PAYMENT")).unwrap();
        let candidate = db::require_transaction(&f.conn, id).unwrap();
        assert!(!engine.is_match(&f.checking, &rent(&f, 1, "RENT PAYMENT"), &candidate, &names).unwrap());
    }

    #[test]
    fn test_is_match_three_splits_is_error() {
        let (f, engine) = setup(true);
        let split = |id, account_id, amount| Split {
            id,
            transaction_id: 99,
            account_id,
            amount,
            memo: None,
            reconcile_state: ReconcileState::NotReconciled,
        };
        let three = Transaction {
            id: 99,
            book_id: f.book_id,
            import_file_id: None,
            date: date(2024, 1, 1),
            description: "RENT PAYMENT".to_string(),
            memo: None,
            payee_norm: None,
            match_status: MatchStatus::Unmatched,
            splits: vec![
                split(1, f.checking.id, dec!(-500)),
                split(2, f.rent.id, dec!(250)),
                split(3, f.rent.id, dec!(250)),
            ],
        };

        let err = engine.is_match(&f.checking, &three, &three, &names(&f)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidSplitCount { count: 3, .. }));
    }

    #[test]
    fn test_claimed_candidate_leaves_the_pool() {
        let (f, engine) = setup(true);
        db::insert_transaction(&f.conn, &rent(&f, 1, "RENT PAYMENT")).unwrap();

        let batch = vec![rent(&f, 1, "RENT PAYMENT A"), rent(&f, 2, "RENT PAYMENT B")];
        let decisions = engine
            .match_transactions(&f.conn, f.book_id, &f.checking, batch)
            .unwrap();

        assert_eq!(decisions.len(), 2);
        assert!(decisions[0].is_match());
        assert!(matches!(&decisions[1], MatchDecision::Import(t) if t.description == "RENT PAYMENT B"));
    }

    #[test]
    fn test_no_rules_imports_everything() {
        let (f, engine) = setup(false);
        db::insert_transaction(&f.conn, &rent(&f, 1, "RENT PAYMENT")).unwrap();

        let report = engine
            .import_transactions(&f.conn, f.book_id, &f.checking, vec![rent(&f, 2, "RENT PAYMENT")], None)
            .unwrap();
        assert_eq!(report, MatchReport { imported: 1, matched: 0 });
        assert_eq!(db::count_transactions(&f.conn, f.book_id).unwrap(), 2);
    }

    #[test]
    fn test_apply_decisions_flags_and_inserts() {
        let (f, engine) = setup(true);
        let existing = db::insert_transaction(&f.conn, &rent(&f, 1, "RENT PAYMENT")).unwrap();

        let report = engine
            .import_transactions(
                &f.conn,
                f.book_id,
                &f.checking,
                vec![rent(&f, 2, "RENT PAYMENT ONLINE"), rent(&f, 20, "RENT PAYMENT ONLINE")],
                None,
            )
            .unwrap();

        assert_eq!(report, MatchReport { imported: 1, matched: 1 });
        let flagged = db::require_transaction(&f.conn, existing).unwrap();
        assert_eq!(flagged.match_status, MatchStatus::Matched);
        assert_eq!(db::count_transactions(&f.conn, f.book_id).unwrap(), 2);

        let events = db::get_events_for_entity(&f.conn, "transaction", &existing.to_string()).unwrap();
        assert_eq!(events[0].event_type, "transaction_matched");
    }

    #[test]
    fn test_matching_is_deterministic() {
        let (f, engine) = setup(true);
        db::insert_transaction(&f.conn, &rent(&f, 1, "RENT PAYMENT")).unwrap();
        db::insert_transaction(&f.conn, &rent(&f, 2, "RENT PAYMENT")).unwrap();

        let batch = || vec![rent(&f, 2, "X"), rent(&f, 1, "Y"), rent(&f, 9, "Z")];
        let first = engine.match_transactions(&f.conn, f.book_id, &f.checking, batch()).unwrap();
        let second = engine.match_transactions(&f.conn, f.book_id, &f.checking, batch()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.iter().filter(|d| d.is_match()).count(), 2);
    }
}
