// 🗄️ Ledger Store - SQLite schema + repository functions
// Every function takes a &Connection so it runs equally inside a BookContext
// transaction or on a bare connection.

use crate::error::{LedgerError, Result};
use crate::model::{
    Account, AccountId, AccountStatement, AccountType, Book, BookId, CategoryCacheEntry,
    ImportFile, ImportFileId, MatchStatus, NewAccount, NewAccountStatement, NewImportFile,
    NewTransaction, ReconcileState, Split, SplitId, StatementId, StatementStatus, Transaction,
    TransactionId,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Params, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// Splits are loaded for at most this many transactions per IN (...) query
const SPLIT_BATCH_SIZE: usize = 500;

const TXN_COLUMNS: &str = "t.id, t.book_id, t.import_file_id, t.transaction_date, \
     t.transaction_description, t.memo, t.payee_norm, t.match_status";

const ACCOUNT_COLUMNS: &str = "id, book_id, parent_account_id, code, name, full_name, \
     description, acct_type, hidden, placeholder";

const IMPORT_FILE_COLUMNS: &str = "id, book_id, account_id, filename, source_path, archive_path, \
     source_type, file_hash, coverage_start, coverage_end, row_count, created_at";

const STATEMENT_COLUMNS: &str = "id, book_id, account_id, start_date, end_date, start_balance, \
     end_balance, statement_path, reconcile_status, computed_end_balance, discrepancy";

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases report "memory")
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS book (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS account (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            book_id INTEGER NOT NULL REFERENCES book(id) ON DELETE CASCADE,
            parent_account_id INTEGER REFERENCES account(id),
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            full_name TEXT NOT NULL,
            description TEXT,
            hidden INTEGER NOT NULL DEFAULT 0,
            placeholder INTEGER NOT NULL DEFAULT 0,
            acct_type TEXT NOT NULL
                CHECK (acct_type IN ('ASSET','LIABILITY','INCOME','EXPENSE','EQUITY','ROOT')),
            UNIQUE (book_id, code),
            UNIQUE (book_id, full_name)
        );

        CREATE TABLE IF NOT EXISTS import_file (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            book_id INTEGER NOT NULL REFERENCES book(id) ON DELETE CASCADE,
            account_id INTEGER NOT NULL REFERENCES account(id),
            filename TEXT NOT NULL,
            source_path TEXT,
            archive_path TEXT,
            source_type TEXT NOT NULL,
            file_hash TEXT NOT NULL,
            coverage_start TEXT,
            coverage_end TEXT,
            row_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            UNIQUE (book_id, account_id, filename)
        );

        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            book_id INTEGER NOT NULL REFERENCES book(id) ON DELETE CASCADE,
            import_file_id INTEGER REFERENCES import_file(id) ON DELETE SET NULL,
            transaction_date TEXT NOT NULL,
            entry_date TEXT NOT NULL,
            transaction_description TEXT NOT NULL,
            payee_norm TEXT,
            memo TEXT,
            match_status TEXT NOT NULL DEFAULT 'n' CHECK (match_status IN ('n','m'))
        );

        CREATE TABLE IF NOT EXISTS split (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transaction_id INTEGER NOT NULL REFERENCES transactions(id) ON DELETE CASCADE,
            account_id INTEGER NOT NULL REFERENCES account(id),
            amount TEXT NOT NULL,
            memo TEXT,
            reconcile_state TEXT NOT NULL DEFAULT 'n' CHECK (reconcile_state IN ('n','c','r')),
            reconcile_date TEXT
        );

        CREATE TABLE IF NOT EXISTS category_cache (
            payee_norm TEXT PRIMARY KEY,
            account_id INTEGER NOT NULL REFERENCES account(id) ON DELETE CASCADE,
            hit_count INTEGER NOT NULL DEFAULT 1,
            last_seen_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS account_statement (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            book_id INTEGER NOT NULL REFERENCES book(id) ON DELETE CASCADE,
            account_id INTEGER NOT NULL REFERENCES account(id),
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            start_balance TEXT NOT NULL,
            end_balance TEXT NOT NULL,
            statement_path TEXT,
            reconcile_status TEXT NOT NULL DEFAULT 'n' CHECK (reconcile_status IN ('n','r','d')),
            computed_end_balance TEXT,
            discrepancy TEXT,
            UNIQUE (book_id, account_id, start_date, end_date)
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_txn_book_date_status
            ON transactions(book_id, transaction_date, match_status);
        CREATE INDEX IF NOT EXISTS idx_txn_import_file ON transactions(import_file_id);
        CREATE INDEX IF NOT EXISTS idx_split_transaction ON split(transaction_id);
        CREATE INDEX IF NOT EXISTS idx_split_account ON split(account_id);
        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);",
    )?;

    Ok(())
}

/// Open (or create) a ledger database file with the schema in place
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    Ok(conn)
}

/// Run `f` inside a SAVEPOINT: everything it writes lands, or nothing does.
/// Works both inside an open transaction and on a bare connection.
pub(crate) fn with_savepoint<T>(
    conn: &Connection,
    name: &str,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    conn.execute_batch(&format!("SAVEPOINT {}", name))?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {}", name))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}")) {
                warn!(savepoint = name, error = %rollback_err, "savepoint rollback failed");
            }
            Err(e)
        }
    }
}

// ============================================================================
// ROW DECODING
// ============================================================================

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn decimal_at(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|e| conversion_error(idx, e.to_string()))
}

fn optional_decimal_at(row: &Row, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| Decimal::from_str(&t).map_err(|e| conversion_error(idx, e.to_string())))
        .transpose()
}

fn account_from_row(row: &Row) -> rusqlite::Result<Account> {
    let acct_type: String = row.get(7)?;
    Ok(Account {
        id: row.get(0)?,
        book_id: row.get(1)?,
        parent_id: row.get(2)?,
        code: row.get(3)?,
        name: row.get(4)?,
        full_name: row.get(5)?,
        description: row.get(6)?,
        account_type: AccountType::from_str(&acct_type)
            .map_err(|e| conversion_error(7, e.to_string()))?,
        hidden: row.get(8)?,
        placeholder: row.get(9)?,
    })
}

fn transaction_from_row(row: &Row) -> rusqlite::Result<Transaction> {
    let status: String = row.get(7)?;
    Ok(Transaction {
        id: row.get(0)?,
        book_id: row.get(1)?,
        import_file_id: row.get(2)?,
        date: row.get(3)?,
        description: row.get(4)?,
        memo: row.get(5)?,
        payee_norm: row.get(6)?,
        match_status: MatchStatus::from_code(&status)
            .map_err(|e| conversion_error(7, e.to_string()))?,
        splits: Vec::new(),
    })
}

fn split_from_row(row: &Row) -> rusqlite::Result<Split> {
    let state: String = row.get(5)?;
    Ok(Split {
        id: row.get(0)?,
        transaction_id: row.get(1)?,
        account_id: row.get(2)?,
        amount: decimal_at(row, 3)?,
        memo: row.get(4)?,
        reconcile_state: ReconcileState::from_code(&state)
            .map_err(|e| conversion_error(5, e.to_string()))?,
    })
}

fn import_file_from_row(row: &Row) -> rusqlite::Result<ImportFile> {
    Ok(ImportFile {
        id: row.get(0)?,
        book_id: row.get(1)?,
        account_id: row.get(2)?,
        filename: row.get(3)?,
        source_path: row.get(4)?,
        archive_path: row.get(5)?,
        source_type: row.get(6)?,
        file_hash: row.get(7)?,
        coverage_start: row.get(8)?,
        coverage_end: row.get(9)?,
        row_count: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn statement_from_row(row: &Row) -> rusqlite::Result<AccountStatement> {
    let status: String = row.get(8)?;
    Ok(AccountStatement {
        id: row.get(0)?,
        book_id: row.get(1)?,
        account_id: row.get(2)?,
        start_date: row.get(3)?,
        end_date: row.get(4)?,
        start_balance: decimal_at(row, 5)?,
        end_balance: decimal_at(row, 6)?,
        statement_path: row.get(7)?,
        reconcile_status: StatementStatus::from_code(&status)
            .map_err(|e| conversion_error(8, e.to_string()))?,
        computed_end_balance: optional_decimal_at(row, 9)?,
        discrepancy: optional_decimal_at(row, 10)?,
    })
}

// ============================================================================
// BOOKS
// ============================================================================

pub fn create_book(conn: &Connection, name: &str) -> Result<Book> {
    conn.execute(
        "INSERT INTO book (name, created_at) VALUES (?1, ?2)",
        params![name, Utc::now()],
    )?;
    Ok(Book {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
    })
}

pub fn get_book_by_name(conn: &Connection, name: &str) -> Result<Option<Book>> {
    let book = conn
        .query_row(
            "SELECT id, name FROM book WHERE name = ?1",
            [name],
            |row| {
                Ok(Book {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(book)
}

pub fn require_book(conn: &Connection, name: &str) -> Result<Book> {
    get_book_by_name(conn, name)?.ok_or_else(|| LedgerError::not_found("book", name))
}

// ============================================================================
// ACCOUNTS
// ============================================================================

pub fn create_account(conn: &Connection, book_id: BookId, account: &NewAccount) -> Result<Account> {
    if let Some(parent_id) = account.parent_id {
        let parent = require_account_by_id(conn, parent_id)?;
        if parent.book_id != book_id {
            return Err(LedgerError::not_found(
                "parent account in book",
                format!("{} (book {})", parent_id, book_id),
            ));
        }
    }

    conn.execute(
        "INSERT INTO account (
            book_id, parent_account_id, code, name, full_name, description,
            acct_type, hidden, placeholder
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            book_id,
            account.parent_id,
            account.code,
            account.name,
            account.full_name,
            account.description,
            account.account_type.as_str(),
            account.hidden,
            account.placeholder,
        ],
    )?;

    require_account_by_id(conn, conn.last_insert_rowid())
}

pub fn get_account(conn: &Connection, account_id: AccountId) -> Result<Option<Account>> {
    let account = conn
        .query_row(
            &format!("SELECT {} FROM account WHERE id = ?1", ACCOUNT_COLUMNS),
            [account_id],
            account_from_row,
        )
        .optional()?;
    Ok(account)
}

pub fn require_account_by_id(conn: &Connection, account_id: AccountId) -> Result<Account> {
    get_account(conn, account_id)?.ok_or_else(|| LedgerError::not_found("account", account_id))
}

pub fn get_account_by_full_name(
    conn: &Connection,
    book_id: BookId,
    full_name: &str,
) -> Result<Option<Account>> {
    let account = conn
        .query_row(
            &format!(
                "SELECT {} FROM account WHERE book_id = ?1 AND full_name = ?2",
                ACCOUNT_COLUMNS
            ),
            params![book_id, full_name],
            account_from_row,
        )
        .optional()?;
    Ok(account)
}

pub fn require_account(conn: &Connection, book_id: BookId, full_name: &str) -> Result<Account> {
    get_account_by_full_name(conn, book_id, full_name)?
        .ok_or_else(|| LedgerError::not_found("account", full_name))
}

pub fn list_accounts(conn: &Connection, book_id: BookId) -> Result<Vec<Account>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM account WHERE book_id = ?1 ORDER BY code",
        ACCOUNT_COLUMNS
    ))?;
    let accounts = stmt
        .query_map([book_id], account_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(accounts)
}

/// First account (by code) whose name is `slug` or whose full name contains it
pub fn find_account_by_slug(conn: &Connection, book_id: BookId, slug: &str) -> Result<Option<Account>> {
    Ok(list_accounts(conn, book_id)?
        .into_iter()
        .find(|a| a.name == slug || a.full_name.contains(slug)))
}

/// Re-parent an account, refusing any assignment that would close a loop
pub fn set_account_parent(
    conn: &Connection,
    account_id: AccountId,
    parent_id: Option<AccountId>,
) -> Result<()> {
    let account = require_account_by_id(conn, account_id)?;

    if let Some(parent_id) = parent_id {
        let parent = require_account_by_id(conn, parent_id)?;
        if parent.book_id != account.book_id {
            return Err(LedgerError::not_found(
                "parent account in book",
                format!("{} (book {})", parent_id, account.book_id),
            ));
        }
        ensure_acyclic(conn, account_id, parent_id)?;
    }

    conn.execute(
        "UPDATE account SET parent_account_id = ?1 WHERE id = ?2",
        params![parent_id, account_id],
    )?;
    Ok(())
}

/// Walk the ancestors of `parent_id`; `account_id` must not be among them
fn ensure_acyclic(conn: &Connection, account_id: AccountId, parent_id: AccountId) -> Result<()> {
    let cycle = LedgerError::AccountCycle {
        account: account_id,
        parent: parent_id,
    };

    let mut visited = HashSet::new();
    let mut current = Some(parent_id);

    while let Some(id) = current {
        if id == account_id || !visited.insert(id) {
            return Err(cycle);
        }
        current = conn
            .query_row(
                "SELECT parent_account_id FROM account WHERE id = ?1",
                [id],
                |row| row.get::<_, Option<AccountId>>(0),
            )
            .optional()?
            .ok_or_else(|| LedgerError::not_found("account", id))?;
    }

    Ok(())
}

/// Chart of accounts in depth-first order, each with its depth (roots = 0)
pub fn list_account_hierarchy(conn: &Connection, book_id: BookId) -> Result<Vec<(Account, usize)>> {
    let accounts = list_accounts(conn, book_id)?;

    let mut children: BTreeMap<Option<AccountId>, Vec<&Account>> = BTreeMap::new();
    for account in &accounts {
        children.entry(account.parent_id).or_default().push(account);
    }

    let mut ordered = Vec::with_capacity(accounts.len());
    let mut visited = HashSet::new();
    let mut stack: Vec<(&Account, usize)> = children
        .get(&None)
        .map(|roots| roots.iter().rev().map(|a| (*a, 0)).collect())
        .unwrap_or_default();

    while let Some((account, depth)) = stack.pop() {
        if !visited.insert(account.id) {
            continue;
        }
        ordered.push((account.clone(), depth));
        if let Some(kids) = children.get(&Some(account.id)) {
            stack.extend(kids.iter().rev().map(|a| (*a, depth + 1)));
        }
    }

    Ok(ordered)
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

/// Persist a transaction together with both of its splits, atomically
pub fn insert_transaction(conn: &Connection, txn: &NewTransaction) -> Result<TransactionId> {
    with_savepoint(conn, "insert_transaction", |conn| {
        conn.execute(
            "INSERT INTO transactions (
                book_id, import_file_id, transaction_date, entry_date,
                transaction_description, payee_norm, memo, match_status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                txn.book_id,
                txn.import_file_id,
                txn.date,
                Utc::now(),
                txn.description,
                txn.payee_norm,
                txn.memo,
                MatchStatus::Unmatched.code(),
            ],
        )?;
        let txn_id = conn.last_insert_rowid();

        let mut stmt = conn.prepare_cached(
            "INSERT INTO split (transaction_id, account_id, amount, memo, reconcile_state)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for split in txn.splits() {
            stmt.execute(params![
                txn_id,
                split.account_id,
                split.amount.to_string(),
                split.memo,
                ReconcileState::NotReconciled.code(),
            ])?;
        }

        debug!(txn_id, description = %txn.description, "inserted transaction");
        Ok(txn_id)
    })
}

pub fn get_transaction(conn: &Connection, txn_id: TransactionId) -> Result<Option<Transaction>> {
    let mut txns = query_transactions(
        conn,
        &format!("SELECT {} FROM transactions t WHERE t.id = ?1", TXN_COLUMNS),
        [txn_id],
    )?;
    Ok(txns.pop())
}

pub fn require_transaction(conn: &Connection, txn_id: TransactionId) -> Result<Transaction> {
    get_transaction(conn, txn_id)?.ok_or_else(|| LedgerError::not_found("transaction", txn_id))
}

pub fn list_transactions(conn: &Connection, book_id: BookId) -> Result<Vec<Transaction>> {
    query_transactions(
        conn,
        &format!(
            "SELECT {} FROM transactions t WHERE t.book_id = ?1
             ORDER BY t.transaction_date, t.id",
            TXN_COLUMNS
        ),
        [book_id],
    )
}

pub fn count_transactions(conn: &Connection, book_id: BookId) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM transactions WHERE book_id = ?1",
        [book_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Flag a transaction of `book_id` as matched; NotFound if it is not in that book
pub fn mark_transaction_matched(conn: &Connection, book_id: BookId, txn_id: TransactionId) -> Result<()> {
    let updated = conn.execute(
        "UPDATE transactions SET match_status = ?1 WHERE id = ?2 AND book_id = ?3",
        params![MatchStatus::Matched.code(), txn_id, book_id],
    )?;
    if updated == 0 {
        return Err(LedgerError::not_found("transaction", txn_id));
    }
    Ok(())
}

/// Delete a transaction of `book_id`; its splits go with it
pub fn delete_transaction(conn: &Connection, book_id: BookId, txn_id: TransactionId) -> Result<()> {
    let deleted = conn.execute(
        "DELETE FROM transactions WHERE id = ?1 AND book_id = ?2",
        params![txn_id, book_id],
    )?;
    if deleted == 0 {
        return Err(LedgerError::not_found("transaction", txn_id));
    }
    Ok(())
}

/// Unmatched transactions in `[start, end]` touching any of `account_names`.
///
/// One query for the transaction rows and one batched query for their splits.
pub fn query_unmatched_in_range(
    conn: &Connection,
    book_id: BookId,
    start: NaiveDate,
    end: NaiveDate,
    account_names: &[String],
) -> Result<Vec<Transaction>> {
    if account_names.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; account_names.len()].join(", ");
    let sql = format!(
        "SELECT DISTINCT {} FROM transactions t
         JOIN split s ON s.transaction_id = t.id
         JOIN account a ON a.id = s.account_id
         WHERE t.book_id = ? AND t.transaction_date >= ? AND t.transaction_date <= ?
           AND t.match_status = ? AND a.full_name IN ({})
         ORDER BY t.transaction_date, t.id",
        TXN_COLUMNS, placeholders
    );

    let mut values = vec![
        Value::Integer(book_id),
        Value::Text(start.to_string()),
        Value::Text(end.to_string()),
        Value::Text(MatchStatus::Unmatched.code().to_string()),
    ];
    values.extend(account_names.iter().map(|name| Value::Text(name.clone())));

    query_transactions(conn, &sql, params_from_iter(values))
}

/// Every transaction in `[start, end]` with a split on `account_id`
pub fn transactions_for_account_in_range(
    conn: &Connection,
    book_id: BookId,
    account_id: AccountId,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<Transaction>> {
    query_transactions(
        conn,
        &format!(
            "SELECT DISTINCT {} FROM transactions t
             JOIN split s ON s.transaction_id = t.id
             WHERE t.book_id = ?1 AND s.account_id = ?2
               AND t.transaction_date >= ?3 AND t.transaction_date <= ?4
             ORDER BY t.transaction_date, t.id",
            TXN_COLUMNS
        ),
        params![book_id, account_id, start, end],
    )
}

/// Transactions with a split parked on a placeholder account or on
/// `uncategorized_id`, optionally narrowed to one account or one import file
pub fn transactions_needing_categorization(
    conn: &Connection,
    book_id: BookId,
    uncategorized_id: Option<AccountId>,
    account_filter: Option<AccountId>,
    import_file_filter: Option<ImportFileId>,
) -> Result<Vec<Transaction>> {
    query_transactions(
        conn,
        &format!(
            "SELECT DISTINCT {} FROM transactions t
             JOIN split s ON s.transaction_id = t.id
             JOIN account a ON a.id = s.account_id
             WHERE t.book_id = ?1
               AND (a.placeholder = 1 OR a.id = ?2)
               AND (?3 IS NULL OR t.id IN (SELECT transaction_id FROM split WHERE account_id = ?3))
               AND (?4 IS NULL OR t.import_file_id = ?4)
             ORDER BY t.transaction_date, t.id",
            TXN_COLUMNS
        ),
        params![book_id, uncategorized_id, account_filter, import_file_filter],
    )
}

pub fn set_split_account(conn: &Connection, split_id: SplitId, account_id: AccountId) -> Result<()> {
    let updated = conn.execute(
        "UPDATE split SET account_id = ?1 WHERE id = ?2",
        params![account_id, split_id],
    )?;
    if updated == 0 {
        return Err(LedgerError::not_found("split", split_id));
    }
    Ok(())
}

fn query_transactions<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(sql)?;
    let mut txns = stmt
        .query_map(params, transaction_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    attach_splits(conn, &mut txns)?;
    Ok(txns)
}

fn attach_splits(conn: &Connection, txns: &mut [Transaction]) -> Result<()> {
    let ids: Vec<TransactionId> = txns.iter().map(|t| t.id).collect();
    let mut by_txn: HashMap<TransactionId, Vec<Split>> = HashMap::new();

    for chunk in ids.chunks(SPLIT_BATCH_SIZE) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT id, transaction_id, account_id, amount, memo, reconcile_state
             FROM split WHERE transaction_id IN ({}) ORDER BY transaction_id, id",
            placeholders
        ))?;
        let splits = stmt
            .query_map(params_from_iter(chunk.iter()), split_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for split in splits {
            by_txn.entry(split.transaction_id).or_default().push(split);
        }
    }

    for txn in txns.iter_mut() {
        txn.splits = by_txn.remove(&txn.id).unwrap_or_default();
    }
    Ok(())
}

// ============================================================================
// IMPORT FILES
// ============================================================================

pub fn create_import_file(conn: &Connection, book_id: BookId, file: &NewImportFile) -> Result<ImportFile> {
    conn.execute(
        "INSERT INTO import_file (
            book_id, account_id, filename, source_path, archive_path, source_type,
            file_hash, coverage_start, coverage_end, row_count, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            book_id,
            file.account_id,
            file.filename,
            file.source_path,
            file.archive_path,
            file.source_type,
            file.file_hash,
            file.coverage_start,
            file.coverage_end,
            file.row_count,
            Utc::now(),
        ],
    )?;

    let id = conn.last_insert_rowid();
    get_import_file(conn, id)?.ok_or_else(|| LedgerError::not_found("import file", id))
}

pub fn get_import_file(conn: &Connection, import_file_id: ImportFileId) -> Result<Option<ImportFile>> {
    let file = conn
        .query_row(
            &format!("SELECT {} FROM import_file WHERE id = ?1", IMPORT_FILE_COLUMNS),
            [import_file_id],
            import_file_from_row,
        )
        .optional()?;
    Ok(file)
}

pub fn get_import_file_by_scope(
    conn: &Connection,
    book_id: BookId,
    account_id: AccountId,
    filename: &str,
) -> Result<Option<ImportFile>> {
    let file = conn
        .query_row(
            &format!(
                "SELECT {} FROM import_file
                 WHERE book_id = ?1 AND account_id = ?2 AND filename = ?3",
                IMPORT_FILE_COLUMNS
            ),
            params![book_id, account_id, filename],
            import_file_from_row,
        )
        .optional()?;
    Ok(file)
}

pub fn list_import_files(conn: &Connection, book_id: BookId) -> Result<Vec<ImportFile>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM import_file WHERE book_id = ?1 ORDER BY created_at DESC, id DESC",
        IMPORT_FILE_COLUMNS
    ))?;
    let files = stmt
        .query_map([book_id], import_file_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(files)
}

// ============================================================================
// CATEGORY CACHE
// ============================================================================

pub fn get_cached_category(conn: &Connection, payee_norm: &str) -> Result<Option<CategoryCacheEntry>> {
    let entry = conn
        .query_row(
            "SELECT payee_norm, account_id, hit_count, last_seen_at
             FROM category_cache WHERE payee_norm = ?1",
            [payee_norm],
            |row| {
                Ok(CategoryCacheEntry {
                    payee_norm: row.get(0)?,
                    account_id: row.get(1)?,
                    hit_count: row.get(2)?,
                    last_seen_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(entry)
}

/// Point the payee at `account_id`; an existing entry is re-pointed and its hit count bumped
pub fn upsert_category_cache(
    conn: &Connection,
    payee_norm: &str,
    account_id: AccountId,
) -> Result<CategoryCacheEntry> {
    let now: DateTime<Utc> = Utc::now();
    conn.execute(
        "INSERT INTO category_cache (payee_norm, account_id, hit_count, last_seen_at)
         VALUES (?1, ?2, 1, ?3)
         ON CONFLICT(payee_norm) DO UPDATE SET
             account_id = excluded.account_id,
             hit_count = hit_count + 1,
             last_seen_at = excluded.last_seen_at",
        params![payee_norm, account_id, now],
    )?;

    get_cached_category(conn, payee_norm)?
        .ok_or_else(|| LedgerError::not_found("category cache entry", payee_norm))
}

pub fn increment_cache_hit(conn: &Connection, payee_norm: &str) -> Result<()> {
    conn.execute(
        "UPDATE category_cache SET hit_count = hit_count + 1, last_seen_at = ?1
         WHERE payee_norm = ?2",
        params![Utc::now(), payee_norm],
    )?;
    Ok(())
}

// ============================================================================
// ACCOUNT STATEMENTS
// ============================================================================

pub fn create_account_statement(
    conn: &Connection,
    book_id: BookId,
    statement: &NewAccountStatement,
) -> Result<AccountStatement> {
    conn.execute(
        "INSERT INTO account_statement (
            book_id, account_id, start_date, end_date, start_balance, end_balance,
            statement_path, reconcile_status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            book_id,
            statement.account_id,
            statement.start_date,
            statement.end_date,
            statement.start_balance.to_string(),
            statement.end_balance.to_string(),
            statement.statement_path,
            StatementStatus::NotReconciled.code(),
        ],
    )?;

    require_account_statement(conn, conn.last_insert_rowid())
}

pub fn get_account_statement(
    conn: &Connection,
    statement_id: StatementId,
) -> Result<Option<AccountStatement>> {
    let statement = conn
        .query_row(
            &format!("SELECT {} FROM account_statement WHERE id = ?1", STATEMENT_COLUMNS),
            [statement_id],
            statement_from_row,
        )
        .optional()?;
    Ok(statement)
}

pub fn require_account_statement(conn: &Connection, statement_id: StatementId) -> Result<AccountStatement> {
    get_account_statement(conn, statement_id)?
        .ok_or_else(|| LedgerError::not_found("account statement", statement_id))
}

pub fn get_account_statement_by_period(
    conn: &Connection,
    book_id: BookId,
    account_id: AccountId,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<Option<AccountStatement>> {
    let statement = conn
        .query_row(
            &format!(
                "SELECT {} FROM account_statement
                 WHERE book_id = ?1 AND account_id = ?2 AND start_date = ?3 AND end_date = ?4",
                STATEMENT_COLUMNS
            ),
            params![book_id, account_id, start_date, end_date],
            statement_from_row,
        )
        .optional()?;
    Ok(statement)
}

/// Statements of a book, or of one account when `account_id` is given, oldest first
pub fn list_account_statements(
    conn: &Connection,
    book_id: BookId,
    account_id: Option<AccountId>,
) -> Result<Vec<AccountStatement>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM account_statement
         WHERE book_id = ?1 AND (?2 IS NULL OR account_id = ?2)
         ORDER BY start_date, id",
        STATEMENT_COLUMNS
    ))?;
    let statements = stmt
        .query_map(params![book_id, account_id], statement_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(statements)
}

/// Overwrite the computed reconciliation figures of a statement
pub fn update_statement_reconciliation(
    conn: &Connection,
    statement_id: StatementId,
    computed_end_balance: Decimal,
    discrepancy: Decimal,
    status: StatementStatus,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE account_statement
         SET computed_end_balance = ?1, discrepancy = ?2, reconcile_status = ?3
         WHERE id = ?4",
        params![
            computed_end_balance.to_string(),
            discrepancy.to_string(),
            status.code(),
            statement_id,
        ],
    )?;
    if updated == 0 {
        return Err(LedgerError::not_found("account statement", statement_id));
    }
    Ok(())
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Event for audit trail: every ledger mutation appends one
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: impl ToString,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp,
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Events for one entity, oldest first
pub fn get_events_for_entity(conn: &Connection, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let data_json: String = row.get(5)?;
            Ok(Event {
                event_id: row.get(0)?,
                timestamp: row.get(1)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|e| conversion_error(5, e.to_string()))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(events)
}
