// 📥 Ingestion Guard - file-level idempotent import
// hash → scope check → parse → categorize → match → persist, all inside the
// caller's BookContext so a failure leaves no partial import behind.

use crate::archive::ArchivePath;
use crate::categorize::CategorizationEngine;
use crate::context::BookContext;
use crate::db::{self, Event};
use crate::error::{LedgerError, Result};
use crate::matching::MatchingEngine;
use crate::model::{Account, ImportFile, ImportFileId, NewImportFile, NewSplit, NewTransaction};
use crate::parser::{CanonicalRecord, StatementParser};
use crate::payee::normalize_payee;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One file to ingest into one account
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub account_full_name: String,
    pub filename: String,
    pub source_path: Option<String>,
    pub bytes: Vec<u8>,
    /// When set, the import file records where it belongs in the archive
    pub archive_root: Option<PathBuf>,
}

impl IngestRequest {
    pub fn new(account_full_name: &str, filename: &str, bytes: Vec<u8>) -> Self {
        IngestRequest {
            account_full_name: account_full_name.to_string(),
            filename: filename.to_string(),
            source_path: None,
            bytes,
            archive_root: None,
        }
    }

    /// Read `path` from disk; the file name becomes the idempotency key
    pub fn from_file(account_full_name: &str, path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| LedgerError::InvalidPath(path.display().to_string()))?;
        Ok(IngestRequest::new(account_full_name, filename, bytes)
            .with_source_path(&path.display().to_string()))
    }

    pub fn with_source_path(mut self, source_path: &str) -> Self {
        self.source_path = Some(source_path.to_string());
        self
    }

    pub fn with_archive_root(mut self, root: &Path) -> Self {
        self.archive_root = Some(root.to_path_buf());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IngestOutcome {
    /// New file, its transactions are in the ledger
    Imported,
    /// Same name, same content: already imported, nothing done
    SkippedDuplicate,
    /// Same name, different content: needs a human decision, nothing done
    HashMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub outcome: IngestOutcome,
    pub import_file_id: Option<ImportFileId>,
    pub imported: usize,
    pub matched: usize,
    pub message: String,
}

impl IngestReport {
    fn unchanged(outcome: IngestOutcome, existing: &ImportFile, message: String) -> Self {
        IngestReport {
            outcome,
            import_file_id: Some(existing.id),
            imported: 0,
            matched: 0,
            message,
        }
    }
}

/// Hex SHA-256 of the raw file bytes
pub fn file_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct IngestService<'a> {
    categorizer: &'a CategorizationEngine,
    matcher: &'a MatchingEngine,
}

impl<'a> IngestService<'a> {
    pub fn new(categorizer: &'a CategorizationEngine, matcher: &'a MatchingEngine) -> Self {
        IngestService { categorizer, matcher }
    }

    pub fn ingest(
        &self,
        ctx: &BookContext,
        request: &IngestRequest,
        parser: &dyn StatementParser,
    ) -> Result<IngestReport> {
        let book_id = ctx.book().id;
        let hash = file_hash(&request.bytes);
        let account = db::require_account(ctx, book_id, &request.account_full_name)?;

        if let Some(existing) = db::get_import_file_by_scope(ctx, book_id, account.id, &request.filename)? {
            if existing.file_hash == hash {
                info!(filename = %request.filename, "already imported, skipping");
                return Ok(IngestReport::unchanged(
                    IngestOutcome::SkippedDuplicate,
                    &existing,
                    format!("File '{}' already imported", request.filename),
                ));
            }
            warn!(filename = %request.filename, "file re-submitted with different content");
            return Ok(IngestReport::unchanged(
                IngestOutcome::HashMismatch,
                &existing,
                format!("File '{}' exists with different content", request.filename),
            ));
        }

        let mut records = parser
            .parse(&request.bytes)
            .map_err(|e| LedgerError::Parse(format!("{}: {:#}", request.filename, e)))?;
        debug!(filename = %request.filename, records = records.len(), "parsed");

        for record in records.iter_mut() {
            self.categorize_record(ctx, &account, record)?;
        }

        let txns = records
            .iter()
            .map(|r| to_transaction(ctx, book_id, r))
            .collect::<Result<Vec<_>>>()?;

        let coverage_start = records.iter().map(|r| r.date).min();
        let coverage_end = records.iter().map(|r| r.date).max();
        let archive_path = match (&request.archive_root, coverage_start, coverage_end) {
            (Some(root), Some(start), Some(end)) => {
                let extension = Path::new(&request.filename)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or(parser.source_type());
                let path = ArchivePath::for_account(&account.full_name, start, end, extension);
                Some(path.under(root).display().to_string())
            }
            _ => None,
        };

        let import_file = db::create_import_file(
            ctx,
            book_id,
            &NewImportFile {
                account_id: account.id,
                filename: request.filename.clone(),
                source_path: request.source_path.clone(),
                archive_path,
                source_type: parser.source_type().to_string(),
                file_hash: hash,
                coverage_start,
                coverage_end,
                row_count: records.len() as i64,
            },
        )?;

        let report = self
            .matcher
            .import_transactions(ctx, book_id, &account, txns, Some(import_file.id))?;

        db::insert_event(
            ctx,
            &Event::new(
                "file_imported",
                "import_file",
                import_file.id,
                serde_json::json!({
                    "filename": import_file.filename,
                    "file_hash": import_file.file_hash,
                    "imported": report.imported,
                    "matched": report.matched,
                }),
                "ingest_service",
            ),
        )?;

        info!(
            filename = %request.filename,
            account = %account.full_name,
            imported = report.imported,
            matched = report.matched,
            "file imported"
        );

        Ok(IngestReport {
            outcome: IngestOutcome::Imported,
            import_file_id: Some(import_file.id),
            imported: report.imported,
            matched: report.matched,
            message: format!("Imported {}, matched {}", report.imported, report.matched),
        })
    }

    /// Replace a parked counter split with the looked-up category, if one is found
    fn categorize_record(&self, ctx: &BookContext, source: &Account, record: &mut CanonicalRecord) -> Result<()> {
        let payee = record
            .payee_norm
            .clone()
            .unwrap_or_else(|| normalize_payee(&record.description));

        let Some(counter) = record.counter_split_mut(&source.full_name) else {
            return Ok(());
        };
        let parked = match db::get_account_by_full_name(ctx, ctx.book().id, &counter.account_name)? {
            Some(account) => self.categorizer.needs_category(&account),
            None => counter.account_name == self.categorizer.uncategorized_account(),
        };
        if !parked {
            return Ok(());
        }

        let result = self.categorizer.lookup(ctx, ctx.book().id, &payee, true)?;
        if !result.is_fallback() {
            debug!(%payee, category = %result.account_full_name, "categorized record");
            counter.account_name = result.account_full_name;
        }
        Ok(())
    }

    pub fn list_imports(&self, ctx: &BookContext) -> Result<Vec<ImportFile>> {
        db::list_import_files(ctx, ctx.book().id)
    }

    pub fn get_import(&self, ctx: &BookContext, import_file_id: ImportFileId) -> Result<Option<ImportFile>> {
        Ok(db::get_import_file(ctx, import_file_id)?.filter(|f| f.book_id == ctx.book().id))
    }
}

fn to_transaction(ctx: &BookContext, book_id: i64, record: &CanonicalRecord) -> Result<NewTransaction> {
    let splits = record
        .splits
        .iter()
        .map(|s| {
            let account = db::require_account(ctx, book_id, &s.account_name)?;
            Ok(NewSplit::new(account.id, s.amount))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(NewTransaction::from_splits(book_id, record.date, &record.description, splits)?
        .with_memo(record.memo.clone())
        .with_payee(record.payee_norm.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccountType, NewAccount};
    use crate::parser::CsvParser;
    use crate::rules::{CategoryRules, MatchingRules};
    use rusqlite::Connection;

    const CSV: &str = "Date,Description,Amount\n\
                       2024-01-02,WHOLE FOODS MARKET,-42.10\n\
                       2024-01-05,CORNER BAKERY,-6.00\n";

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        let book = db::create_book(&conn, "b").unwrap();
        for (code, name, ty) in [
            ("1000", "Assets:Checking", AccountType::Asset),
            ("5000", "Expenses:Groceries", AccountType::Expense),
            ("5999", "Expenses:Uncategorized", AccountType::Expense),
        ] {
            db::create_account(&conn, book.id, &NewAccount::new(code, name, ty)).unwrap();
        }
        conn
    }

    fn engines() -> (CategorizationEngine, MatchingEngine) {
        let rules = CategoryRules::from_json(r#"{"Expenses:Groceries": [{"payee": "WHOLE FOODS"}]}"#).unwrap();
        (
            CategorizationEngine::new(rules, "Expenses:Uncategorized"),
            MatchingEngine::new(MatchingRules::new()),
        )
    }

    fn parser() -> CsvParser {
        CsvParser::new("Assets:Checking", "Expenses:Uncategorized")
    }

    #[test]
    fn test_file_hash_is_hex_sha256() {
        assert_eq!(
            file_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_ingest_categorizes_and_records_file() {
        let mut conn = setup();
        let (categorizer, matcher) = engines();
        let service = IngestService::new(&categorizer, &matcher);
        let request = IngestRequest::new("Assets:Checking", "jan.csv", CSV.as_bytes().to_vec())
            .with_archive_root(Path::new("/archive"));

        let ctx = BookContext::open(&mut conn, "b").unwrap();
        let report = service.ingest(&ctx, &request, &parser()).unwrap();
        assert_eq!(report.outcome, IngestOutcome::Imported);
        assert_eq!(report.imported, 2);
        assert_eq!(report.matched, 0);

        let files = service.list_imports(&ctx).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].row_count, 2);
        assert_eq!(files[0].file_hash, file_hash(CSV.as_bytes()));
        assert_eq!(
            files[0].archive_path.as_deref(),
            Some("/archive/2024/Checking/2024-01-02--2024-01-05-Checking.csv")
        );
        ctx.commit().unwrap();

        let book_id = db::require_book(&conn, "b").unwrap().id;
        let groceries = db::require_account(&conn, book_id, "Expenses:Groceries").unwrap();
        let txns = db::list_transactions(&conn, book_id).unwrap();
        assert_eq!(txns[0].amount_for(groceries.id), rust_decimal_macros::dec!(42.10));
        assert_eq!(txns[0].import_file_id, report.import_file_id);
        assert!(db::get_cached_category(&conn, "WHOLE FOODS MARKET").unwrap().is_some());
    }

    #[test]
    fn test_unknown_account_is_not_found() {
        let mut conn = setup();
        let (categorizer, matcher) = engines();
        let service = IngestService::new(&categorizer, &matcher);
        let request = IngestRequest::new("Assets:Nope", "jan.csv", CSV.as_bytes().to_vec());

        let ctx = BookContext::open(&mut conn, "b").unwrap();
        let err = service.ingest(&ctx, &request, &parser()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_parse_failure_leaves_nothing_behind() {
        let mut conn = setup();
        let (categorizer, matcher) = engines();
        let service = IngestService::new(&categorizer, &matcher);
        let request = IngestRequest::new(
            "Assets:Checking",
            "bad.csv",
            b"Date,Description,Amount\nnot-a-date,X,1\n".to_vec(),
        );

        let result = BookContext::run(&mut conn, "b", |ctx| service.ingest(ctx, &request, &parser()));
        assert!(matches!(result, Err(LedgerError::Parse(_))));

        let book_id = db::require_book(&conn, "b").unwrap().id;
        assert!(db::list_import_files(&conn, book_id).unwrap().is_empty());
    }
}
