use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::env;
use std::path::Path;
use std::str::FromStr;

use bookkeeper::{
    db, logging, AccountType, BookContext, CategorizeFilter, CsvParser, IngestRequest, IngestService,
    LedgerConfig, NewAccount, ReconciliationEngine, StatementRecord, StatementService, TransactionService,
};

const USAGE: &str = "usage:
  bookkeeper init <book>
  bookkeeper account <book> <code> <full-name> <type> [--placeholder]
  bookkeeper accounts <book>
  bookkeeper enter <book> <date> <description> <debit-account> <credit-account> <amount> [memo]
  bookkeeper delete-transaction <book> <id>
  bookkeeper ingest <book> <account> <file.csv>
  bookkeeper imports <book>
  bookkeeper categorize <book> [--dry-run]
  bookkeeper statement <book> <slug> <start> <end> <start-balance> <end-balance> [path]
  bookkeeper statements <book> [slug]
  bookkeeper reconcile <book> <slug> [--all]
  bookkeeper reconcile <book> --statement-id <id>";

fn main() -> Result<()> {
    let config = LedgerConfig::from_env();
    logging::init(&config.log_level);

    let args: Vec<String> = env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    let mut conn = db::open_database(&config.db_path)
        .with_context(|| format!("Failed to open ledger at {}", config.db_path.display()))?;

    match (command.as_str(), rest) {
        ("init", [book]) => {
            let book = db::create_book(&conn, book)?;
            println!("📒 Created book '{}' (id {})", book.name, book.id);
        }
        ("account", [book, code, full_name, acct_type, flags @ ..]) => {
            let mut account = NewAccount::new(code, full_name, AccountType::from_str(acct_type)?);
            if flags.iter().any(|f| f == "--placeholder") {
                account = account.placeholder();
            }
            let created = BookContext::run(&mut conn, book, |ctx| db::create_account(ctx, ctx.book().id, &account))?;
            println!("✓ Account {} {} ({})", created.code, created.full_name, created.account_type.as_str());
        }
        ("accounts", [book]) => {
            let tree = BookContext::run(&mut conn, book, |ctx| db::list_account_hierarchy(ctx, ctx.book().id))?;
            for (account, depth) in tree {
                println!(
                    "{:<8} {}{} ({}){}",
                    account.code,
                    "  ".repeat(depth),
                    account.full_name,
                    account.account_type.as_str(),
                    if account.placeholder { " [placeholder]" } else { "" }
                );
            }
        }
        ("enter", [book, date, description, debit, credit, amount, memo @ ..]) => {
            let date = parse_date(date)?;
            let amount = parse_amount(amount)?;
            let txn = BookContext::run(&mut conn, book, |ctx| {
                TransactionService::enter_transaction(
                    ctx,
                    date,
                    description,
                    debit,
                    credit,
                    amount,
                    memo.first().map(String::as_str),
                )
            })?;
            println!("✓ Booked {}", txn);
        }
        ("delete-transaction", [book, id]) => {
            let id: i64 = id.parse().with_context(|| format!("Bad transaction id '{}'", id))?;
            BookContext::run(&mut conn, book, |ctx| TransactionService::delete_transaction(ctx, id))?;
            println!("🗑️  Deleted transaction {}", id);
        }
        ("ingest", [book, account, file]) => {
            let categorizer = config.categorization_engine()?;
            let matcher = config.matching_engine()?;
            let service = IngestService::new(&categorizer, &matcher);
            let parser = CsvParser::new(account, categorizer.uncategorized_account());
            let request = IngestRequest::from_file(account, Path::new(file))?.with_archive_root(&config.archive_path);

            let report = BookContext::run(&mut conn, book, |ctx| service.ingest(ctx, &request, &parser))?;
            println!("📥 {:?}: {}", report.outcome, report.message);
        }
        ("imports", [book]) => {
            let files = BookContext::run(&mut conn, book, |ctx| db::list_import_files(ctx, ctx.book().id))?;
            for file in files {
                println!(
                    "{:>5}  {}  {} rows  {}",
                    file.id,
                    file.filename,
                    file.row_count,
                    &file.file_hash[..12.min(file.file_hash.len())]
                );
            }
        }
        ("categorize", [book, flags @ ..]) => {
            let dry_run = flags.iter().any(|f| f == "--dry-run");
            let categorizer = config.categorization_engine()?;
            let report = BookContext::run(&mut conn, book, |ctx| {
                categorizer.categorize(ctx, CategorizeFilter::default(), dry_run)
            })?;
            println!(
                "🗂️  {} transactions: {} cache, {} rule, {} uncategorized ({:.0}% categorized){}",
                report.total,
                report.from_cache,
                report.from_rule,
                report.fallback,
                report.success_rate * 100.0,
                if dry_run { " [dry run]" } else { "" }
            );
        }
        ("statement", [book, slug, start, end, start_balance, end_balance, path @ ..]) => {
            let record = StatementRecord {
                account_slug: slug.clone(),
                start_date: parse_date(start)?,
                end_date: parse_date(end)?,
                start_balance: parse_amount(start_balance)?,
                end_balance: parse_amount(end_balance)?,
                source_path: path.first().cloned(),
            };
            let report = BookContext::run(&mut conn, book, |ctx| StatementService::import_statement(ctx, &record))?;
            println!("🧾 {:?}: {}", report.outcome, report.message);
        }
        ("statements", [book, slug @ ..]) => {
            let statements = BookContext::run(&mut conn, book, |ctx| {
                StatementService::list_statements(ctx, slug.first().map(String::as_str))
            })?;
            for stmt in statements {
                println!(
                    "{:>5}  {} to {}  {} → {}  {}",
                    stmt.id,
                    stmt.start_date,
                    stmt.end_date,
                    stmt.start_balance,
                    stmt.end_balance,
                    stmt.reconcile_status.code()
                );
            }
        }
        ("reconcile", [book, flag, id]) if flag == "--statement-id" => {
            let id: i64 = id.parse().with_context(|| format!("Bad statement id '{}'", id))?;
            let result = BookContext::run(&mut conn, book, |ctx| ReconciliationEngine::reconcile_statement(ctx, id))?;
            println!("⚖️  {}", result.summary());
        }
        ("reconcile", [book, slug, flags @ ..]) => {
            let all_periods = flags.iter().any(|f| f == "--all");
            let results = BookContext::run(&mut conn, book, |ctx| {
                ReconciliationEngine::reconcile_by_account(ctx, slug, all_periods)
            })?;
            if results.is_empty() {
                println!("Nothing to reconcile for '{}'", slug);
            }
            for result in results {
                println!("⚖️  {}", result.summary());
            }
        }
        _ => bail!("unrecognized command\n{}", USAGE),
    }

    Ok(())
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("Bad date '{}', expected YYYY-MM-DD", raw))
}

fn parse_amount(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("Bad amount '{}'", raw))
}
