// 🧾 Statement import - register externally reported balances per period

use crate::context::BookContext;
use crate::db;
use crate::error::{LedgerError, Result};
use crate::model::{AccountStatement, NewAccountStatement, StatementId};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Balances extracted from one statement document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementRecord {
    pub account_slug: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_balance: Decimal,
    pub end_balance: Decimal,
    pub source_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatementImportOutcome {
    Imported,
    /// Period already on file and its last reconciliation came out exactly zero
    AlreadyReconciled,
    /// Period already on file but never reconciled, or reconciled with a discrepancy
    NeedsReconciliation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementImportReport {
    pub outcome: StatementImportOutcome,
    pub statement: AccountStatement,
    pub message: String,
}

pub struct StatementService;

impl StatementService {
    pub fn import_statement(ctx: &BookContext, record: &StatementRecord) -> Result<StatementImportReport> {
        let book_id = ctx.book().id;
        let account = db::find_account_by_slug(ctx, book_id, &record.account_slug)?
            .ok_or_else(|| LedgerError::not_found("account", &record.account_slug))?;

        let period = format!("{} to {}", record.start_date, record.end_date);

        if let Some(existing) =
            db::get_account_statement_by_period(ctx, book_id, account.id, record.start_date, record.end_date)?
        {
            let (outcome, message) = if existing.discrepancy == Some(Decimal::ZERO) {
                (
                    StatementImportOutcome::AlreadyReconciled,
                    format!("Statement for {} already reconciled", period),
                )
            } else {
                (
                    StatementImportOutcome::NeedsReconciliation,
                    format!("Statement for {} needs reconciliation", period),
                )
            };
            info!(account = %account.full_name, %period, ?outcome, "statement already on file");
            return Ok(StatementImportReport {
                outcome,
                statement: existing,
                message,
            });
        }

        let statement = db::create_account_statement(
            ctx,
            book_id,
            &NewAccountStatement {
                account_id: account.id,
                start_date: record.start_date,
                end_date: record.end_date,
                start_balance: record.start_balance,
                end_balance: record.end_balance,
                statement_path: record.source_path.clone(),
            },
        )?;
        info!(account = %account.full_name, %period, statement_id = statement.id, "statement imported");

        Ok(StatementImportReport {
            outcome: StatementImportOutcome::Imported,
            message: format!(
                "Imported statement for {}, balance: {} to {}",
                period, record.start_balance, record.end_balance
            ),
            statement,
        })
    }

    /// Statements of the whole book, or of the account matching `account_slug`
    /// (empty when no account matches)
    pub fn list_statements(ctx: &BookContext, account_slug: Option<&str>) -> Result<Vec<AccountStatement>> {
        let book_id = ctx.book().id;
        match account_slug {
            Some(slug) => match db::find_account_by_slug(ctx, book_id, slug)? {
                Some(account) => db::list_account_statements(ctx, book_id, Some(account.id)),
                None => Ok(Vec::new()),
            },
            None => db::list_account_statements(ctx, book_id, None),
        }
    }

    pub fn get_statement(ctx: &BookContext, statement_id: StatementId) -> Result<Option<AccountStatement>> {
        Ok(db::get_account_statement(ctx, statement_id)?.filter(|s| s.book_id == ctx.book().id))
    }
}
