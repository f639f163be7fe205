// ⚖️ Reconciliation Engine - Validate balances match
// Checks a statement period against the ledger:
//
//   computed_end = start_balance + Σ(splits on the account within [start, end])
//   discrepancy  = computed_end - end_balance
//
// Within a cent counts as reconciled. The figures are written back to the
// statement every run, so running it twice leaves the same state.

use crate::context::BookContext;
use crate::db::{self, Event};
use crate::error::{LedgerError, Result};
use crate::model::{AccountId, AccountStatement, StatementId, StatementStatus, Transaction};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

/// A |discrepancy| strictly below this counts as reconciled
pub const TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

// ============================================================================
// RECONCILIATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationResult {
    pub matches: bool,
    pub computed_end_balance: Decimal,
    pub discrepancy: Decimal,
    pub transaction_count: usize,
    /// The statement as stored after this run
    pub statement: AccountStatement,
}

impl ReconciliationResult {
    pub fn summary(&self) -> String {
        let stmt = &self.statement;
        format!(
            "Period {} to {}: {} transactions, start {} end {}, computed {} discrepancy {} ({})",
            stmt.start_date,
            stmt.end_date,
            self.transaction_count,
            stmt.start_balance,
            stmt.end_balance,
            self.computed_end_balance,
            self.discrepancy,
            if self.matches { "RECONCILED" } else { "DISCREPANCY" }
        )
    }
}

/// Net movement of `account_id` across `transactions`
pub fn compute_balance_change(transactions: &[Transaction], account_id: AccountId) -> Decimal {
    transactions.iter().map(|t| t.amount_for(account_id)).sum()
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine;

impl ReconciliationEngine {
    pub fn reconcile_statement(ctx: &BookContext, statement_id: StatementId) -> Result<ReconciliationResult> {
        let book_id = ctx.book().id;
        let statement = db::get_account_statement(ctx, statement_id)?
            .filter(|s| s.book_id == book_id)
            .ok_or_else(|| LedgerError::not_found("account statement", statement_id))?;

        let transactions = db::transactions_for_account_in_range(
            ctx,
            book_id,
            statement.account_id,
            statement.start_date,
            statement.end_date,
        )?;

        let change = compute_balance_change(&transactions, statement.account_id);
        let computed_end = statement.start_balance + change;
        let discrepancy = computed_end - statement.end_balance;
        let matches = discrepancy.abs() < TOLERANCE;
        let status = if matches {
            StatementStatus::Reconciled
        } else {
            StatementStatus::Discrepancy
        };

        db::update_statement_reconciliation(ctx, statement.id, computed_end, discrepancy, status)?;
        db::insert_event(
            ctx,
            &Event::new(
                "statement_reconciled",
                "account_statement",
                statement.id,
                serde_json::json!({
                    "computed_end_balance": computed_end.to_string(),
                    "discrepancy": discrepancy.to_string(),
                    "status": status.code(),
                    "transaction_count": transactions.len(),
                }),
                "reconciliation_engine",
            ),
        )?;

        if matches {
            info!(statement_id, %computed_end, "statement reconciled");
        } else {
            warn!(statement_id, %computed_end, %discrepancy, "statement has a discrepancy");
        }

        Ok(ReconciliationResult {
            matches,
            computed_end_balance: computed_end,
            discrepancy,
            transaction_count: transactions.len(),
            statement: db::require_account_statement(ctx, statement.id)?,
        })
    }

    /// Reconcile an account's statements, oldest first.
    ///
    /// Without `all_periods`, statements whose last discrepancy was exactly zero are skipped.
    pub fn reconcile_by_account(
        ctx: &BookContext,
        account_slug: &str,
        all_periods: bool,
    ) -> Result<Vec<ReconciliationResult>> {
        let book_id = ctx.book().id;
        let account = db::find_account_by_slug(ctx, book_id, account_slug)?
            .ok_or_else(|| LedgerError::not_found("account", account_slug))?;

        db::list_account_statements(ctx, book_id, Some(account.id))?
            .into_iter()
            .filter(|s| all_periods || s.discrepancy != Some(Decimal::ZERO))
            .map(|s| Self::reconcile_statement(ctx, s.id))
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
