// ✍️ Manual entry - book and remove transactions by hand
// Accounts are addressed by full name; the debit side gets +amount and the
// credit side -amount, so every entry balances.

use crate::context::BookContext;
use crate::db::{self, Event};
use crate::error::Result;
use crate::model::{NewTransaction, Transaction, TransactionId};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::info;

pub struct TransactionService;

impl TransactionService {
    /// Book a two-split entry; NotFound if either account is not in the book
    pub fn enter_transaction(
        ctx: &BookContext,
        date: NaiveDate,
        description: &str,
        debit_full_name: &str,
        credit_full_name: &str,
        amount: Decimal,
        memo: Option<&str>,
    ) -> Result<Transaction> {
        let book_id = ctx.book().id;
        let debit = db::require_account(ctx, book_id, debit_full_name)?;
        let credit = db::require_account(ctx, book_id, credit_full_name)?;

        let txn = NewTransaction::transfer(book_id, date, description, debit.id, credit.id, amount)
            .with_memo(memo.map(str::to_string));
        let txn_id = db::insert_transaction(ctx, &txn)?;

        db::insert_event(
            ctx,
            &Event::new(
                "transaction_entered",
                "transaction",
                txn_id,
                serde_json::json!({
                    "date": date,
                    "description": description,
                    "debit": debit.full_name,
                    "credit": credit.full_name,
                    "amount": amount.to_string(),
                }),
                "transaction_service",
            ),
        )?;
        info!(txn_id, %date, debit = %debit.full_name, credit = %credit.full_name, %amount, "transaction entered");

        db::require_transaction(ctx, txn_id)
    }

    pub fn delete_transaction(ctx: &BookContext, txn_id: TransactionId) -> Result<()> {
        db::delete_transaction(ctx, ctx.book().id, txn_id)?;
        db::insert_event(
            ctx,
            &Event::new(
                "transaction_deleted",
                "transaction",
                txn_id,
                serde_json::json!({}),
                "transaction_service",
            ),
        )?;
        info!(txn_id, "transaction deleted");
        Ok(())
    }

    pub fn list_transactions(ctx: &BookContext) -> Result<Vec<Transaction>> {
        db::list_transactions(ctx, ctx.book().id)
    }
}
