// 🗂️ Categorization Engine - cache → rules → fallback
// Picks the category account for a normalized payee. Rule hits are written
// back to the cache so the next lookup is a cache hit.

use crate::context::BookContext;
use crate::db::{self, Event};
use crate::error::Result;
use crate::model::{Account, AccountId, BookId, ImportFileId, Split};
use crate::payee::normalize_payee;
use crate::rules::CategoryRules;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub const CACHE_CONFIDENCE: f64 = 1.0;
pub const RULE_CONFIDENCE: f64 = 0.9;
pub const FALLBACK_CONFIDENCE: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Source {
    Cache,
    Rule,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Categorization {
    pub account_full_name: String,
    /// None only for a fallback whose Uncategorized account is missing from the book
    pub account_id: Option<AccountId>,
    pub source: Source,
    pub confidence: f64,
}

impl Categorization {
    pub fn is_fallback(&self) -> bool {
        self.source == Source::Fallback
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategorizeReport {
    pub total: usize,
    pub from_cache: usize,
    pub from_rule: usize,
    pub fallback: usize,
    /// Fraction in `0.0..=1.0` of looked-up transactions that got a real category
    /// (cache or rule); 0.0 when nothing was looked up. Multiply by 100 to display.
    pub success_rate: f64,
}

impl CategorizeReport {
    fn record(&mut self, source: Source) {
        self.total += 1;
        match source {
            Source::Cache => self.from_cache += 1,
            Source::Rule => self.from_rule += 1,
            Source::Fallback => self.fallback += 1,
        }
    }

    fn finish(mut self) -> Self {
        self.success_rate = if self.total == 0 {
            0.0
        } else {
            (self.from_cache + self.from_rule) as f64 / self.total as f64
        };
        self
    }
}

/// Narrow a bulk run to one account and/or one import file
#[derive(Debug, Clone, Copy, Default)]
pub struct CategorizeFilter {
    pub account_id: Option<AccountId>,
    pub import_file_id: Option<ImportFileId>,
}

pub struct CategorizationEngine {
    rules: CategoryRules,
    uncategorized: String,
}

impl CategorizationEngine {
    pub fn new(rules: CategoryRules, uncategorized: &str) -> Self {
        CategorizationEngine {
            rules,
            uncategorized: uncategorized.to_string(),
        }
    }

    pub fn uncategorized_account(&self) -> &str {
        &self.uncategorized
    }

    pub fn rules(&self) -> &CategoryRules {
        &self.rules
    }

    /// Resolve a category for `payee_norm`.
    ///
    /// With `update_cache` false nothing is written: no hit counts, no new entries.
    pub fn lookup(
        &self,
        conn: &Connection,
        book_id: BookId,
        payee_norm: &str,
        update_cache: bool,
    ) -> Result<Categorization> {
        if payee_norm.is_empty() {
            debug!("empty payee, falling back");
            return self.fallback(conn, book_id);
        }

        // Tier 1: cache
        if let Some(entry) = db::get_cached_category(conn, payee_norm)? {
            match db::get_account(conn, entry.account_id)? {
                Some(account) if account.book_id == book_id => {
                    if update_cache {
                        db::increment_cache_hit(conn, payee_norm)?;
                    }
                    debug!(payee = payee_norm, category = %account.full_name, "cache hit");
                    return Ok(Categorization {
                        account_full_name: account.full_name,
                        account_id: Some(account.id),
                        source: Source::Cache,
                        confidence: CACHE_CONFIDENCE,
                    });
                }
                _ => {
                    warn!(
                        payee = payee_norm,
                        account_id = entry.account_id,
                        "cached category account not in book, ignoring cache entry"
                    );
                }
            }
        }

        // Tier 2: rules
        if let Some(category) = self.rules.find(payee_norm) {
            match db::get_account_by_full_name(conn, book_id, category)? {
                Some(account) => {
                    if update_cache {
                        db::upsert_category_cache(conn, payee_norm, account.id)?;
                    }
                    debug!(payee = payee_norm, category, "rule hit");
                    return Ok(Categorization {
                        account_full_name: account.full_name,
                        account_id: Some(account.id),
                        source: Source::Rule,
                        confidence: RULE_CONFIDENCE,
                    });
                }
                None => {
                    warn!(payee = payee_norm, category, "rule names an account missing from the book");
                }
            }
        }

        // Tier 3: fallback
        debug!(payee = payee_norm, "no category found");
        self.fallback(conn, book_id)
    }

    fn fallback(&self, conn: &Connection, book_id: BookId) -> Result<Categorization> {
        let account = db::get_account_by_full_name(conn, book_id, &self.uncategorized)?;
        Ok(Categorization {
            account_full_name: self.uncategorized.clone(),
            account_id: account.map(|a| a.id),
            source: Source::Fallback,
            confidence: FALLBACK_CONFIDENCE,
        })
    }

    /// True if `account` is a parking spot that categorization should replace
    pub fn needs_category(&self, account: &Account) -> bool {
        account.placeholder || account.full_name == self.uncategorized
    }

    /// Re-point every parked split in the book to its looked-up category.
    ///
    /// `dry_run` reports what would happen and writes nothing.
    pub fn categorize(
        &self,
        ctx: &BookContext,
        filter: CategorizeFilter,
        dry_run: bool,
    ) -> Result<CategorizeReport> {
        let book_id = ctx.book().id;
        let accounts: HashMap<AccountId, Account> = db::list_accounts(ctx, book_id)?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();
        let uncategorized_id = accounts
            .values()
            .find(|a| a.full_name == self.uncategorized)
            .map(|a| a.id);

        let txns = db::transactions_needing_categorization(
            ctx,
            book_id,
            uncategorized_id,
            filter.account_id,
            filter.import_file_id,
        )?;

        let mut report = CategorizeReport::default();
        for txn in &txns {
            let Some(parked) = parked_split(&txn.splits, &accounts, self) else {
                continue;
            };

            let payee = txn
                .payee_norm
                .clone()
                .unwrap_or_else(|| normalize_payee(&txn.description));
            let result = self.lookup(ctx, book_id, &payee, !dry_run)?;
            report.record(result.source);

            let Some(target) = result.account_id.filter(|_| !result.is_fallback()) else {
                continue;
            };
            if dry_run || target == parked.account_id {
                continue;
            }

            db::set_split_account(ctx, parked.id, target)?;
            db::insert_event(
                ctx,
                &Event::new(
                    "split_categorized",
                    "transaction",
                    txn.id,
                    serde_json::json!({
                        "split_id": parked.id,
                        "from_account_id": parked.account_id,
                        "to_account_id": target,
                        "source": result.source,
                    }),
                    "categorization_engine",
                ),
            )?;
        }

        let report = report.finish();
        info!(
            total = report.total,
            cache = report.from_cache,
            rule = report.from_rule,
            fallback = report.fallback,
            dry_run,
            "categorization finished"
        );
        Ok(report)
    }
}

fn parked_split<'a>(
    splits: &'a [Split],
    accounts: &HashMap<AccountId, Account>,
    engine: &CategorizationEngine,
) -> Option<&'a Split> {
    splits.iter().find(|s| {
        accounts
            .get(&s.account_id)
            .map(|a| engine.needs_category(a))
            .unwrap_or(false)
    })
}
