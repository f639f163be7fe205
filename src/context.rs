// 📘 Book context - one book, one storage transaction, explicit commit/rollback

use crate::db;
use crate::error::Result;
use crate::model::Book;
use rusqlite::{Connection, Transaction};
use std::ops::Deref;
use tracing::{debug, warn};

/// Everything a single ledger operation needs: the resolved book and the
/// storage transaction its reads and writes share.
///
/// Dropping a context without calling [`BookContext::commit`] rolls back.
pub struct BookContext<'conn> {
    tx: Transaction<'conn>,
    book: Book,
}

impl<'conn> BookContext<'conn> {
    /// Begin a transaction and resolve `book_name`; NotFound for an unknown book
    pub fn open(conn: &'conn mut Connection, book_name: &str) -> Result<Self> {
        let tx = conn.transaction()?;
        let book = db::require_book(&tx, book_name)?;
        debug!(book = %book.name, "opened book context");
        Ok(BookContext { tx, book })
    }

    pub fn book(&self) -> &Book {
        &self.book
    }

    pub fn conn(&self) -> &Connection {
        &self.tx
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        debug!(book = %self.book.name, "committed");
        Ok(())
    }

    pub fn rollback(self) -> Result<()> {
        self.tx.rollback()?;
        debug!(book = %self.book.name, "rolled back");
        Ok(())
    }

    /// Run `f` in a fresh context: commit on `Ok`, roll back on `Err`
    pub fn run<T>(
        conn: &'conn mut Connection,
        book_name: &str,
        f: impl FnOnce(&BookContext<'conn>) -> Result<T>,
    ) -> Result<T> {
        let ctx = BookContext::open(conn, book_name)?;
        match f(&ctx) {
            Ok(value) => {
                ctx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = ctx.rollback() {
                    warn!(book = book_name, error = %rollback_err, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

impl Deref for BookContext<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.tx
    }
}
