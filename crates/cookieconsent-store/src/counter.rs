//! Consent counter - single-row aggregate of accept/reject responses.
//!
//! Increments are one `SET n = n + ?` statement inside an IMMEDIATE
//! transaction, so concurrent responses from other threads or processes
//! sharing the database file are never lost.

use crate::db::{Database, StorageResultExt};
use crate::schema::{quote_ident, table_exists};
use crate::tables::{totals, DATE_CREATED, DATE_UPDATED, ID, UID};
use chrono::{DateTime, Utc};
use cookieconsent_core::{ConsentTotals, Error, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct ConsentCounter {
    db: Database,
}

impl ConsentCounter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Add one visitor response to the totals and return the new totals.
    /// Creates the row with the deltas as initial values if none exists.
    pub fn record_response(&self, accepted: u64, rejected: u64) -> Result<ConsentTotals> {
        let accepted_delta = to_sql_count("accepted", accepted)?;
        let rejected_delta = to_sql_count("rejected", rejected)?;
        let table = self.db.tables().totals.clone();
        let now = self.db.now();

        self.db.with_conn(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .storage()?;
            let t = quote_ident(&table);
            let changed = tx
                .execute(
                    &format!(
                        "UPDATE {t} SET {a} = COALESCE({a}, 0) + ?1, {r} = COALESCE({r}, 0) + ?2, {u} = ?3 \
                         WHERE {id} = (SELECT MIN({id}) FROM {t})",
                        a = quote_ident(totals::ACCEPTED),
                        r = quote_ident(totals::REJECTED),
                        u = quote_ident(DATE_UPDATED),
                        id = quote_ident(ID),
                    ),
                    params![accepted_delta, rejected_delta, now],
                )
                .storage()?;
            if changed == 0 {
                insert_row(&tx, &table, accepted_delta, rejected_delta, now, &self.db.new_uid())?;
            }
            let current = read_totals(&tx, &table)?.unwrap_or_default();
            tx.commit().storage()?;
            debug!(accepted, rejected, "recorded consent response");
            Ok(current)
        })
    }

    /// Current totals. Zeros, without writing anything, if no row exists.
    pub fn totals(&self) -> Result<ConsentTotals> {
        let table = self.db.tables().totals.clone();
        self.db.with_conn(|conn| {
            if !table_exists(conn, &table)? {
                return Ok(ConsentTotals::zero());
            }
            Ok(read_totals(conn, &table)?.unwrap_or_else(ConsentTotals::zero))
        })
    }
}

fn to_sql_count(field: &str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::validation(field, "delta out of range"))
}

pub(crate) fn row_count(conn: &Connection, table: &str) -> Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)), [], |row| {
        row.get(0)
    })
    .storage()
}

pub(crate) fn insert_row(
    conn: &Connection,
    table: &str,
    accepted: i64,
    rejected: i64,
    now: DateTime<Utc>,
    uid: &str,
) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {} ({}, {}, {}, {}, {}) VALUES (?1, ?2, ?3, ?3, ?4)",
            quote_ident(table),
            quote_ident(totals::ACCEPTED),
            quote_ident(totals::REJECTED),
            quote_ident(DATE_CREATED),
            quote_ident(DATE_UPDATED),
            quote_ident(UID),
        ),
        params![accepted, rejected, now, uid],
    )
    .storage()?;
    Ok(())
}

fn read_totals(conn: &Connection, table: &str) -> Result<Option<ConsentTotals>> {
    conn.query_row(
        &format!(
            "SELECT COALESCE({}, 0), COALESCE({}, 0), {}, {}, {} FROM {} ORDER BY {} LIMIT 1",
            quote_ident(totals::ACCEPTED),
            quote_ident(totals::REJECTED),
            quote_ident(DATE_CREATED),
            quote_ident(DATE_UPDATED),
            quote_ident(UID),
            quote_ident(table),
            quote_ident(ID),
        ),
        [],
        |row| {
            Ok(ConsentTotals {
                accepted: u64::try_from(row.get::<_, i64>(0)?).unwrap_or(0),
                rejected: u64::try_from(row.get::<_, i64>(1)?).unwrap_or(0),
                created_at: row.get(2)?,
                updated_at: row.get(3)?,
                record_id: row.get(4)?,
            })
        },
    )
    .optional()
    .storage()
}
