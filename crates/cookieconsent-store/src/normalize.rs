//! Schema normalizer - brings whatever layout a previous version left
//! behind into the canonical shape.
//!
//! Every step inspects the current state before acting, so `normalize()`
//! can be re-run at any point (including after an interrupted run) and a
//! run against an already canonical store changes nothing.
//!
//! Per existing table, in order:
//!   1. foreign keys      drop any (totals and registry only)    best-effort
//!   2. primary key       make `id` an AUTOINCREMENT key        best-effort
//!   3. columns           legacy renames, missing payload cols,
//!                        registry categories lowercased        required
//!   4. metadata          dates and uid added and backfilled    required
//!   5. tighten dates     date columns NOT NULL                 best-effort, silent
//! Then consolidation of the totals table, seeding of the banner table and
//! the registry indexes (best-effort per index).

use crate::banner;
use crate::counter;
use crate::db::{Database, StorageResultExt};
use crate::schema::{index_exists, inspect, quote_ident, rebuild, table_exists, RebuildPlan, TableShape};
use crate::tables::{
    create_index_sql, registry, registry_indexes, totals, TableKind, DATE_CREATED, DATE_UPDATED,
    ID, UID,
};
use chrono::{DateTime, Utc};
use cookieconsent_core::{CookieCategory, Error, Result};
use rusqlite::{params, Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ============================================================
// Report
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    ForeignKeys,
    PrimaryKey,
    Columns,
    Metadata,
    TightenDates,
    Consolidate,
    Seed,
    Index,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Applied(String),
    /// State was already canonical.
    NoOp,
    /// Best-effort step that failed; normalization carried on.
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub table: String,
    pub step: Step,
    /// Index name for `Index` steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalizeReport {
    /// None of the tables existed; nothing was done.
    pub fresh_install: bool,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<StepRecord>,
}

impl NormalizeReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            fresh_install: false,
            started_at,
            steps: Vec::new(),
        }
    }

    fn push(&mut self, table: &str, step: Step, target: Option<String>, outcome: StepOutcome) {
        match &outcome {
            StepOutcome::Applied(detail) => info!(table, ?step, target = ?target, %detail, "normalized"),
            StepOutcome::NoOp => debug!(table, ?step, target = ?target, "already canonical"),
            StepOutcome::Skipped(_) => {}
        }
        self.steps.push(StepRecord {
            table: table.to_string(),
            step,
            target,
            outcome,
        });
    }

    /// True when every step found the store already canonical.
    pub fn is_noop(&self) -> bool {
        self.steps.iter().all(|s| s.outcome == StepOutcome::NoOp)
    }

    /// Outcome of the first record for `table` and `step`.
    pub fn outcome(&self, table: &str, step: Step) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| s.table == table && s.step == step)
            .map(|s| &s.outcome)
    }

    pub fn applied(&self) -> Vec<&StepRecord> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Applied(_)))
            .collect()
    }

    pub fn skipped(&self) -> Vec<&StepRecord> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Skipped(_)))
            .collect()
    }
}

// ============================================================
// Normalizer
// ============================================================

#[derive(Clone, Debug)]
pub struct SchemaNormalizer {
    db: Database,
}

impl SchemaNormalizer {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn normalize(&self) -> Result<NormalizeReport> {
        let tables = self.db.tables().clone();
        let now = self.db.now();
        let mut report = NormalizeReport::new(now);

        let layout = [
            (TableKind::Totals, tables.totals.as_str()),
            (TableKind::Registry, tables.registry.as_str()),
            (TableKind::Banner, tables.banner.as_str()),
        ];
        let mut present = Vec::new();
        self.db.with_conn(|conn| {
            for (kind, name) in layout {
                if table_exists(conn, name)? {
                    present.push((kind, name));
                }
            }
            Ok(())
        })?;
        if present.is_empty() {
            info!("no cookie consent tables found, nothing to normalize");
            report.fresh_install = true;
            return Ok(report);
        }

        for &(kind, table) in &present {
            if kind != TableKind::Banner {
                let outcome = self.best_effort(table, "drop foreign keys", |conn| {
                    drop_foreign_keys(conn, table)
                });
                report.push(table, Step::ForeignKeys, None, outcome);
            }
            let outcome = self.best_effort(table, "canonicalize primary key", |conn| {
                canonicalize_key(conn, table)
            });
            report.push(table, Step::PrimaryKey, None, outcome);

            let outcome = self.db.with_conn(|conn| ensure_columns(conn, kind, table))?;
            report.push(table, Step::Columns, None, outcome);

            let outcome = self.backfill_metadata(table, now)?;
            report.push(table, Step::Metadata, None, outcome);

            let outcome = match self.db.with_conn(|conn| tighten_dates(conn, table)) {
                Ok(outcome) => outcome,
                Err(e) => {
                    debug!(table, error = %e, "date columns left nullable");
                    StepOutcome::Skipped(e.to_string())
                }
            };
            report.push(table, Step::TightenDates, None, outcome);
        }

        for &(kind, table) in &present {
            match kind {
                TableKind::Totals => {
                    let outcome = self.consolidate(table, now)?;
                    report.push(table, Step::Consolidate, None, outcome);
                }
                TableKind::Banner => {
                    let outcome = self.seed_banner(table, now)?;
                    report.push(table, Step::Seed, None, outcome);
                }
                TableKind::Registry => self.ensure_indexes(table, &mut report),
            }
        }

        info!(
            applied = report.applied().len(),
            skipped = report.skipped().len(),
            "normalization finished"
        );
        Ok(report)
    }

    /// Run a constraint-changing step; a failure is reported as
    /// [`Error::ConstraintDropUnsupported`] and recorded as skipped.
    fn best_effort(
        &self,
        table: &str,
        operation: &str,
        f: impl FnOnce(&mut Connection) -> Result<StepOutcome>,
    ) -> StepOutcome {
        match self.db.with_conn(f) {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = Error::constraint_drop_unsupported(table, operation, e);
                warn!(table, operation, error = %err, "best-effort step failed, continuing");
                StepOutcome::Skipped(err.to_string())
            }
        }
    }

    fn backfill_metadata(&self, table: &str, now: DateTime<Utc>) -> Result<StepOutcome> {
        self.db.with_conn(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .storage()?;
            let shape = require_shape(&tx, table)?;
            let t = quote_ident(table);
            let mut changes = Vec::new();

            for column in [DATE_CREATED, DATE_UPDATED, UID] {
                if !shape.has_column(column) {
                    tx.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {} TEXT", t, quote_ident(column)))
                        .storage()?;
                    changes.push(format!("added {}", column));
                }
            }
            for column in [DATE_CREATED, DATE_UPDATED] {
                let n = tx
                    .execute(
                        &format!("UPDATE {t} SET {c} = ?1 WHERE {c} IS NULL", c = quote_ident(column)),
                        params![now],
                    )
                    .storage()?;
                if n > 0 {
                    changes.push(format!("backfilled {} {}", n, column));
                }
            }

            // Each row needs its own token, so this is a per-row loop.
            let rowids: Vec<i64> = {
                let mut stmt = tx
                    .prepare(&format!(
                        "SELECT rowid FROM {t} WHERE {u} IS NULL OR {u} = '' ORDER BY rowid",
                        u = quote_ident(UID)
                    ))
                    .storage()?;
                let rows = stmt.query_map([], |row| row.get(0)).storage()?;
                rows.collect::<rusqlite::Result<_>>().storage()?
            };
            if !rowids.is_empty() {
                let sql = format!("UPDATE {} SET {} = ?1 WHERE rowid = ?2", t, quote_ident(UID));
                let mut stmt = tx.prepare(&sql).storage()?;
                for rowid in &rowids {
                    stmt.execute(params![self.db.new_uid(), rowid]).storage()?;
                }
                changes.push(format!("backfilled {} uid", rowids.len()));
            }

            tx.commit().storage()?;
            Ok(outcome_from(changes))
        })
    }

    fn consolidate(&self, table: &str, now: DateTime<Utc>) -> Result<StepOutcome> {
        self.db.with_conn(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .storage()?;
            let zeroed = tx
                .execute(
                    &format!(
                        "UPDATE {t} SET {a} = COALESCE({a}, 0), {r} = COALESCE({r}, 0) \
                         WHERE {a} IS NULL OR {r} IS NULL",
                        t = quote_ident(table),
                        a = quote_ident(totals::ACCEPTED),
                        r = quote_ident(totals::REJECTED),
                    ),
                    [],
                )
                .storage()?;
            let rows = counter::row_count(&tx, table)?;
            let outcome = match rows {
                0 => {
                    counter::insert_row(&tx, table, 0, 0, now, &self.db.new_uid())?;
                    StepOutcome::Applied("inserted zero totals".into())
                }
                1 if zeroed > 0 => StepOutcome::Applied(format!("zeroed null counters in {} row(s)", zeroed)),
                1 => StepOutcome::NoOp,
                _ => {
                    let t = quote_ident(table);
                    let id = quote_ident(ID);
                    let (accepted, rejected, keep): (i64, i64, Option<i64>) = tx
                        .query_row(
                            &format!(
                                "SELECT COALESCE(SUM({a}), 0), COALESCE(SUM({r}), 0), MIN({id}) FROM {t}",
                                a = quote_ident(totals::ACCEPTED),
                                r = quote_ident(totals::REJECTED),
                            ),
                            [],
                            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                        )
                        .storage()?;
                    let keep = keep.ok_or_else(|| {
                        Error::Internal(format!("{} has {} rows but none has an id", table, rows))
                    })?;
                    let kept_row = format!("(SELECT MIN(rowid) FROM {t} WHERE {id} = ?1)");
                    tx.execute(
                        &format!(
                            "UPDATE {t} SET {a} = ?2, {r} = ?3 WHERE rowid = {kept_row}",
                            a = quote_ident(totals::ACCEPTED),
                            r = quote_ident(totals::REJECTED),
                        ),
                        params![keep, accepted, rejected],
                    )
                    .storage()?;
                    let removed = tx
                        .execute(&format!("DELETE FROM {t} WHERE rowid <> {kept_row}"), params![keep])
                        .storage()?;
                    StepOutcome::Applied(format!(
                        "merged {} rows into id {} ({} accepted, {} rejected)",
                        removed + 1,
                        keep,
                        accepted,
                        rejected
                    ))
                }
            };
            tx.commit().storage()?;
            Ok(outcome)
        })
    }

    fn seed_banner(&self, table: &str, now: DateTime<Utc>) -> Result<StepOutcome> {
        self.db.with_conn(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .storage()?;
            if banner::row_count(&tx, table)? > 0 {
                return Ok(StepOutcome::NoOp);
            }
            banner::insert_default(&tx, table, now, &self.db.new_uid())?;
            tx.commit().storage()?;
            Ok(StepOutcome::Applied("inserted default banner config".into()))
        })
    }

    fn ensure_indexes(&self, table: &str, report: &mut NormalizeReport) {
        for (index, column) in registry_indexes(table) {
            let result = self.db.with_conn(|conn| {
                if index_exists(conn, &index)? {
                    return Ok(StepOutcome::NoOp);
                }
                conn.execute_batch(&create_index_sql(&index, table, column))
                    .storage()?;
                Ok(StepOutcome::Applied(format!("created on {}", column)))
            });
            let outcome = result.unwrap_or_else(|e| {
                warn!(table, index = %index, error = %e, "index not created, continuing");
                StepOutcome::Skipped(e.to_string())
            });
            report.push(table, Step::Index, Some(index), outcome);
        }
    }
}

// ============================================================
// Steps
// ============================================================

fn require_shape(conn: &Connection, table: &str) -> Result<TableShape> {
    inspect(conn, table)?.ok_or_else(|| Error::storage(format!("table {} disappeared", table)))
}

fn outcome_from(changes: Vec<String>) -> StepOutcome {
    if changes.is_empty() {
        StepOutcome::NoOp
    } else {
        StepOutcome::Applied(changes.join(", "))
    }
}

fn drop_foreign_keys(conn: &mut Connection, table: &str) -> Result<StepOutcome> {
    let shape = require_shape(conn, table)?;
    if shape.foreign_keys.is_empty() {
        return Ok(StepOutcome::NoOp);
    }
    let targets: Vec<&str> = shape
        .foreign_keys
        .iter()
        .map(|fk| fk.target_table.as_str())
        .collect();
    let tx = conn.transaction().storage()?;
    let plan = RebuildPlan {
        drop_foreign_keys: true,
        ..RebuildPlan::default()
    };
    rebuild(&tx, &shape, &plan)?;
    tx.commit().storage()?;
    Ok(StepOutcome::Applied(format!(
        "dropped {} foreign key(s) into {}",
        targets.len(),
        targets.join(", ")
    )))
}

fn canonicalize_key(conn: &mut Connection, table: &str) -> Result<StepOutcome> {
    let shape = require_shape(conn, table)?;
    if shape.id_is_canonical_key() {
        return Ok(StepOutcome::NoOp);
    }
    let tx = conn.transaction().storage()?;
    let detail = if shape.has_column(ID) {
        let assigned = assign_placeholder_ids(&tx, table)?;
        format!("made id an auto-increment key, {} placeholder id(s)", assigned)
    } else {
        "added auto-increment id from row identity".to_string()
    };
    let plan = RebuildPlan {
        canonical_id: true,
        ..RebuildPlan::default()
    };
    rebuild(&tx, &shape, &plan)?;
    tx.commit().storage()?;
    Ok(StepOutcome::Applied(detail))
}

/// Give rows with a NULL or duplicated `id` fresh values above the current
/// maximum. The first row (by rowid) holding a given id keeps it.
fn assign_placeholder_ids(conn: &Connection, table: &str) -> Result<usize> {
    let t = quote_ident(table);
    let id = quote_ident(ID);
    let max: i64 = conn
        .query_row(&format!("SELECT COALESCE(MAX({id}), 0) FROM {t}"), [], |row| row.get(0))
        .storage()?;
    let rowids: Vec<i64> = {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT rowid FROM {t} WHERE {id} IS NULL \
                 OR rowid NOT IN (SELECT MIN(rowid) FROM {t} WHERE {id} IS NOT NULL GROUP BY {id}) \
                 ORDER BY rowid"
            ))
            .storage()?;
        let rows = stmt.query_map([], |row| row.get(0)).storage()?;
        rows.collect::<rusqlite::Result<_>>().storage()?
    };
    let mut stmt = conn
        .prepare(&format!("UPDATE {t} SET {id} = ?1 WHERE rowid = ?2"))
        .storage()?;
    for (offset, rowid) in rowids.iter().enumerate() {
        let value = max + 1 + offset as i64;
        stmt.execute(params![value, rowid]).storage()?;
    }
    Ok(rowids.len())
}

fn ensure_columns(conn: &mut Connection, kind: TableKind, table: &str) -> Result<StepOutcome> {
    let tx = conn.transaction().storage()?;
    let t = quote_ident(table);
    let mut changes = Vec::new();

    let shape = require_shape(&tx, table)?;
    for (old, new) in kind.legacy_renames() {
        if shape.has_column(old) && !shape.has_column(new) {
            tx.execute_batch(&format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                t,
                quote_ident(old),
                quote_ident(new)
            ))
            .storage()?;
            changes.push(format!("renamed {} to {}", old, new));
        }
    }

    let shape = require_shape(&tx, table)?;
    for spec in kind.payload_columns() {
        if !shape.has_column(spec.name) {
            tx.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                t,
                quote_ident(spec.name),
                spec.definition
            ))
            .storage()?;
            changes.push(format!("added {}", spec.name));
        }
    }

    if kind == TableKind::Registry {
        let n = canonicalize_categories(&tx, table)?;
        if n > 0 {
            changes.push(format!("canonicalized {} category value(s)", n));
        }
    }

    tx.commit().storage()?;
    Ok(outcome_from(changes))
}

/// Rewrite stored categories to the lowercase names the registry filters
/// on. Values that do not name a category become `other`, which is how
/// they read back anyway.
fn canonicalize_categories(conn: &Connection, table: &str) -> Result<usize> {
    let t = quote_ident(table);
    let c = quote_ident(registry::CATEGORY);
    let stale: Vec<(i64, &'static str)> = {
        let mut stmt = conn
            .prepare(&format!("SELECT rowid, {c} FROM {t}"))
            .storage()?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)))
            .storage()?;
        let mut stale = Vec::new();
        for row in rows {
            let (rowid, stored) = row.storage()?;
            let canonical = stored
                .as_deref()
                .and_then(|v| v.parse::<CookieCategory>().ok())
                .unwrap_or(CookieCategory::Other)
                .as_str();
            if stored.as_deref() != Some(canonical) {
                stale.push((rowid, canonical));
            }
        }
        stale
    };
    let mut stmt = conn
        .prepare(&format!("UPDATE {t} SET {c} = ?1 WHERE rowid = ?2"))
        .storage()?;
    for (rowid, canonical) in &stale {
        stmt.execute(params![canonical, rowid]).storage()?;
    }
    Ok(stale.len())
}

fn tighten_dates(conn: &mut Connection, table: &str) -> Result<StepOutcome> {
    let shape = require_shape(conn, table)?;
    let loose: Vec<String> = [DATE_CREATED, DATE_UPDATED]
        .iter()
        .filter(|c| shape.column(c).map_or(false, |col| !col.not_null))
        .map(|c| c.to_string())
        .collect();
    if loose.is_empty() {
        return Ok(StepOutcome::NoOp);
    }
    let tx = conn.transaction().storage()?;
    let plan = RebuildPlan {
        not_null: loose.clone(),
        ..RebuildPlan::default()
    };
    rebuild(&tx, &shape, &plan)?;
    tx.commit().storage()?;
    Ok(StepOutcome::Applied(format!("{} set NOT NULL", loose.join(", "))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cookieconsent_core::TableNames;

    fn db() -> Database {
        Database::open_in_memory(TableNames::with_prefix("t_").unwrap()).unwrap()
    }

    #[test]
    fn no_tables_is_fresh_install() {
        let report = SchemaNormalizer::new(db()).normalize().unwrap();
        assert!(report.fresh_install);
        assert!(report.steps.is_empty());
        assert!(report.is_noop());
    }

    #[test]
    fn placeholder_ids_are_distinct_and_above_max() {
        let c = Connection::open_in_memory().unwrap();
        c.execute_batch(
            "CREATE TABLE x (id INTEGER, v TEXT);
             INSERT INTO x VALUES (3, 'a'), (NULL, 'b'), (NULL, 'c'), (3, 'd');",
        )
        .unwrap();
        assert_eq!(assign_placeholder_ids(&c, "x").unwrap(), 3);
        let ids: Vec<i64> = c
            .prepare("SELECT id FROM x ORDER BY rowid")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(ids, vec![3, 4, 5, 6]);
    }

    #[test]
    fn report_serializes_outcome_inline() {
        let record = StepRecord {
            table: "t".into(),
            step: Step::Seed,
            target: None,
            outcome: StepOutcome::Applied("x".into()),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["step"], "seed");
        assert_eq!(json["outcome"], "applied");
        assert_eq!(json["detail"], "x");
        assert!(json.get("target").is_none());
    }
}
