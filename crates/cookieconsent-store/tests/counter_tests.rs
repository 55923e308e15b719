//! Consent counter: accumulation, empty reads, and concurrent writers

use cookieconsent_core::{ConsentTotals, Error, TableNames};
use cookieconsent_store::tables::{create_table_sql, TableKind};
use cookieconsent_store::*;
use std::thread;
use std::time::Duration;

fn row_count(db: &Database) -> i64 {
    let table = db.tables().totals.clone();
    db.with_conn(|c| {
        c.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |r| r.get(0))
            .map_err(Error::storage)
    })
    .unwrap()
}

// ===========================================================================
// Reads
// ===========================================================================

#[test]
fn totals_on_empty_table_is_zero_and_writes_nothing() {
    let db = Database::open_in_memory(TableNames::default()).unwrap();
    let table = db.tables().totals.clone();
    db.with_conn(|c| {
        c.execute_batch(&create_table_sql(TableKind::Totals, &table))
            .map_err(Error::storage)
    })
    .unwrap();

    let counter = ConsentCounter::new(db.clone());
    let totals = counter.totals().unwrap();
    assert_eq!(totals, ConsentTotals::zero());
    assert_eq!(totals.acceptance_rate(), None);
    assert_eq!(row_count(&db), 0);
}

#[test]
fn installed_store_starts_at_zero_with_one_row() {
    let db = Database::open_in_memory(TableNames::default()).unwrap();
    install(&db).unwrap();
    let totals = ConsentCounter::new(db.clone()).totals().unwrap();
    assert_eq!((totals.accepted, totals.rejected), (0, 0));
    assert!(totals.record_id.is_some());
    assert_eq!(row_count(&db), 1);
}

// ===========================================================================
// Writes
// ===========================================================================

#[test]
fn responses_sum_elementwise() {
    let db = Database::open_in_memory(TableNames::default()).unwrap();
    install(&db).unwrap();
    let counter = ConsentCounter::new(db.clone());
    let deltas = [(1, 0), (0, 1), (1, 1), (3, 0), (0, 0)];
    for (a, r) in deltas {
        counter.record_response(a, r).unwrap();
    }
    let totals = counter.totals().unwrap();
    assert_eq!(totals.accepted, 5);
    assert_eq!(totals.rejected, 2);
    assert_eq!(row_count(&db), 1);
}

#[test]
fn record_bumps_updated_at_only() {
    let t0 = chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    let t1 = chrono::DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    let base = Database::open_in_memory(TableNames::default()).unwrap();
    let db = base.clone().with_clock(std::sync::Arc::new(FixedClock(t0)));
    install(&db).unwrap();

    let later = base.with_clock(std::sync::Arc::new(FixedClock(t1)));
    let totals = ConsentCounter::new(later).record_response(1, 0).unwrap();
    assert_eq!(totals.created_at, Some(t0));
    assert_eq!(totals.updated_at, Some(t1));
}

// ===========================================================================
// Concurrency
// ===========================================================================

#[test]
fn concurrent_threads_lose_no_updates() {
    let db = Database::open_in_memory(TableNames::default()).unwrap();
    install(&db).unwrap();
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let counter = ConsentCounter::new(db.clone());
            thread::spawn(move || {
                for _ in 0..25 {
                    if i % 2 == 0 {
                        counter.record_response(1, 0).unwrap();
                    } else {
                        counter.record_response(0, 1).unwrap();
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let totals = ConsentCounter::new(db).totals().unwrap();
    assert_eq!(totals.accepted, 100);
    assert_eq!(totals.rejected, 100);
}

#[test]
fn separate_connections_lose_no_updates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("consent.db");
    let timeout = Duration::from_secs(10);
    let first = Database::open(&path, TableNames::default(), timeout).unwrap();
    install(&first).unwrap();
    let second = Database::open(&path, TableNames::default(), timeout).unwrap();

    let handles: Vec<_> = [first.clone(), second]
        .into_iter()
        .flat_map(|db| {
            (0..3).map(move |_| {
                let counter = ConsentCounter::new(db.clone());
                thread::spawn(move || {
                    for _ in 0..20 {
                        counter.record_response(1, 2).unwrap();
                    }
                })
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let totals = ConsentCounter::new(first).totals().unwrap();
    assert_eq!(totals.accepted, 120);
    assert_eq!(totals.rejected, 240);
}
