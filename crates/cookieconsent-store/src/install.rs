//! Install and uninstall the plugin tables.

use crate::banner;
use crate::counter;
use crate::db::{Database, StorageResultExt};
use crate::schema::quote_ident;
use crate::tables::{create_index_sql, create_table_sql, registry_indexes, TableKind};
use cookieconsent_core::Result;
use tracing::info;

/// Create the canonical tables and indexes if absent and seed the two
/// single-row tables. Existing tables and rows are left alone; legacy
/// layouts are the normalizer's job.
pub fn install(db: &Database) -> Result<()> {
    let tables = db.tables().clone();
    let now = db.now();
    db.with_conn(|conn| {
        let tx = conn.transaction().storage()?;
        tx.execute_batch(&create_table_sql(TableKind::Totals, &tables.totals))
            .storage()?;
        tx.execute_batch(&create_table_sql(TableKind::Registry, &tables.registry))
            .storage()?;
        tx.execute_batch(&create_table_sql(TableKind::Banner, &tables.banner))
            .storage()?;
        for (index, column) in registry_indexes(&tables.registry) {
            tx.execute_batch(&create_index_sql(&index, &tables.registry, column))
                .storage()?;
        }
        if counter::row_count(&tx, &tables.totals)? == 0 {
            counter::insert_row(&tx, &tables.totals, 0, 0, now, &db.new_uid())?;
        }
        if banner::row_count(&tx, &tables.banner)? == 0 {
            banner::insert_default(&tx, &tables.banner, now, &db.new_uid())?;
        }
        tx.commit().storage()?;
        info!(
            totals = %tables.totals,
            registry = %tables.registry,
            banner = %tables.banner,
            "installed cookie consent tables"
        );
        Ok(())
    })
}

/// Drop all three tables. Data is gone afterwards.
pub fn uninstall(db: &Database) -> Result<()> {
    let tables = db.tables().clone();
    db.with_conn(|conn| {
        let tx = conn.transaction().storage()?;
        for table in tables.all() {
            tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
                .storage()?;
        }
        tx.commit().storage()?;
        info!("uninstalled cookie consent tables");
        Ok(())
    })
}
