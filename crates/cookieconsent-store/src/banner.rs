//! Banner configuration - one logical row of texts and layout choices.

use crate::db::{Database, StorageResultExt};
use crate::schema::quote_ident;
use crate::tables::{banner, DATE_CREATED, DATE_UPDATED, ID, UID};
use chrono::{DateTime, Utc};
use cookieconsent_core::{BannerConfig, BannerConfigPatch, Result};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct BannerConfigStore {
    db: Database,
}

impl BannerConfigStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The current configuration. Writes the defaults first if the table
    /// is empty, so every caller sees the same persisted row.
    pub fn get(&self) -> Result<BannerConfig> {
        let table = self.db.tables().banner.clone();
        let now = self.db.now();
        self.db.with_conn(|conn| {
            if let Some(config) = read(conn, &table)? {
                return Ok(config);
            }
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .storage()?;
            if row_count(&tx, &table)? == 0 {
                insert_default(&tx, &table, now, &self.db.new_uid())?;
                info!(table = %table, "seeded default banner config");
            }
            let config = read(&tx, &table)?.unwrap_or_default();
            tx.commit().storage()?;
            Ok(config)
        })
    }

    /// Apply `patch` to the stored row and return the result.
    pub fn update(&self, patch: &BannerConfigPatch) -> Result<BannerConfig> {
        let table = self.db.tables().banner.clone();
        let now = self.db.now();
        self.db.with_conn(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .storage()?;
            if row_count(&tx, &table)? == 0 {
                insert_default(&tx, &table, now, &self.db.new_uid())?;
            }
            let mut config = read(&tx, &table)?.unwrap_or_default();
            if patch.is_empty() {
                tx.commit().storage()?;
                return Ok(config);
            }
            patch.apply(&mut config);
            config.updated_at = Some(now);
            write(&tx, &table, &config, now)?;
            tx.commit().storage()?;
            debug!("updated banner config");
            Ok(config)
        })
    }
}

fn select_columns() -> String {
    let mut cols: Vec<String> = banner::TEXT_COLUMNS.iter().map(|c| quote_ident(c)).collect();
    for c in [banner::LAYOUT, banner::POSITION, banner::TRIGGER_ICON, DATE_CREATED, DATE_UPDATED, UID] {
        cols.push(quote_ident(c));
    }
    cols.join(", ")
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<BannerConfig> {
    let text = |i: usize| -> rusqlite::Result<String> {
        Ok(row.get::<_, Option<String>>(i)?.unwrap_or_default())
    };
    let layout: Option<String> = row.get(11)?;
    let position: Option<String> = row.get(12)?;
    Ok(BannerConfig {
        popup_title: text(0)?,
        popup_description: text(1)?,
        popup_footer: text(2)?,
        preferences_title: text(3)?,
        preferences_description: text(4)?,
        required_cookies: text(5)?,
        functional_cookies: text(6)?,
        analytics_cookies: text(7)?,
        performance_cookies: text(8)?,
        advertising_cookies: text(9)?,
        security_cookies: text(10)?,
        layout: layout.and_then(|s| s.parse().ok()).unwrap_or_default(),
        position: position.and_then(|s| s.parse().ok()).unwrap_or_default(),
        trigger_icon: row.get::<_, Option<String>>(13)?.filter(|s| !s.is_empty()),
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
        uid: row.get(16)?,
    })
}

fn read(conn: &Connection, table: &str) -> Result<Option<BannerConfig>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM {} ORDER BY {} LIMIT 1",
            select_columns(),
            quote_ident(table),
            quote_ident(ID)
        ),
        [],
        from_row,
    )
    .optional()
    .storage()
}

fn write(conn: &Connection, table: &str, config: &BannerConfig, now: DateTime<Utc>) -> Result<()> {
    let sets: Vec<String> = banner::TEXT_COLUMNS
        .iter()
        .chain([banner::LAYOUT, banner::POSITION, banner::TRIGGER_ICON].iter())
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", quote_ident(c), i + 1))
        .collect();
    let t = quote_ident(table);
    conn.execute(
        &format!(
            "UPDATE {t} SET {}, {} = ?15 WHERE {id} = (SELECT MIN({id}) FROM {t})",
            sets.join(", "),
            quote_ident(DATE_UPDATED),
            id = quote_ident(ID),
        ),
        params![
            config.popup_title,
            config.popup_description,
            config.popup_footer,
            config.preferences_title,
            config.preferences_description,
            config.required_cookies,
            config.functional_cookies,
            config.analytics_cookies,
            config.performance_cookies,
            config.advertising_cookies,
            config.security_cookies,
            config.layout.as_str(),
            config.position.as_str(),
            config.trigger_icon,
            now,
        ],
    )
    .storage()?;
    Ok(())
}

pub(crate) fn row_count(conn: &Connection, table: &str) -> Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)), [], |row| {
        row.get(0)
    })
    .storage()
}

/// Insert the default configuration as a new row.
pub(crate) fn insert_default(
    conn: &Connection,
    table: &str,
    now: DateTime<Utc>,
    uid: &str,
) -> Result<()> {
    let d = BannerConfig::default();
    let mut cols: Vec<&str> = banner::TEXT_COLUMNS.to_vec();
    cols.extend([banner::LAYOUT, banner::POSITION, DATE_CREATED, DATE_UPDATED, UID]);
    let quoted: Vec<String> = cols.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("?{}", i)).collect();
    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            quoted.join(", "),
            placeholders.join(", ")
        ),
        params![
            d.popup_title,
            d.popup_description,
            d.popup_footer,
            d.preferences_title,
            d.preferences_description,
            d.required_cookies,
            d.functional_cookies,
            d.analytics_cookies,
            d.performance_cookies,
            d.advertising_cookies,
            d.security_cookies,
            d.layout.as_str(),
            d.position.as_str(),
            now,
            now,
            uid,
        ],
    )
    .storage()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::install;
    use cookieconsent_core::{BannerLayout, BannerPosition, TableNames, DEFAULT_POPUP_TITLE};

    fn store() -> BannerConfigStore {
        let db = Database::open_in_memory(TableNames::default()).unwrap();
        db.with_conn(|conn| {
            conn.execute_batch(&crate::tables::create_table_sql(
                crate::tables::TableKind::Banner,
                &db.tables().banner,
            ))
            .storage()
        })
        .unwrap();
        BannerConfigStore::new(db)
    }

    #[test]
    fn get_seeds_defaults_once() {
        let store = store();
        let first = store.get().unwrap();
        assert_eq!(first.popup_title, DEFAULT_POPUP_TITLE);
        assert!(first.uid.is_some());
        let second = store.get().unwrap();
        assert_eq!(first.uid, second.uid);
        let count = store
            .db
            .with_conn(|c| row_count(c, &store.db.tables().banner))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn patch_changes_only_named_fields() {
        let store = store();
        let before = store.get().unwrap();
        let patch = BannerConfigPatch {
            popup_title: Some("Cookies!".into()),
            layout: Some(BannerLayout::Bar),
            position: Some(BannerPosition::TopCenter),
            trigger_icon: Some("cookie.svg".into()),
            ..Default::default()
        };
        let after = store.update(&patch).unwrap();
        assert_eq!(after.popup_title, "Cookies!");
        assert_eq!(after.layout, BannerLayout::Bar);
        assert_eq!(after.position, BannerPosition::TopCenter);
        assert_eq!(after.trigger_icon.as_deref(), Some("cookie.svg"));
        assert_eq!(after.popup_description, before.popup_description);

        let reread = store.get().unwrap();
        assert_eq!(reread.popup_title, "Cookies!");
        assert_eq!(reread.layout, BannerLayout::Bar);
    }

    #[test]
    fn empty_trigger_icon_clears_it() {
        let store = store();
        store
            .update(&BannerConfigPatch { trigger_icon: Some("x.svg".into()), ..Default::default() })
            .unwrap();
        let cleared = store
            .update(&BannerConfigPatch { trigger_icon: Some(String::new()), ..Default::default() })
            .unwrap();
        assert!(cleared.trigger_icon.is_none());
    }

    #[test]
    fn unknown_stored_layout_reads_as_default() {
        let db = Database::open_in_memory(TableNames::default()).unwrap();
        install(&db).unwrap();
        let table = db.tables().banner.clone();
        db.with_conn(|c| {
            c.execute(&format!("UPDATE {} SET layout = 'sideways'", quote_ident(&table)), [])
                .storage()
        })
        .unwrap();
        let config = BannerConfigStore::new(db).get().unwrap();
        assert_eq!(config.layout, BannerLayout::Box);
    }
}
