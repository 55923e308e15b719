//! Cookie registry - declarations of the cookies a site sets.

use crate::db::{Database, StorageResultExt};
use crate::schema::quote_ident;
use crate::tables::{registry, DATE_CREATED, DATE_UPDATED, ID, UID};
use chrono::{DateTime, Utc};
use cookieconsent_core::{
    CookieCategory, CookieDeclaration, CookieFields, CookieInput, Error, Result,
};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct CookieRegistry {
    db: Database,
}

impl CookieRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn table(&self) -> String {
        quote_ident(&self.db.tables().registry)
    }

    pub fn create(&self, input: &CookieInput) -> Result<CookieDeclaration> {
        let fields = input.validate()?;
        let now = self.db.now();
        let uid = self.db.new_uid();
        let table = self.table();
        let id = self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)",
                    table,
                    quote_ident(registry::CATEGORY),
                    quote_ident(registry::COOKIE_ID),
                    quote_ident(registry::DOMAIN),
                    quote_ident(registry::DURATION),
                    quote_ident(registry::DESCRIPTION),
                    quote_ident(DATE_CREATED),
                    quote_ident(DATE_UPDATED),
                    quote_ident(UID),
                ),
                params![
                    fields.category.as_str(),
                    fields.cookie_id,
                    fields.domain,
                    fields.duration,
                    fields.description,
                    now,
                    uid,
                ],
            )
            .storage()?;
            Ok(conn.last_insert_rowid())
        })?;
        info!(id, cookie_id = %fields.cookie_id, category = %fields.category, "declared cookie");
        Ok(declaration(id, fields, now, now, uid))
    }

    pub fn get(&self, id: i64) -> Result<Option<CookieDeclaration>> {
        let sql = format!("SELECT {} FROM {} WHERE {} = ?1", select_columns(), self.table(), quote_ident(ID));
        self.db.with_conn(|conn| {
            conn.query_row(&sql, [id], from_row).optional().storage()
        })
    }

    /// All declarations, optionally limited to one category, ordered by
    /// category then cookie name.
    pub fn list(&self, category: Option<CookieCategory>) -> Result<Vec<CookieDeclaration>> {
        let mut sql = format!("SELECT {} FROM {}", select_columns(), self.table());
        if category.is_some() {
            sql.push_str(&format!(" WHERE {} = ?1", quote_ident(registry::CATEGORY)));
        }
        sql.push_str(&format!(
            " ORDER BY {}, {}, {}",
            quote_ident(registry::CATEGORY),
            quote_ident(registry::COOKIE_ID),
            quote_ident(ID)
        ));
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).storage()?;
            let rows = match category {
                Some(c) => stmt.query_map([c.as_str()], from_row),
                None => stmt.query_map([], from_row),
            }
            .storage()?;
            rows.collect::<rusqlite::Result<Vec<_>>>().storage()
        })
    }

    /// Declarations bucketed by category, for rendering the preferences
    /// panel. Categories with no cookies are absent.
    pub fn grouped(&self) -> Result<BTreeMap<CookieCategory, Vec<CookieDeclaration>>> {
        let mut groups: BTreeMap<CookieCategory, Vec<CookieDeclaration>> = BTreeMap::new();
        for cookie in self.list(None)? {
            groups.entry(cookie.category).or_default().push(cookie);
        }
        Ok(groups)
    }

    /// Replace every field of declaration `id`.
    pub fn update(&self, id: i64, input: &CookieInput) -> Result<CookieDeclaration> {
        let fields = input.validate()?;
        let now = self.db.now();
        let sql = format!(
            "UPDATE {} SET {} = ?1, {} = ?2, {} = ?3, {} = ?4, {} = ?5, {} = ?6 WHERE {} = ?7",
            self.table(),
            quote_ident(registry::CATEGORY),
            quote_ident(registry::COOKIE_ID),
            quote_ident(registry::DOMAIN),
            quote_ident(registry::DURATION),
            quote_ident(registry::DESCRIPTION),
            quote_ident(DATE_UPDATED),
            quote_ident(ID),
        );
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                &sql,
                params![
                    fields.category.as_str(),
                    fields.cookie_id,
                    fields.domain,
                    fields.duration,
                    fields.description,
                    now,
                    id,
                ],
            )
            .storage()
        })?;
        if changed == 0 {
            return Err(Error::NotFound(format!("cookie {}", id)));
        }
        debug!(id, "updated cookie declaration");
        self.get(id)?
            .ok_or_else(|| Error::NotFound(format!("cookie {}", id)))
    }

    /// Remove declaration `id`. Returns whether a row was deleted.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE {} = ?1", self.table(), quote_ident(ID));
        let changed = self
            .db
            .with_conn(|conn| conn.execute(&sql, [id]).storage())?;
        if changed > 0 {
            info!(id, "removed cookie declaration");
        }
        Ok(changed > 0)
    }

    pub fn count(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table());
        let n: i64 = self
            .db
            .with_conn(|conn| conn.query_row(&sql, [], |row| row.get(0)).storage())?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

fn declaration(
    id: i64,
    fields: CookieFields,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    uid: String,
) -> CookieDeclaration {
    CookieDeclaration {
        id,
        category: fields.category,
        cookie_id: fields.cookie_id,
        domain: fields.domain,
        duration: fields.duration,
        description: fields.description,
        created_at,
        updated_at,
        uid,
    }
}

fn select_columns() -> String {
    [
        ID,
        registry::CATEGORY,
        registry::COOKIE_ID,
        registry::DOMAIN,
        registry::DURATION,
        registry::DESCRIPTION,
        DATE_CREATED,
        DATE_UPDATED,
        UID,
    ]
    .iter()
    .map(|c| quote_ident(c))
    .collect::<Vec<_>>()
    .join(", ")
}

// Rows written before normalization may carry NULLs or categories this
// build does not know; they read back as empty strings and `Other`.
fn from_row(row: &Row<'_>) -> rusqlite::Result<CookieDeclaration> {
    let text = |i: usize| -> rusqlite::Result<String> {
        Ok(row.get::<_, Option<String>>(i)?.unwrap_or_default())
    };
    let category = text(1)?.parse().unwrap_or(CookieCategory::Other);
    Ok(CookieDeclaration {
        id: row.get(0)?,
        category,
        cookie_id: text(2)?,
        domain: text(3)?,
        duration: text(4)?,
        description: text(5)?,
        created_at: row.get::<_, Option<DateTime<Utc>>>(6)?.unwrap_or_default(),
        updated_at: row.get::<_, Option<DateTime<Utc>>>(7)?.unwrap_or_default(),
        uid: text(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::install;
    use cookieconsent_core::TableNames;

    fn registry() -> CookieRegistry {
        let db = Database::open_in_memory(TableNames::default()).unwrap();
        install(&db).unwrap();
        CookieRegistry::new(db)
    }

    #[test]
    fn create_then_get() {
        let reg = registry();
        let created = reg
            .create(&CookieInput::new("analytics", "_ga", ".example.com", "2 years", "GA id"))
            .unwrap();
        assert!(created.id > 0);
        assert_eq!(created.uid.len(), 36);
        let fetched = reg.get(created.id).unwrap().unwrap();
        assert_eq!(fetched.cookie_id, "_ga");
        assert_eq!(fetched.category, CookieCategory::Analytics);
        assert_eq!(fetched.uid, created.uid);
    }

    #[test]
    fn blank_field_is_rejected_without_insert() {
        let reg = registry();
        let err = reg
            .create(&CookieInput::new("analytics", "  ", "x", "y", "z"))
            .unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "cookieId"));
        assert_eq!(reg.count().unwrap(), 0);
    }

    #[test]
    fn update_missing_is_not_found() {
        let reg = registry();
        let err = reg
            .update(42, &CookieInput::new("required", "sid", "x", "session", "d"))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn delete_reports_whether_removed() {
        let reg = registry();
        let c = reg
            .create(&CookieInput::new("required", "sid", "x", "session", "d"))
            .unwrap();
        assert!(reg.delete(c.id).unwrap());
        assert!(!reg.delete(c.id).unwrap());
        assert!(reg.get(c.id).unwrap().is_none());
    }

    #[test]
    fn unknown_category_reads_as_other() {
        let reg = registry();
        let table = reg.table();
        reg.db
            .with_conn(|c| {
                c.execute(
                    &format!(
                        "INSERT INTO {} (category, cookie_id, date_created, date_updated) \
                         VALUES ('marketing', 'm', '2020-01-01 00:00:00', '2020-01-01 00:00:00')",
                        table
                    ),
                    [],
                )
                .storage()
            })
            .unwrap();
        let all = reg.list(None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].category, CookieCategory::Other);
        assert_eq!(all[0].domain, "");
        assert_eq!(all[0].uid, "");
    }
}
