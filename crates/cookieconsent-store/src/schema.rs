//! Schema inspection and table rebuilds.
//!
//! SQLite cannot drop constraints or change a column's key/nullability in
//! place, so those changes go through a rebuild: create a replacement table
//! with the desired definition, copy rows, drop the original, rename the
//! replacement, and recreate the original's explicit indexes. Callers run a
//! rebuild inside a transaction so a failure leaves the table untouched.

use crate::db::StorageResultExt;
use crate::tables::ID;
use cookieconsent_core::Result;
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeMap;

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    /// Default expression as SQL text, verbatim from the schema.
    pub default: Option<String>,
    /// 1-based position within the primary key, 0 if not part of it.
    pub pk: i64,
}

/// One foreign key constraint; multi-column keys carry several pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub id: i64,
    pub target_table: String,
    pub columns: Vec<(String, Option<String>)>,
    pub on_update: String,
    pub on_delete: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableShape {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub foreign_keys: Vec<ForeignKey>,
    pub autoincrement: bool,
    /// `CREATE INDEX` statements for explicitly created indexes.
    pub index_sql: Vec<String>,
}

impl TableShape {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Primary key column names in key order.
    pub fn primary_key(&self) -> Vec<&str> {
        let mut pk: Vec<&ColumnInfo> = self.columns.iter().filter(|c| c.pk > 0).collect();
        pk.sort_by_key(|c| c.pk);
        pk.into_iter().map(|c| c.name.as_str()).collect()
    }

    /// `id` is the sole key, declared INTEGER, and auto-incrementing.
    pub fn id_is_canonical_key(&self) -> bool {
        let Some(id) = self.column(ID) else {
            return false;
        };
        self.primary_key() == [id.name.as_str()]
            && id.decl_type.eq_ignore_ascii_case("INTEGER")
            && self.autoincrement
    }
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [name],
        |row| row.get(0),
    )
    .storage()
}

pub fn index_exists(conn: &Connection, name: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1)",
        [name],
        |row| row.get(0),
    )
    .storage()
}

/// Read a table's current shape, or `None` if it does not exist.
pub fn inspect(conn: &Connection, name: &str) -> Result<Option<TableShape>> {
    let create_sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )
        .optional()
        .storage()?;
    let Some(create_sql) = create_sql else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", quote_ident(name)))
        .storage()?;
    let columns = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                decl_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                not_null: row.get::<_, i64>(3)? != 0,
                default: row.get(4)?,
                pk: row.get(5)?,
            })
        })
        .storage()?
        .collect::<rusqlite::Result<Vec<_>>>()
        .storage()?;

    let mut stmt = conn
        .prepare(&format!("PRAGMA foreign_key_list({})", quote_ident(name)))
        .storage()?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })
        .storage()?
        .collect::<rusqlite::Result<Vec<_>>>()
        .storage()?;
    let mut grouped: BTreeMap<i64, ForeignKey> = BTreeMap::new();
    for (id, target_table, from, to, on_update, on_delete) in rows {
        grouped
            .entry(id)
            .or_insert_with(|| ForeignKey {
                id,
                target_table,
                columns: Vec::new(),
                on_update,
                on_delete,
            })
            .columns
            .push((from, to));
    }

    let mut stmt = conn
        .prepare(
            "SELECT sql FROM sqlite_master \
             WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL ORDER BY name",
        )
        .storage()?;
    let index_sql = stmt
        .query_map([name], |row| row.get::<_, String>(0))
        .storage()?
        .collect::<rusqlite::Result<Vec<_>>>()
        .storage()?;

    Ok(Some(TableShape {
        name: name.to_string(),
        columns,
        foreign_keys: grouped.into_values().collect(),
        autoincrement: create_sql.to_ascii_uppercase().contains("AUTOINCREMENT"),
        index_sql,
    }))
}

/// What a rebuild changes. The default plan reproduces the table as-is.
#[derive(Debug, Clone, Default)]
pub struct RebuildPlan {
    pub drop_foreign_keys: bool,
    /// Make `id` an `INTEGER PRIMARY KEY AUTOINCREMENT`, taking values from
    /// `rowid` if the table has no `id` column yet.
    pub canonical_id: bool,
    /// Columns to declare NOT NULL.
    pub not_null: Vec<String>,
}

/// Render the replacement table's `CREATE TABLE`.
pub fn render_create(shape: &TableShape, plan: &RebuildPlan, target: &str) -> String {
    let canonical_id = format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident(ID));
    let pk = shape.primary_key();
    let inline_pk = !plan.canonical_id && shape.autoincrement && pk.len() == 1;

    let mut defs = Vec::new();
    if plan.canonical_id && !shape.has_column(ID) {
        defs.push(canonical_id.clone());
    }
    for col in &shape.columns {
        if plan.canonical_id && col.name.eq_ignore_ascii_case(ID) {
            defs.push(canonical_id.clone());
            continue;
        }
        let mut def = quote_ident(&col.name);
        if !col.decl_type.is_empty() {
            def.push(' ');
            def.push_str(&col.decl_type);
        }
        if inline_pk && pk[0] == col.name {
            def.push_str(" PRIMARY KEY AUTOINCREMENT");
        }
        if col.not_null || plan.not_null.iter().any(|n| n.eq_ignore_ascii_case(&col.name)) {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &col.default {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        defs.push(def);
    }
    if !plan.canonical_id && !inline_pk && !pk.is_empty() {
        let cols: Vec<String> = pk.iter().map(|c| quote_ident(c)).collect();
        defs.push(format!("PRIMARY KEY ({})", cols.join(", ")));
    }
    if !plan.drop_foreign_keys {
        for fk in &shape.foreign_keys {
            let from: Vec<String> = fk.columns.iter().map(|(f, _)| quote_ident(f)).collect();
            let to: Vec<String> = fk
                .columns
                .iter()
                .filter_map(|(_, t)| t.as_deref().map(quote_ident))
                .collect();
            let mut def = format!(
                "FOREIGN KEY ({}) REFERENCES {}",
                from.join(", "),
                quote_ident(&fk.target_table)
            );
            if !to.is_empty() {
                def.push_str(&format!(" ({})", to.join(", ")));
            }
            def.push_str(&format!(" ON UPDATE {} ON DELETE {}", fk.on_update, fk.on_delete));
            defs.push(def);
        }
    }
    format!("CREATE TABLE {} (\n  {}\n)", quote_ident(target), defs.join(",\n  "))
}

/// Rebuild `shape.name` according to `plan`. Must run inside a transaction.
pub fn rebuild(conn: &Connection, shape: &TableShape, plan: &RebuildPlan) -> Result<()> {
    let scratch = format!("{}__rebuild", shape.name);
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(&scratch)))
        .storage()?;
    conn.execute_batch(&render_create(shape, plan, &scratch)).storage()?;

    let mut targets: Vec<String> = shape.columns.iter().map(|c| quote_ident(&c.name)).collect();
    let mut sources = targets.clone();
    if plan.canonical_id && !shape.has_column(ID) {
        targets.insert(0, quote_ident(ID));
        sources.insert(0, "rowid".to_string());
    }
    conn.execute_batch(&format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}",
        quote_ident(&scratch),
        targets.join(", "),
        sources.join(", "),
        quote_ident(&shape.name)
    ))
    .storage()?;

    conn.execute_batch(&format!("DROP TABLE {}", quote_ident(&shape.name)))
        .storage()?;
    conn.execute_batch(&format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_ident(&scratch),
        quote_ident(&shape.name)
    ))
    .storage()?;
    for sql in &shape.index_sql {
        conn.execute_batch(sql).storage()?;
    }
    Ok(())
}
