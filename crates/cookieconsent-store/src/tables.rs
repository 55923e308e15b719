//! Canonical table layout: column names, DDL, and the columns each table
//! must carry after normalization.

use crate::schema::quote_ident;

pub const ID: &str = "id";
pub const DATE_CREATED: &str = "date_created";
pub const DATE_UPDATED: &str = "date_updated";
pub const UID: &str = "uid";

/// Consent totals table
pub mod totals {
    pub const ACCEPTED: &str = "accepted";
    pub const REJECTED: &str = "rejected";
}

/// Cookie registry table
pub mod registry {
    pub const CATEGORY: &str = "category";
    pub const COOKIE_ID: &str = "cookie_id";
    pub const DOMAIN: &str = "domain";
    pub const DURATION: &str = "duration";
    pub const DESCRIPTION: &str = "description";
}

/// Banner config table
pub mod banner {
    pub const POPUP_TITLE: &str = "popup_title";
    pub const POPUP_DESCRIPTION: &str = "popup_description";
    pub const POPUP_FOOTER: &str = "popup_footer";
    pub const PREFERENCES_TITLE: &str = "preferences_title";
    pub const PREFERENCES_DESCRIPTION: &str = "preferences_description";
    pub const REQUIRED_COOKIES: &str = "required_cookies";
    pub const FUNCTIONAL_COOKIES: &str = "functional_cookies";
    pub const ANALYTICS_COOKIES: &str = "analytics_cookies";
    pub const PERFORMANCE_COOKIES: &str = "performance_cookies";
    pub const ADVERTISING_COOKIES: &str = "advertising_cookies";
    pub const SECURITY_COOKIES: &str = "security_cookies";
    pub const LAYOUT: &str = "layout";
    pub const POSITION: &str = "position";
    pub const TRIGGER_ICON: &str = "trigger_icon";

    /// Text columns in storage order.
    pub const TEXT_COLUMNS: [&str; 11] = [
        POPUP_TITLE,
        POPUP_DESCRIPTION,
        POPUP_FOOTER,
        PREFERENCES_TITLE,
        PREFERENCES_DESCRIPTION,
        REQUIRED_COOKIES,
        FUNCTIONAL_COOKIES,
        ANALYTICS_COOKIES,
        PERFORMANCE_COOKIES,
        ADVERTISING_COOKIES,
        SECURITY_COOKIES,
    ];
}

/// A payload column and the definition used when it has to be added to
/// an existing table with `ALTER TABLE ... ADD COLUMN`.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub definition: &'static str,
}

const fn col(name: &'static str, definition: &'static str) -> ColumnSpec {
    ColumnSpec { name, definition }
}

pub const TOTALS_COLUMNS: &[ColumnSpec] = &[
    col(totals::ACCEPTED, "INTEGER NOT NULL DEFAULT 0"),
    col(totals::REJECTED, "INTEGER NOT NULL DEFAULT 0"),
];

pub const REGISTRY_COLUMNS: &[ColumnSpec] = &[
    col(registry::CATEGORY, "TEXT"),
    col(registry::COOKIE_ID, "TEXT"),
    col(registry::DOMAIN, "TEXT"),
    col(registry::DURATION, "TEXT"),
    col(registry::DESCRIPTION, "TEXT"),
];

pub const BANNER_COLUMNS: &[ColumnSpec] = &[
    col(banner::POPUP_TITLE, "TEXT NOT NULL DEFAULT ''"),
    col(banner::POPUP_DESCRIPTION, "TEXT NOT NULL DEFAULT ''"),
    col(banner::POPUP_FOOTER, "TEXT NOT NULL DEFAULT ''"),
    col(banner::PREFERENCES_TITLE, "TEXT NOT NULL DEFAULT ''"),
    col(banner::PREFERENCES_DESCRIPTION, "TEXT NOT NULL DEFAULT ''"),
    col(banner::REQUIRED_COOKIES, "TEXT NOT NULL DEFAULT ''"),
    col(banner::FUNCTIONAL_COOKIES, "TEXT NOT NULL DEFAULT ''"),
    col(banner::ANALYTICS_COOKIES, "TEXT NOT NULL DEFAULT ''"),
    col(banner::PERFORMANCE_COOKIES, "TEXT NOT NULL DEFAULT ''"),
    col(banner::ADVERTISING_COOKIES, "TEXT NOT NULL DEFAULT ''"),
    col(banner::SECURITY_COOKIES, "TEXT NOT NULL DEFAULT ''"),
    col(banner::LAYOUT, "TEXT NOT NULL DEFAULT 'box'"),
    col(banner::POSITION, "TEXT NOT NULL DEFAULT 'bottom-left'"),
    col(banner::TRIGGER_ICON, "TEXT"),
];

const LEGACY_METADATA: &[(&str, &str)] =
    &[("dateCreated", DATE_CREATED), ("dateUpdated", DATE_UPDATED)];

const LEGACY_REGISTRY: &[(&str, &str)] =
    &[("type", registry::CATEGORY), ("cookieId", registry::COOKIE_ID)];

const LEGACY_BANNER: &[(&str, &str)] = &[
    ("popupTitle", banner::POPUP_TITLE),
    ("popupDescription", banner::POPUP_DESCRIPTION),
    ("popupFooter", banner::POPUP_FOOTER),
    ("preferencesTitle", banner::PREFERENCES_TITLE),
    ("preferencesDescription", banner::PREFERENCES_DESCRIPTION),
    ("requiredCookies", banner::REQUIRED_COOKIES),
    ("functionalCookies", banner::FUNCTIONAL_COOKIES),
    ("analyticsCookies", banner::ANALYTICS_COOKIES),
    ("performanceCookies", banner::PERFORMANCE_COOKIES),
    ("advertisingCookies", banner::ADVERTISING_COOKIES),
    ("securityCookies", banner::SECURITY_COOKIES),
    ("triggerIcon", banner::TRIGGER_ICON),
];

/// Which of the three plugin tables a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Totals,
    Registry,
    Banner,
}

impl TableKind {
    pub fn payload_columns(&self) -> &'static [ColumnSpec] {
        match self {
            TableKind::Totals => TOTALS_COLUMNS,
            TableKind::Registry => REGISTRY_COLUMNS,
            TableKind::Banner => BANNER_COLUMNS,
        }
    }

    /// `(old, new)` column renames carried over from earlier layouts,
    /// metadata columns first.
    pub fn legacy_renames(&self) -> Vec<(&'static str, &'static str)> {
        let mut renames = LEGACY_METADATA.to_vec();
        renames.extend_from_slice(match self {
            TableKind::Totals => &[],
            TableKind::Registry => LEGACY_REGISTRY,
            TableKind::Banner => LEGACY_BANNER,
        });
        renames
    }
}

/// `CREATE TABLE IF NOT EXISTS` statement for the canonical layout.
pub fn create_table_sql(kind: TableKind, table: &str) -> String {
    let mut defs = vec![format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident(ID))];
    for spec in kind.payload_columns() {
        defs.push(format!("{} {}", quote_ident(spec.name), spec.definition));
    }
    defs.push(format!("{} TEXT NOT NULL", quote_ident(DATE_CREATED)));
    defs.push(format!("{} TEXT NOT NULL", quote_ident(DATE_UPDATED)));
    defs.push(format!("{} TEXT", quote_ident(UID)));
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        quote_ident(table),
        defs.join(",\n  ")
    )
}

/// `(index name, column)` pairs for the registry lookups.
pub fn registry_indexes(table: &str) -> [(String, &'static str); 3] {
    [
        (format!("idx_{}_{}", table, registry::COOKIE_ID), registry::COOKIE_ID),
        (format!("idx_{}_{}", table, registry::CATEGORY), registry::CATEGORY),
        (format!("idx_{}_{}", table, registry::DOMAIN), registry::DOMAIN),
    ]
}

pub fn create_index_sql(index: &str, table: &str, column: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_ident(index),
        quote_ident(table),
        quote_ident(column)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_ddl_has_autoincrement_key_and_metadata() {
        let sql = create_table_sql(TableKind::Totals, "t_totals");
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"t_totals\""));
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("\"accepted\" INTEGER NOT NULL DEFAULT 0"));
        assert!(sql.contains("\"date_created\" TEXT NOT NULL"));
        assert!(sql.contains("\"uid\" TEXT"));
    }

    #[test]
    fn registry_index_names_are_table_scoped() {
        let idx = registry_indexes("x_cookie_registry");
        assert_eq!(idx[0].0, "idx_x_cookie_registry_cookie_id");
        assert_eq!(idx[1].1, "category");
        assert_eq!(idx[2].1, "domain");
    }

    #[test]
    fn legacy_renames_cover_camel_case_layouts() {
        let totals = TableKind::Totals.legacy_renames();
        assert_eq!(totals, vec![("dateCreated", "date_created"), ("dateUpdated", "date_updated")]);

        let registry = TableKind::Registry.legacy_renames();
        assert!(registry.contains(&("type", "category")));
        assert!(registry.contains(&("cookieId", "cookie_id")));

        let banner = TableKind::Banner.legacy_renames();
        assert!(banner.contains(&("popupTitle", "popup_title")));
        assert!(banner.contains(&("triggerIcon", "trigger_icon")));
        for (_, new) in &banner[2..] {
            assert!(BANNER_COLUMNS.iter().any(|c| c.name == *new), "{}", new);
        }
    }
}
