//! Shared database handle

use crate::clock::{Clock, SystemClock, UidGenerator, UuidGenerator};
use chrono::{DateTime, Utc};
use cookieconsent_core::{Error, Result, Settings, TableNames};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// One SQLite connection behind a mutex, plus the table names, clock and
/// token source every component needs. Cheap to clone; clones share the
/// connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    tables: TableNames,
    clock: Arc<dyn Clock>,
    uids: Arc<dyn UidGenerator>,
}

impl Database {
    pub fn open(path: &Path, tables: TableNames, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(Error::storage)?;
        conn.busy_timeout(busy_timeout).map_err(Error::storage)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            "#,
        )
        .map_err(Error::storage)?;
        debug!(path = %path.display(), "opened database");
        Ok(Self::from_connection(conn, tables))
    }

    pub fn open_with_settings(settings: &Settings) -> Result<Self> {
        Self::open(
            &settings.database.path,
            settings.table_names()?,
            Duration::from_millis(settings.database.busy_timeout_ms),
        )
    }

    pub fn open_in_memory(tables: TableNames) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::storage)?;
        Ok(Self::from_connection(conn, tables))
    }

    pub fn from_connection(conn: Connection, tables: TableNames) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            tables,
            clock: Arc::new(SystemClock),
            uids: Arc::new(UuidGenerator),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_uid_generator(mut self, uids: Arc<dyn UidGenerator>) -> Self {
        self.uids = uids;
        self
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn new_uid(&self) -> String {
        self.uids.generate()
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| Error::storage("connection mutex poisoned"))?;
        f(&mut guard)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("tables", &self.tables).finish_non_exhaustive()
    }
}

/// Maps driver errors onto [`Error::StorageUnavailable`].
pub(crate) trait StorageResultExt<T> {
    fn storage(self) -> Result<T>;
}

impl<T> StorageResultExt<T> for rusqlite::Result<T> {
    fn storage(self) -> Result<T> {
        self.map_err(Error::storage)
    }
}
