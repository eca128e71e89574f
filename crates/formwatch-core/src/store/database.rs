//! SQLite handle for the master index and change log.
//!
//! One connection per database, guarded by a mutex: workers write through
//! the same handle and SQLite sees one writer at a time.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::config::TOOL_VERSION;
use crate::errors::FormwatchResult;
use crate::store::schema;

pub struct MonitorDatabase {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl MonitorDatabase {
    /// Open (creating parent directories and the file if needed) and
    /// initialise the schema.
    pub fn open(path: impl AsRef<Path>) -> FormwatchResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let db = Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        debug!(path = %path.display(), "index database ready");
        Ok(db)
    }

    pub fn open_in_memory() -> FormwatchResult<Self> {
        let db = Self {
            path: None,
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Create all tables and indexes, then stamp or check the schema version.
    pub fn init_schema(&self) -> FormwatchResult<()> {
        self.with_conn(|conn| {
            for stmt in schema::SCHEMA_STATEMENTS {
                conn.execute_batch(stmt)?;
            }
            schema::ensure_schema_version(conn)?;
            set_meta(conn, "tool_version", TOOL_VERSION)?;
            Ok(())
        })
    }

    /// Run `f` while holding the connection lock.
    pub fn with_conn<T, F>(&self, f: F) -> FormwatchResult<T>
    where
        F: FnOnce(&Connection) -> FormwatchResult<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub fn get_meta(&self, key: &str) -> FormwatchResult<Option<String>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM formwatch_meta WHERE key = ?1;",
                    params![key],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?;
            Ok(value.flatten())
        })
    }

    pub fn set_meta(&self, key: &str, value: &str) -> FormwatchResult<()> {
        self.with_conn(|conn| set_meta(conn, key, value))
    }

    pub fn schema_version(&self) -> FormwatchResult<Option<i32>> {
        self.with_conn(schema::get_schema_version)
    }
}

fn set_meta(conn: &Connection, key: &str, value: &str) -> FormwatchResult<()> {
    conn.execute(
        "INSERT INTO formwatch_meta(key, value) VALUES(?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        params![key, value],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_parent_dirs_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("formwatch.sqlite3");
        let db = MonitorDatabase::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), Some(path.as_path()));
        assert_eq!(db.schema_version().unwrap(), Some(schema::SCHEMA_VERSION));
        assert_eq!(db.get_meta("tool_version").unwrap().as_deref(), Some(TOOL_VERSION));
    }

    #[test]
    fn test_reopen_keeps_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("formwatch.sqlite3");
        drop(MonitorDatabase::open(&path).unwrap());
        let db = MonitorDatabase::open(&path).unwrap();
        assert_eq!(db.schema_version().unwrap(), Some(schema::SCHEMA_VERSION));
    }

    #[test]
    fn test_open_refuses_newer_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("formwatch.sqlite3");
        let db = MonitorDatabase::open(&path).unwrap();
        db.set_meta("schema_version", "7").unwrap();
        drop(db);
        assert!(matches!(
            MonitorDatabase::open(&path),
            Err(crate::errors::FormwatchError::Database(_))
        ));
    }

    #[test]
    fn test_meta_round_trip() {
        let db = MonitorDatabase::open_in_memory().unwrap();
        assert_eq!(db.get_meta("missing").unwrap(), None);
        db.set_meta("last_run", "a").unwrap();
        db.set_meta("last_run", "b").unwrap();
        assert_eq!(db.get_meta("last_run").unwrap().as_deref(), Some("b"));
    }
}
