//! SQLite schema DDL and version stamp.

use rusqlite::{Connection, OptionalExtension};

use crate::errors::{FormwatchError, FormwatchResult};

/// Schema version written by this build. A database stamped with a newer
/// version is refused rather than written with an older layout.
pub const SCHEMA_VERSION: i32 = 1;

/// Core DDL statements, safe to replay on an initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS formwatch_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS master_index (
        site_id TEXT PRIMARY KEY,
        homepage TEXT NOT NULL,
        submission_url TEXT,
        notes TEXT NOT NULL DEFAULT '',
        target_url TEXT,
        resolved_url TEXT,
        last_captured_at TEXT NOT NULL,
        status TEXT NOT NULL,
        last_error TEXT,
        dom_checksum TEXT,
        form_signature TEXT,
        form_count INTEGER NOT NULL DEFAULT 0,
        field_count INTEGER NOT NULL DEFAULT 0,
        has_captcha INTEGER NOT NULL DEFAULT 0,
        likely_multi_step INTEGER NOT NULL DEFAULT 0,
        map_json TEXT NOT NULL DEFAULT '',
        map_html TEXT NOT NULL DEFAULT '',
        screenshot TEXT NOT NULL DEFAULT '',
        captured_with TEXT NOT NULL DEFAULT ''
    );",
    "CREATE TABLE IF NOT EXISTS change_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        site_id TEXT NOT NULL,
        level TEXT NOT NULL,
        change_types TEXT NOT NULL,
        prev_dom_checksum TEXT,
        new_dom_checksum TEXT,
        prev_form_signature TEXT,
        new_form_signature TEXT,
        prev_resolved_url TEXT,
        new_resolved_url TEXT,
        details TEXT NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS idx_master_index_status ON master_index(status);",
    "CREATE INDEX IF NOT EXISTS idx_change_events_site ON change_events(site_id, id);",
];

/// Stamp a fresh database with [`SCHEMA_VERSION`], or check that an
/// existing stamp is one this build can write.
pub fn ensure_schema_version(conn: &Connection) -> FormwatchResult<()> {
    match get_schema_version(conn)? {
        None => {
            conn.execute(
                "INSERT INTO formwatch_meta(key, value) VALUES('schema_version', ?1);",
                rusqlite::params![SCHEMA_VERSION.to_string()],
            )?;
            Ok(())
        }
        Some(version) if version <= SCHEMA_VERSION => Ok(()),
        Some(version) => Err(FormwatchError::Database(format!(
            "schema version {version} is newer than supported version {SCHEMA_VERSION}"
        ))),
    }
}

/// Stored schema version; `None` before the database has been stamped.
pub fn get_schema_version(conn: &Connection) -> FormwatchResult<Option<i32>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM formwatch_meta WHERE key = 'schema_version';",
            [],
            |row| row.get(0),
        )
        .optional()?;
    value
        .map(|v| {
            v.parse::<i32>().map_err(|_| {
                FormwatchError::Database(format!("unreadable schema version {v:?}"))
            })
        })
        .transpose()
}
