//! Append-only change log.

use rusqlite::{params, Row};

use crate::errors::FormwatchResult;
use crate::models::{join_change_types, split_change_types, ChangeEvent};
use crate::store::database::MonitorDatabase;

const EVENT_COLUMNS: &str = "timestamp, site_id, level, change_types, prev_dom_checksum, \
    new_dom_checksum, prev_form_signature, new_form_signature, prev_resolved_url, \
    new_resolved_url, details";

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<ChangeEvent> {
    let change_types: String = row.get(3)?;
    Ok(ChangeEvent {
        timestamp: row.get(0)?,
        site_id: row.get(1)?,
        level: row.get(2)?,
        change_types: split_change_types(&change_types),
        prev_dom_checksum: row.get(4)?,
        new_dom_checksum: row.get(5)?,
        prev_form_signature: row.get(6)?,
        new_form_signature: row.get(7)?,
        prev_resolved_url: row.get(8)?,
        new_resolved_url: row.get(9)?,
        details: row.get(10)?,
    })
}

impl MonitorDatabase {
    /// Append one event and return its row id.
    pub fn append_change_event(&self, event: &ChangeEvent) -> FormwatchResult<i64> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO change_events({EVENT_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);"
                ),
                params![
                    event.timestamp,
                    event.site_id,
                    event.level,
                    join_change_types(&event.change_types),
                    event.prev_dom_checksum,
                    event.new_dom_checksum,
                    event.prev_form_signature,
                    event.new_form_signature,
                    event.prev_resolved_url,
                    event.new_resolved_url,
                    event.details,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Events in append order, optionally for one site only.
    pub fn change_events(&self, site_id: Option<&str>) -> FormwatchResult<Vec<ChangeEvent>> {
        self.with_conn(|conn| {
            let events = match site_id {
                Some(site_id) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {EVENT_COLUMNS} FROM change_events \
                         WHERE site_id = ?1 ORDER BY id ASC;"
                    ))?;
                    let rows = stmt.query_map(params![site_id], row_to_event)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {EVENT_COLUMNS} FROM change_events ORDER BY id ASC;"
                    ))?;
                    let rows = stmt.query_map([], row_to_event)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                }
            };
            Ok(events)
        })
    }

    pub fn change_event_count(&self) -> FormwatchResult<usize> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM change_events;", [], |row| row.get(0))?;
            Ok(count.max(0) as usize)
        })
    }
}
