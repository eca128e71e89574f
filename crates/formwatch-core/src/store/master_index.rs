//! Latest-state table, one row per site.

use rusqlite::{params, OptionalExtension, Row};

use crate::errors::FormwatchResult;
use crate::models::{CaptureStatus, MasterIndexRow};
use crate::store::database::MonitorDatabase;

const INDEX_COLUMNS: &str = "site_id, homepage, submission_url, notes, target_url, \
    resolved_url, last_captured_at, status, last_error, dom_checksum, form_signature, \
    form_count, field_count, has_captcha, likely_multi_step, map_json, map_html, \
    screenshot, captured_with";

fn row_to_index(row: &Row<'_>) -> rusqlite::Result<MasterIndexRow> {
    let status: String = row.get(7)?;
    Ok(MasterIndexRow {
        site_id: row.get(0)?,
        homepage: row.get(1)?,
        submission_url: row.get(2)?,
        notes: row.get(3)?,
        target_url: row.get(4)?,
        resolved_url: row.get(5)?,
        last_captured_at: row.get(6)?,
        status: CaptureStatus::parse(&status),
        last_error: row.get(8)?,
        dom_checksum: row.get(9)?,
        form_signature: row.get(10)?,
        form_count: row.get::<_, i64>(11)?.max(0) as usize,
        field_count: row.get::<_, i64>(12)?.max(0) as usize,
        has_captcha: row.get(13)?,
        likely_multi_step: row.get(14)?,
        map_json: row.get(15)?,
        map_html: row.get(16)?,
        screenshot: row.get(17)?,
        captured_with: row.get(18)?,
    })
}

impl MonitorDatabase {
    /// Insert the row for its site or overwrite the existing one in place.
    pub fn upsert_index_row(&self, row: &MasterIndexRow) -> FormwatchResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO master_index({INDEX_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, \
                             ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19) \
                     ON CONFLICT(site_id) DO UPDATE SET \
                        homepage = excluded.homepage, \
                        submission_url = excluded.submission_url, \
                        notes = excluded.notes, \
                        target_url = excluded.target_url, \
                        resolved_url = excluded.resolved_url, \
                        last_captured_at = excluded.last_captured_at, \
                        status = excluded.status, \
                        last_error = excluded.last_error, \
                        dom_checksum = excluded.dom_checksum, \
                        form_signature = excluded.form_signature, \
                        form_count = excluded.form_count, \
                        field_count = excluded.field_count, \
                        has_captcha = excluded.has_captcha, \
                        likely_multi_step = excluded.likely_multi_step, \
                        map_json = excluded.map_json, \
                        map_html = excluded.map_html, \
                        screenshot = excluded.screenshot, \
                        captured_with = excluded.captured_with;"
                ),
                params![
                    row.site_id,
                    row.homepage,
                    row.submission_url,
                    row.notes,
                    row.target_url,
                    row.resolved_url,
                    row.last_captured_at,
                    row.status.as_str(),
                    row.last_error,
                    row.dom_checksum,
                    row.form_signature,
                    row.form_count as i64,
                    row.field_count as i64,
                    row.has_captcha,
                    row.likely_multi_step,
                    row.map_json,
                    row.map_html,
                    row.screenshot,
                    row.captured_with,
                ],
            )?;
            Ok(())
        })
    }

    pub fn index_row(&self, site_id: &str) -> FormwatchResult<Option<MasterIndexRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {INDEX_COLUMNS} FROM master_index WHERE site_id = ?1;"),
                    params![site_id],
                    row_to_index,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// All rows ordered by `site_id`.
    pub fn index_rows(&self) -> FormwatchResult<Vec<MasterIndexRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INDEX_COLUMNS} FROM master_index ORDER BY site_id ASC;"
            ))?;
            let rows = stmt
                .query_map([], row_to_index)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
