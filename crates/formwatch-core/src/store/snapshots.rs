//! Per-site snapshot documents and capture artifacts on disk.
//!
//! Layout under the output directory:
//! `<site_id>/map.json` (latest snapshot, ok or error), `<site_id>/map.html`,
//! `<site_id>/sshot.png`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::{HTML_FILE_NAME, SCREENSHOT_FILE_NAME, SNAPSHOT_FILE_NAME};
use crate::errors::FormwatchResult;
use crate::models::Snapshot;

#[derive(Clone, Debug)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn site_dir(&self, site_id: &str) -> PathBuf {
        self.root.join(site_id)
    }

    pub fn snapshot_path(&self, site_id: &str) -> PathBuf {
        self.site_dir(site_id).join(SNAPSHOT_FILE_NAME)
    }

    /// The stored baseline, or `None` when there is none. An unreadable or
    /// corrupt file is logged and treated as no baseline.
    pub fn load(&self, site_id: &str) -> Option<Snapshot> {
        let path = self.snapshot_path(site_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(site_id, path = %path.display(), "unreadable snapshot ignored: {e}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(site_id, path = %path.display(), "corrupt snapshot ignored: {e}");
                None
            }
        }
    }

    /// Replace the stored snapshot with `snapshot`, whatever its status.
    pub fn save(&self, snapshot: &Snapshot) -> FormwatchResult<PathBuf> {
        let path = self.snapshot_path(&snapshot.site_id);
        write_json(&path, snapshot)?;
        Ok(path)
    }

    pub fn write_html(&self, site_id: &str, html: &str) -> FormwatchResult<PathBuf> {
        let path = self.site_dir(site_id).join(HTML_FILE_NAME);
        write_atomic(&path, html.as_bytes())?;
        Ok(path)
    }

    pub fn write_screenshot(&self, site_id: &str, png: &[u8]) -> FormwatchResult<PathBuf> {
        let path = self.site_dir(site_id).join(SCREENSHOT_FILE_NAME);
        write_atomic(&path, png)?;
        Ok(path)
    }
}

fn write_json(path: &Path, snapshot: &Snapshot) -> FormwatchResult<()> {
    let mut body = serde_json::to_vec_pretty(snapshot)?;
    body.push(b'\n');
    write_atomic(path, &body)
}

/// Write to a sibling temp file and rename it over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> FormwatchResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    let written = (|| -> io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    debug!(path = %path.display(), bytes = bytes.len(), "artifact written");
    Ok(())
}
