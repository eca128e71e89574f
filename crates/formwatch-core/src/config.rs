//! Run configuration for the monitor.
//!
//! Everything the orchestrator needs to know about where artifacts live and
//! how long to wait for a page is carried in [`MonitorConfig`]; nothing is
//! read from process-wide state once a run has started.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{FormwatchError, FormwatchResult};

pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_TIMEOUT_MS: u64 = 25_000;
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_VIEWPORT: Viewport = Viewport {
    width: 1440,
    height: 900,
};
pub const DEFAULT_OUT_DIR: &str = "out";

pub const DATABASE_FILE_NAME: &str = "formwatch.sqlite3";
pub const SNAPSHOT_FILE_NAME: &str = "map.json";
pub const HTML_FILE_NAME: &str = "map.html";
pub const SCREENSHOT_FILE_NAME: &str = "sshot.png";

/// Browser viewport used for every browsing context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Root directory for per-site artifacts and the index database.
    pub out_dir: PathBuf,
    /// Upper bound on navigation plus network-idle wait.
    pub timeout: Duration,
    /// Fixed wait after the network settles, for deferred client rendering.
    pub settle_delay: Duration,
    pub viewport: Viewport,
    pub headless: bool,
    /// Number of concurrent captures. `1` runs targets sequentially.
    pub workers: usize,
    /// Process only the first N targets.
    pub limit: Option<usize>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            viewport: DEFAULT_VIEWPORT,
            headless: true,
            workers: 1,
            limit: None,
        }
    }
}

impl MonitorConfig {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            ..Self::default()
        }
    }

    /// Build a config from defaults overridden by `FORMWATCH_*` variables.
    pub fn from_env() -> FormwatchResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`MonitorConfig::from_env`] but reads variables through
    /// `lookup`, so callers and tests can supply their own source.
    pub fn from_lookup<F>(lookup: F) -> FormwatchResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("FORMWATCH_OUT_DIR").filter(|v| !v.trim().is_empty()) {
            config.out_dir = PathBuf::from(dir.trim());
        }
        if let Some(ms) = parse_number("FORMWATCH_TIMEOUT_MS", lookup("FORMWATCH_TIMEOUT_MS"))? {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_number("FORMWATCH_SETTLE_MS", lookup("FORMWATCH_SETTLE_MS"))? {
            config.settle_delay = Duration::from_millis(ms);
        }
        if let Some(workers) = parse_number("FORMWATCH_WORKERS", lookup("FORMWATCH_WORKERS"))? {
            config.workers = (workers as usize).max(1);
        }
        if let Some(limit) = parse_number("FORMWATCH_LIMIT", lookup("FORMWATCH_LIMIT"))? {
            config.limit = Some(limit as usize);
        }
        if let Some(val) = lookup("FORMWATCH_HEADLESS") {
            let v = val.trim().to_lowercase();
            config.headless = !matches!(v.as_str(), "0" | "false" | "no" | "off");
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FormwatchResult<()> {
        if self.timeout.is_zero() {
            return Err(FormwatchError::Config(
                "navigation timeout must be greater than zero".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(FormwatchError::Config(
                "worker count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.out_dir.join(DATABASE_FILE_NAME)
    }

    pub fn site_dir(&self, site_id: &str) -> PathBuf {
        self.out_dir.join(site_id)
    }

    /// Artifact path relative to `out_dir`, with forward slashes, as recorded
    /// in snapshots and the master index.
    pub fn relative_artifact(&self, site_id: &str, file_name: &str) -> String {
        Path::new(site_id)
            .join(file_name)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

fn parse_number(key: &str, raw: Option<String>) -> FormwatchResult<Option<u64>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| FormwatchError::Config(format!("{key} must be a non-negative integer, got {trimmed:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_overrides() {
        let config = MonitorConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(config.settle_delay, Duration::from_millis(DEFAULT_SETTLE_DELAY_MS));
        assert_eq!(config.workers, 1);
        assert!(config.headless);
        assert_eq!(config.limit, None);
        assert_eq!(config.out_dir, PathBuf::from("out"));
    }

    #[test]
    fn env_overrides_apply() {
        let config = MonitorConfig::from_lookup(lookup_from(&[
            ("FORMWATCH_OUT_DIR", "/tmp/fw"),
            ("FORMWATCH_TIMEOUT_MS", "5000"),
            ("FORMWATCH_SETTLE_MS", "0"),
            ("FORMWATCH_WORKERS", "4"),
            ("FORMWATCH_LIMIT", "10"),
            ("FORMWATCH_HEADLESS", "off"),
        ]))
        .unwrap();
        assert_eq!(config.out_dir, PathBuf::from("/tmp/fw"));
        assert_eq!(config.timeout, Duration::from_millis(5000));
        assert_eq!(config.settle_delay, Duration::ZERO);
        assert_eq!(config.workers, 4);
        assert_eq!(config.limit, Some(10));
        assert!(!config.headless);
    }

    #[test]
    fn malformed_number_is_rejected() {
        let err = MonitorConfig::from_lookup(lookup_from(&[("FORMWATCH_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, FormwatchError::Config(_)));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = MonitorConfig::from_lookup(lookup_from(&[("FORMWATCH_TIMEOUT_MS", "0")]))
            .unwrap_err();
        assert!(matches!(err, FormwatchError::Config(_)));
    }

    #[test]
    fn relative_artifacts_use_forward_slashes() {
        let config = MonitorConfig::new("out");
        assert_eq!(config.relative_artifact("acme-co", "map.json"), "acme-co/map.json");
        assert_eq!(config.site_dir("acme-co"), PathBuf::from("out").join("acme-co"));
    }
}
