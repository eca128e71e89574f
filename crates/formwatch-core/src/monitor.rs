//! Run orchestration.
//!
//! Per target: capture, extract, fingerprint, load the baseline, diff, save,
//! log the change and upsert the index row. A failed capture or a failure
//! while storing it replaces the snapshot with an error snapshot and still
//! upserts the index row; a cancelled capture records nothing.

use std::collections::HashSet;
use std::fs;
use std::time::Instant;

use chrono::Utc;
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::capture::{capture_page, CancelToken, CapturedPage, ContextGuard, RenderingDriver};
use crate::config::{
    MonitorConfig, HTML_FILE_NAME, SCREENSHOT_FILE_NAME, SNAPSHOT_FILE_NAME,
};
use crate::diff::compare;
use crate::errors::{CaptureError, FormwatchError, FormwatchResult};
use crate::extract::analyze;
use crate::fingerprint::fingerprint;
use crate::models::{Artifacts, ChangeEvent, ChangeType, MasterIndexRow, Snapshot, Target};
use crate::store::{MonitorDatabase, SnapshotStore};

/// How one target ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetOutcome {
    /// First successful capture; stored as the baseline.
    Baseline,
    Unchanged,
    Changed(Vec<ChangeType>),
    Failed(String),
    /// Aborted by the run's cancel token; nothing was written.
    Cancelled,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Targets whose capture was started.
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub changed: usize,
    pub cancelled: bool,
}

impl RunSummary {
    fn record(&mut self, outcome: &TargetOutcome) {
        self.processed += 1;
        match outcome {
            TargetOutcome::Baseline | TargetOutcome::Unchanged => self.succeeded += 1,
            TargetOutcome::Changed(_) => {
                self.succeeded += 1;
                self.changed += 1;
            }
            TargetOutcome::Failed(_) => self.failed += 1,
            TargetOutcome::Cancelled => self.cancelled = true,
        }
    }
}

pub struct Monitor<D: RenderingDriver> {
    config: MonitorConfig,
    driver: D,
    snapshots: SnapshotStore,
    database: MonitorDatabase,
}

impl<D: RenderingDriver> Monitor<D> {
    /// Validate `config`, create the output directory and open the index
    /// database inside it.
    pub fn open(config: MonitorConfig, driver: D) -> FormwatchResult<Self> {
        config.validate()?;
        fs::create_dir_all(&config.out_dir)?;
        let database = MonitorDatabase::open(config.database_path())?;
        Ok(Self::with_database(config, driver, database))
    }

    pub fn with_database(config: MonitorConfig, driver: D, database: MonitorDatabase) -> Self {
        let snapshots = SnapshotStore::new(config.out_dir.clone());
        Self {
            config,
            driver,
            snapshots,
            database,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn database(&self) -> &MonitorDatabase {
        &self.database
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Process `targets` (up to the configured limit) and summarize.
    ///
    /// Only a malformed target list fails the run; per-target problems are
    /// counted in the summary.
    pub fn run(&self, targets: &[Target], cancel: &CancelToken) -> FormwatchResult<RunSummary> {
        let mut seen = HashSet::new();
        for target in targets {
            if !seen.insert(target.site_id.as_str()) {
                return Err(FormwatchError::Target(format!(
                    "duplicate site_id {:?}",
                    target.site_id
                )));
            }
        }

        let limit = self.config.limit.unwrap_or(targets.len()).min(targets.len());
        let selected = &targets[..limit];
        let started = Instant::now();
        info!(
            targets = selected.len(),
            workers = self.config.workers,
            "run started"
        );

        let outcomes: Vec<Option<TargetOutcome>> = if self.config.workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.workers)
                .build();
            match pool {
                Ok(pool) => pool.install(|| {
                    selected
                        .par_iter()
                        .map(|target| self.run_job(target, cancel))
                        .collect()
                }),
                Err(e) => {
                    warn!("worker pool unavailable, running sequentially: {e}");
                    self.run_sequential(selected, cancel)
                }
            }
        } else {
            self.run_sequential(selected, cancel)
        };

        let mut summary = RunSummary::default();
        for outcome in outcomes.iter().flatten() {
            summary.record(outcome);
        }
        summary.cancelled |= cancel.is_cancelled();

        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            changed = summary.changed,
            cancelled = summary.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );
        Ok(summary)
    }

    fn run_sequential(&self, targets: &[Target], cancel: &CancelToken) -> Vec<Option<TargetOutcome>> {
        let mut outcomes = Vec::with_capacity(targets.len());
        for target in targets {
            if cancel.is_cancelled() {
                break;
            }
            outcomes.push(self.run_job(target, cancel));
        }
        outcomes
    }

    /// `None` when the run was cancelled before this target started.
    fn run_job(&self, target: &Target, cancel: &CancelToken) -> Option<TargetOutcome> {
        if cancel.is_cancelled() {
            return None;
        }
        match self.process_target(target, cancel) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(site_id = %target.site_id, "target failed: {e}");
                Some(TargetOutcome::Failed(e.to_string()))
            }
        }
    }

    /// Run the full pipeline for one target.
    pub fn process_target(
        &self,
        target: &Target,
        cancel: &CancelToken,
    ) -> FormwatchResult<TargetOutcome> {
        let site_id = target.site_id.as_str();
        let mut snapshot = Snapshot::pending(target, self.artifacts(site_id), Utc::now());

        let Some(url) = target.target_url() else {
            return self.record_failure(snapshot, CaptureError::MissingUrl.to_string());
        };

        debug!(site_id, url, "capturing");
        let page = match self.capture(url, cancel) {
            Ok(page) => page,
            Err(e) if e.is_cancelled() => {
                info!(site_id, url, "capture cancelled");
                return Ok(TargetOutcome::Cancelled);
            }
            Err(e) => return self.record_failure(snapshot, e.to_string()),
        };

        snapshot.resolved_url = page.resolved_url.clone();
        snapshot.status_code = page.status_code;
        snapshot.load_duration_ms = Some(page.load_duration_ms());

        let failed = snapshot.clone();
        match self.store_capture(snapshot, &page) {
            Ok(outcome) => Ok(outcome),
            Err(e) => self.record_failure(failed, e.to_string()),
        }
    }

    /// Extract, fingerprint, diff and persist a successful capture.
    fn store_capture(
        &self,
        mut snapshot: Snapshot,
        page: &CapturedPage,
    ) -> FormwatchResult<TargetOutcome> {
        let site_id = snapshot.site_id.clone();
        let site_id = site_id.as_str();

        let analysis = analyze(&page.html);
        let fingerprint = fingerprint(&page.html, &analysis.forms)?;
        snapshot.record_capture(analysis.forms, analysis.signals, fingerprint);

        self.snapshots.write_html(site_id, &page.html)?;
        let screenshot_saved = match &page.screenshot {
            Some(png) => match self.snapshots.write_screenshot(site_id, png) {
                Ok(_) => true,
                Err(e) => {
                    warn!(site_id, "screenshot not saved: {e}");
                    false
                }
            },
            None => false,
        };
        if !screenshot_saved {
            snapshot.artifacts.screenshot.clear();
        }

        let outcome = match self.snapshots.load(site_id) {
            None => {
                info!(site_id, forms = snapshot.form_count, "baseline recorded");
                self.snapshots.save(&snapshot)?;
                TargetOutcome::Baseline
            }
            Some(previous) => {
                let diff = compare(&previous, &snapshot);
                self.snapshots.save(&snapshot)?;
                match ChangeEvent::between(&previous, &snapshot, diff.change_types.clone()) {
                    Some(event) => {
                        self.database.append_change_event(&event)?;
                        info!(site_id, changes = %event.details, "change detected");
                        TargetOutcome::Changed(diff.change_types)
                    }
                    None => {
                        debug!(site_id, "no change");
                        TargetOutcome::Unchanged
                    }
                }
            }
        };

        self.database
            .upsert_index_row(&MasterIndexRow::from_snapshot(&snapshot))?;
        Ok(outcome)
    }

    fn capture(&self, url: &str, cancel: &CancelToken) -> Result<CapturedPage, CaptureError> {
        let mut guard = ContextGuard::new(self.driver.new_context()?);
        capture_page(
            guard.context(),
            url,
            self.config.timeout,
            self.config.settle_delay,
            cancel,
        )
    }

    /// Replace the stored snapshot with an error snapshot and upsert its
    /// index row. The row is written even when the snapshot file cannot be.
    fn record_failure(
        &self,
        mut snapshot: Snapshot,
        message: String,
    ) -> FormwatchResult<TargetOutcome> {
        warn!(
            site_id = %snapshot.site_id,
            url = snapshot.target_url.as_deref().unwrap_or_default(),
            "capture failed: {message}"
        );
        snapshot.record_error(message.clone());
        snapshot.artifacts = Artifacts {
            map_json: self
                .config
                .relative_artifact(&snapshot.site_id, SNAPSHOT_FILE_NAME),
            ..Artifacts::default()
        };
        if let Err(e) = self.snapshots.save(&snapshot) {
            warn!(site_id = %snapshot.site_id, "error snapshot not saved: {e}");
        }
        self.database
            .upsert_index_row(&MasterIndexRow::from_snapshot(&snapshot))?;
        Ok(TargetOutcome::Failed(message))
    }

    fn artifacts(&self, site_id: &str) -> Artifacts {
        Artifacts {
            map_json: self.config.relative_artifact(site_id, SNAPSHOT_FILE_NAME),
            map_html: self.config.relative_artifact(site_id, HTML_FILE_NAME),
            screenshot: self.config.relative_artifact(site_id, SCREENSHOT_FILE_NAME),
        }
    }
}
