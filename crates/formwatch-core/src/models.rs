//! Shared typed models used across capture, extraction, storage and diffing.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::TOOL_VERSION;
use crate::errors::{FormwatchError, FormwatchResult};

/// Level recorded on every change-log row.
pub const CHANGE_LEVEL: &str = "CHANGE";

/// Render a timestamp the way every table and document stores it.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// 1. Targets
// ---------------------------------------------------------------------------

/// Reduce a raw identifier to a filesystem- and index-safe slug.
///
/// Lowercases, maps every character that is not alphanumeric, `-` or `_` to
/// `-`, trims `-`/`_` from both ends and collapses runs of `-`. Applying it
/// twice gives the same result as applying it once.
pub fn sanitize_site_id(raw: &str) -> String {
    let replaced: String = raw
        .to_lowercase()
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = replaced.trim_matches(|ch| ch == '-' || ch == '_');

    let mut slug = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        if ch == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(ch);
    }
    slug
}

/// A target row as supplied by an external loader (CSV, JSON, ...).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawTarget {
    #[serde(default)]
    pub site_id: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(default)]
    pub submission_url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A validated site to capture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub site_id: String,
    pub raw_site_id: String,
    pub homepage: String,
    pub submission_url: Option<String>,
    pub notes: String,
}

impl Target {
    pub fn new(
        raw_site_id: &str,
        homepage: &str,
        submission_url: Option<&str>,
        notes: Option<&str>,
    ) -> FormwatchResult<Self> {
        let raw_site_id = raw_site_id.trim();
        if raw_site_id.is_empty() {
            return Err(FormwatchError::Target("site_id is required".to_string()));
        }
        let site_id = sanitize_site_id(raw_site_id);
        if site_id.is_empty() {
            return Err(FormwatchError::Target(format!(
                "site_id {raw_site_id:?} has no usable characters"
            )));
        }
        Ok(Self {
            site_id,
            raw_site_id: raw_site_id.to_string(),
            homepage: homepage.trim().to_string(),
            submission_url: submission_url
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string),
            notes: notes.map(str::trim).unwrap_or_default().to_string(),
        })
    }

    /// URL to capture: the submission page when known, else the homepage.
    pub fn target_url(&self) -> Option<&str> {
        self.submission_url
            .as_deref()
            .or(Some(self.homepage.as_str()))
            .filter(|url| !url.is_empty())
    }
}

impl TryFrom<RawTarget> for Target {
    type Error = FormwatchError;

    fn try_from(raw: RawTarget) -> FormwatchResult<Self> {
        Target::new(
            &raw.site_id,
            &raw.homepage,
            raw.submission_url.as_deref(),
            raw.notes.as_deref(),
        )
    }
}

/// Validate a whole target list before any capture starts.
///
/// Any malformed row, or two rows that sanitize to the same `site_id`, fails
/// the entire list.
pub fn prepare_targets<I>(rows: I) -> FormwatchResult<Vec<Target>>
where
    I: IntoIterator<Item = RawTarget>,
{
    let mut seen: HashSet<String> = HashSet::new();
    let mut targets = Vec::new();
    for (idx, raw) in rows.into_iter().enumerate() {
        let target = Target::try_from(raw).map_err(|e| match e {
            FormwatchError::Target(msg) => FormwatchError::Target(format!("Row {}: {msg}", idx + 1)),
            other => other,
        })?;
        if !seen.insert(target.site_id.clone()) {
            return Err(FormwatchError::Target(format!(
                "Row {}: duplicate site_id {:?}",
                idx + 1,
                target.site_id
            )));
        }
        targets.push(target);
    }
    Ok(targets)
}

// ---------------------------------------------------------------------------
// 2. Form descriptors
// ---------------------------------------------------------------------------

/// One control inside a form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: Option<String>,
    pub id: Option<String>,
    pub tag: String,
    #[serde(rename = "type")]
    pub field_type: Option<String>,
    pub required: bool,
    pub placeholder: Option<String>,
    pub labels: Vec<String>,
    #[serde(rename = "ariaRequired")]
    pub aria_required: Option<String>,
    pub autocomplete: Option<String>,
}

/// A button or link that plausibly submits (or advances) the form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitCandidate {
    pub selector: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormDescriptor {
    pub index: usize,
    pub action: Option<String>,
    pub method: String,
    pub dataset: IndexMap<String, String>,
    pub fields: Vec<FieldDescriptor>,
    pub submitters: Vec<SubmitCandidate>,
}

// ---------------------------------------------------------------------------
// 3. Signals
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiStepSignal {
    pub likely: bool,
    pub signals: Vec<String>,
}

impl MultiStepSignal {
    /// Deduplicate and sort the raw cues; `likely` is set iff any remain.
    pub fn from_signals<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let unique: BTreeSet<String> = raw.into_iter().map(Into::into).collect();
        Self {
            likely: !unique.is_empty(),
            signals: unique.into_iter().collect(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalSet {
    pub captcha_present: bool,
    pub multi_step: MultiStepSignal,
}

// ---------------------------------------------------------------------------
// 4. Snapshots
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStatus {
    Ok,
    Error,
}

impl CaptureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureStatus::Ok => "ok",
            CaptureStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("ok") {
            CaptureStatus::Ok
        } else {
            CaptureStatus::Error
        }
    }
}

/// The pair of checksums computed from one successful capture.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub dom_checksum: String,
    pub form_signature: String,
}

/// Output locations of a capture, relative to the output directory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifacts {
    pub map_json: String,
    pub map_html: String,
    pub screenshot: String,
}

/// The full structured record of one capture of a target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tool_version: String,
    pub site_id: String,
    pub raw_site_id: String,
    pub homepage: String,
    pub submission_url: Option<String>,
    pub notes: String,
    pub target_url: Option<String>,
    pub resolved_url: Option<String>,
    pub status_code: Option<u16>,
    pub captured_at: DateTime<Utc>,
    pub status: CaptureStatus,
    pub error: Option<String>,
    #[serde(flatten)]
    pub fingerprint: Option<Fingerprint>,
    pub form_count: usize,
    pub field_count: usize,
    pub forms: Vec<FormDescriptor>,
    pub submitters: Vec<String>,
    pub signals: SignalSet,
    pub artifacts: Artifacts,
    pub load_duration_ms: Option<u64>,
}

impl Snapshot {
    /// A snapshot in the `error` state with no capture data yet; successful
    /// captures overwrite it through [`Snapshot::record_capture`].
    pub fn pending(target: &Target, artifacts: Artifacts, captured_at: DateTime<Utc>) -> Self {
        Self {
            tool_version: TOOL_VERSION.to_string(),
            site_id: target.site_id.clone(),
            raw_site_id: target.raw_site_id.clone(),
            homepage: target.homepage.clone(),
            submission_url: target.submission_url.clone(),
            notes: target.notes.clone(),
            target_url: target.target_url().map(str::to_string),
            resolved_url: None,
            status_code: None,
            captured_at,
            status: CaptureStatus::Error,
            error: None,
            fingerprint: None,
            form_count: 0,
            field_count: 0,
            forms: Vec::new(),
            submitters: Vec::new(),
            signals: SignalSet::default(),
            artifacts,
            load_duration_ms: None,
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.status = CaptureStatus::Error;
        self.error = Some(message.into());
        self.fingerprint = None;
    }

    pub fn record_capture(
        &mut self,
        forms: Vec<FormDescriptor>,
        signals: SignalSet,
        fingerprint: Fingerprint,
    ) {
        let submitters: BTreeSet<String> = forms
            .iter()
            .flat_map(|form| form.submitters.iter())
            .map(|submit| submit.selector.clone())
            .filter(|selector| !selector.is_empty())
            .collect();

        self.status = CaptureStatus::Ok;
        self.error = None;
        self.fingerprint = Some(fingerprint);
        self.form_count = forms.len();
        self.field_count = forms.iter().map(|form| form.fields.len()).sum();
        self.submitters = submitters.into_iter().collect();
        self.forms = forms;
        self.signals = signals;
    }

    pub fn is_ok(&self) -> bool {
        self.status == CaptureStatus::Ok
    }

    pub fn dom_checksum(&self) -> Option<&str> {
        self.fingerprint.as_ref().map(|f| f.dom_checksum.as_str())
    }

    pub fn form_signature(&self) -> Option<&str> {
        self.fingerprint.as_ref().map(|f| f.form_signature.as_str())
    }

    pub fn has_captcha(&self) -> bool {
        self.signals.captcha_present
    }

    pub fn likely_multi_step(&self) -> bool {
        self.signals.multi_step.likely
    }
}

// ---------------------------------------------------------------------------
// 5. Change events
// ---------------------------------------------------------------------------

/// Tracked dimension whose value moved between two snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Dom,
    Forms,
    Captcha,
    StepHint,
    Url,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Dom => "DOM",
            ChangeType::Forms => "FORMS",
            ChangeType::Captcha => "CAPTCHA",
            ChangeType::StepHint => "STEP_HINT",
            ChangeType::Url => "URL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "DOM" => Some(ChangeType::Dom),
            "FORMS" => Some(ChangeType::Forms),
            "CAPTCHA" => Some(ChangeType::Captcha),
            "STEP_HINT" => Some(ChangeType::StepHint),
            "URL" => Some(ChangeType::Url),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join change types the way the change log stores them (`DOM,CAPTCHA`).
pub fn join_change_types(types: &[ChangeType]) -> String {
    types
        .iter()
        .map(ChangeType::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Inverse of [`join_change_types`]; unknown tags are dropped.
pub fn split_change_types(value: &str) -> Vec<ChangeType> {
    value
        .split(',')
        .filter_map(ChangeType::parse)
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub timestamp: String,
    pub site_id: String,
    pub level: String,
    pub change_types: Vec<ChangeType>,
    pub prev_dom_checksum: Option<String>,
    pub new_dom_checksum: Option<String>,
    pub prev_form_signature: Option<String>,
    pub new_form_signature: Option<String>,
    pub prev_resolved_url: Option<String>,
    pub new_resolved_url: Option<String>,
    pub details: String,
}

impl ChangeEvent {
    /// Build the event for `current` against its baseline, or `None` when
    /// nothing tracked changed.
    pub fn between(
        previous: &Snapshot,
        current: &Snapshot,
        change_types: Vec<ChangeType>,
    ) -> Option<Self> {
        if change_types.is_empty() {
            return None;
        }
        let mut sorted: Vec<&str> = change_types.iter().map(ChangeType::as_str).collect();
        sorted.sort_unstable();
        Some(Self {
            timestamp: format_timestamp(&current.captured_at),
            site_id: current.site_id.clone(),
            level: CHANGE_LEVEL.to_string(),
            details: sorted.join("; "),
            change_types,
            prev_dom_checksum: previous.dom_checksum().map(str::to_string),
            new_dom_checksum: current.dom_checksum().map(str::to_string),
            prev_form_signature: previous.form_signature().map(str::to_string),
            new_form_signature: current.form_signature().map(str::to_string),
            prev_resolved_url: previous.resolved_url.clone(),
            new_resolved_url: current.resolved_url.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// 6. Master index rows
// ---------------------------------------------------------------------------

/// Latest-state row for one site, denormalized from its newest snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterIndexRow {
    pub site_id: String,
    pub homepage: String,
    pub submission_url: Option<String>,
    pub notes: String,
    pub target_url: Option<String>,
    pub resolved_url: Option<String>,
    pub last_captured_at: String,
    pub status: CaptureStatus,
    pub last_error: Option<String>,
    pub dom_checksum: Option<String>,
    pub form_signature: Option<String>,
    pub form_count: usize,
    pub field_count: usize,
    pub has_captcha: bool,
    pub likely_multi_step: bool,
    pub map_json: String,
    pub map_html: String,
    pub screenshot: String,
    pub captured_with: String,
}

impl MasterIndexRow {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            site_id: snapshot.site_id.clone(),
            homepage: snapshot.homepage.clone(),
            submission_url: snapshot.submission_url.clone(),
            notes: snapshot.notes.clone(),
            target_url: snapshot.target_url.clone(),
            resolved_url: snapshot.resolved_url.clone(),
            last_captured_at: format_timestamp(&snapshot.captured_at),
            status: snapshot.status,
            last_error: snapshot.error.clone(),
            dom_checksum: snapshot.dom_checksum().map(str::to_string),
            form_signature: snapshot.form_signature().map(str::to_string),
            form_count: snapshot.form_count,
            field_count: snapshot.field_count,
            has_captcha: snapshot.has_captcha(),
            likely_multi_step: snapshot.likely_multi_step(),
            map_json: snapshot.artifacts.map_json.clone(),
            map_html: snapshot.artifacts.map_html.clone(),
            screenshot: snapshot.artifacts.screenshot.clone(),
            captured_with: snapshot.tool_version.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
