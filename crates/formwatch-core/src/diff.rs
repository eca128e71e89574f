//! Snapshot comparison.
//!
//! Exactly five tracked fields are compared; each mismatch contributes one
//! independent tag. There is no weighting: a tag is either present or not.

use crate::models::{ChangeType, Snapshot};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub changed: bool,
    pub change_types: Vec<ChangeType>,
}

/// Compare a stored baseline with a fresh capture.
pub fn compare(previous: &Snapshot, current: &Snapshot) -> SnapshotDiff {
    let mut change_types = Vec::new();

    if previous.dom_checksum() != current.dom_checksum() {
        change_types.push(ChangeType::Dom);
    }
    if previous.form_signature() != current.form_signature() {
        change_types.push(ChangeType::Forms);
    }
    if previous.has_captcha() != current.has_captcha() {
        change_types.push(ChangeType::Captcha);
    }
    if previous.likely_multi_step() != current.likely_multi_step() {
        change_types.push(ChangeType::StepHint);
    }
    // A missing URL and an empty one are the same observation.
    let prev_url = previous.resolved_url.as_deref().unwrap_or_default();
    let new_url = current.resolved_url.as_deref().unwrap_or_default();
    if prev_url != new_url {
        change_types.push(ChangeType::Url);
    }

    SnapshotDiff {
        changed: !change_types.is_empty(),
        change_types,
    }
}
