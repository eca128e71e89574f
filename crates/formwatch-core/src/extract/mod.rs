//! Structured extraction over a rendered document.
//!
//! Forms and signals are both read from the same parsed tree so a snapshot
//! never mixes two renderings of a page.

pub mod dom;
pub mod forms;
pub mod selector;
pub mod signals;

use scraper::Html;

use crate::models::{FormDescriptor, SignalSet};

/// Everything the monitor derives from one rendered page.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageAnalysis {
    pub forms: Vec<FormDescriptor>,
    pub signals: SignalSet,
}

/// Parse `html` once and run form extraction and signal detection over it.
pub fn analyze(html: &str) -> PageAnalysis {
    let document = Html::parse_document(html);
    let forms = forms::extract_forms(&document);
    let signals = signals::detect_signals(&document, html, &forms);
    PageAnalysis { forms, signals }
}
