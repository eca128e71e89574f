//! Captcha and multi-step heuristics.
//!
//! Both detectors are best-effort and infallible: anything that cannot be
//! evaluated counts as "not detected".

use scraper::{Html, Selector};
use tracing::debug;

use crate::models::{FormDescriptor, MultiStepSignal, SignalSet};

const CAPTCHA_KEYWORDS: &[&str] = &["captcha", "recaptcha", "hcaptcha", "arkose"];

const CAPTCHA_PROBES: &[&str] = &[
    "iframe[src*='recaptcha']",
    ".g-recaptcha",
    ".grecaptcha-badge",
    "iframe[src*='hcaptcha']",
    ".h-captcha",
    "div[id*='captcha']",
    "iframe[src*='arkoselabs']",
];

/// Markup fragments that hint at a wizard, with the signal each one emits.
const DOM_STEP_MARKERS: &[(&str, &str)] = &[
    ("data-step", "dom:data-step"),
    ("form-step", "dom:form-step"),
    ("wizard", "dom:wizard-keyword"),
    ("progressbar", "dom:progressbar"),
];

const CONTINUATION_TERMS: &[&str] = &["next", "continue", "step", "proceed", "save & next"];

pub const MULTIPLE_FORMS_SIGNAL: &str = "multiple-forms-on-page";

/// Keyword scan first, then the probe selectors; the first hit wins.
pub fn detect_captcha(document: &Html, html: &str) -> bool {
    let lowered = html.to_lowercase();
    if CAPTCHA_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        return true;
    }

    CAPTCHA_PROBES.iter().any(|probe| match Selector::parse(probe) {
        Ok(selector) => document.select(&selector).next().is_some(),
        Err(e) => {
            debug!(probe, "captcha probe could not be parsed: {e:?}");
            false
        }
    })
}

/// Accumulate multi-step cues from the markup, form datasets, submit texts
/// and the number of forms.
pub fn infer_multi_step(forms: &[FormDescriptor], html: &str) -> MultiStepSignal {
    let lowered = html.to_lowercase();
    let mut signals: Vec<String> = Vec::new();

    for (marker, signal) in DOM_STEP_MARKERS {
        if lowered.contains(marker) {
            signals.push(signal.to_string());
        }
    }

    for form in forms {
        for (key, value) in &form.dataset {
            if key.to_lowercase().contains("step") || value.to_lowercase().contains("step") {
                signals.push(format!("form-dataset:{key}={value}"));
            }
        }
        for submit in &form.submitters {
            let text = submit.text.to_lowercase();
            if !text.is_empty() && CONTINUATION_TERMS.iter().any(|term| text.contains(term)) {
                signals.push(format!("submit-text:{text}"));
            }
        }
    }

    if forms.len() > 1 {
        signals.push(MULTIPLE_FORMS_SIGNAL.to_string());
    }

    MultiStepSignal::from_signals(signals)
}

pub fn detect_signals(document: &Html, html: &str, forms: &[FormDescriptor]) -> SignalSet {
    SignalSet {
        captcha_present: detect_captcha(document, html),
        multi_step: infer_multi_step(forms, html),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::forms::extract_forms;
    use crate::models::SubmitCandidate;

    fn analyze(html: &str) -> SignalSet {
        let doc = Html::parse_document(html);
        let forms = extract_forms(&doc);
        detect_signals(&doc, html, &forms)
    }

    #[test]
    fn test_captcha_keyword() {
        assert!(analyze("<div class=\"g-recaptcha\" data-sitekey=\"k\"></div>").captcha_present);
        assert!(analyze("<p>Please solve the CAPTCHA</p>").captcha_present);
        assert!(!analyze("<form><input name=\"email\"></form>").captcha_present);
    }

    #[test]
    fn test_captcha_probe_without_keyword() {
        let html = "<iframe src=\"https://client-api.arkoselabs.com/fc\"></iframe>";
        // "arkoselabs" already contains the keyword; probe the selector path directly.
        let doc = Html::parse_document(html);
        assert!(detect_captcha(&doc, ""));
        assert!(!detect_captcha(&Html::parse_document("<p>plain</p>"), ""));
    }

    #[test]
    fn test_no_signals_on_plain_form() {
        let signals = analyze("<form><input name=\"q\"><button>Search</button></form>");
        assert!(!signals.multi_step.likely);
        assert!(signals.multi_step.signals.is_empty());
    }

    #[test]
    fn test_duplicate_next_buttons_yield_one_signal() {
        let signals = analyze(
            "<form><button>Next</button><button> next </button><input type=\"submit\" value=\"Next\"></form>",
        );
        assert_eq!(signals.multi_step.signals, vec!["submit-text:next".to_string()]);
        assert!(signals.multi_step.likely);
    }

    #[test]
    fn test_all_sources_sorted() {
        let html = r#"<div role="progressbar"></div>
            <form data-step="2" data-kind="wizard-step"><button>Save &amp; Next</button></form>
            <form><a role="button">Proceed</a></form>"#;
        let signals = analyze(html);
        assert_eq!(
            signals.multi_step.signals,
            vec![
                "dom:data-step",
                "dom:progressbar",
                "dom:wizard-keyword",
                "form-dataset:kind=wizard-step",
                "form-dataset:step=2",
                "multiple-forms-on-page",
                "submit-text:proceed",
                "submit-text:save & next",
            ]
        );
    }

    #[test]
    fn test_signals_independent_of_form_order() {
        let make = |text: &str| FormDescriptor {
            submitters: vec![SubmitCandidate {
                selector: "button".to_string(),
                text: text.to_string(),
                kind: "submit".to_string(),
            }],
            ..FormDescriptor::default()
        };
        let forward = vec![make("Continue"), make("Next")];
        let backward = vec![make("Next"), make("Continue")];
        assert_eq!(infer_multi_step(&forward, ""), infer_multi_step(&backward, ""));
    }
}
