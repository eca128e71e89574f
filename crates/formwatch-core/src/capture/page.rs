//! Single-page capture on an already opened browsing context.

use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::capture::driver::{BrowsingContext, CancelToken};
use crate::errors::CaptureError;

pub const OUTER_HTML_SCRIPT: &str = "document.documentElement.outerHTML";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapturedPage {
    pub html: String,
    pub resolved_url: Option<String>,
    pub status_code: Option<u16>,
    pub screenshot: Option<Vec<u8>>,
    /// Time from navigation start until the network settled.
    pub load_duration: Duration,
}

impl CapturedPage {
    pub fn load_duration_ms(&self) -> u64 {
        u64::try_from(self.load_duration.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Navigate, wait for the settle delay, then read the live document.
///
/// The document is re-read through `evaluate` after the delay so client-side
/// rendering that finishes late is included; if that read fails the HTML from
/// navigation is used. The screenshot is best-effort.
pub fn capture_page<C: BrowsingContext>(
    context: &mut C,
    url: &str,
    timeout: Duration,
    settle_delay: Duration,
    cancel: &CancelToken,
) -> Result<CapturedPage, CaptureError> {
    cancel.check()?;

    let started = Instant::now();
    let rendered = context.navigate(url, timeout, cancel)?;
    let load_duration = started.elapsed();
    debug!(url, elapsed_ms = load_duration.as_millis() as u64, "network settled");

    cancel.sleep(settle_delay)?;

    let html = match context.evaluate(OUTER_HTML_SCRIPT) {
        Ok(Value::String(live)) if !live.is_empty() => live,
        Ok(_) => rendered.html,
        Err(e) => {
            debug!(url, "live document read failed, using navigation snapshot: {e}");
            rendered.html
        }
    };
    cancel.check()?;

    let screenshot = match context.screenshot() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(url, "screenshot failed: {e}");
            None
        }
    };

    Ok(CapturedPage {
        html,
        resolved_url: rendered.resolved_url,
        status_code: rendered.status_code,
        screenshot,
        load_duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::driver::RenderingDriver;
    use crate::capture::scripted::{ScriptedDriver, ScriptedResponse};

    const URL: &str = "https://acme.test/signup";

    fn run(driver: &ScriptedDriver, cancel: &CancelToken) -> Result<CapturedPage, CaptureError> {
        let mut context = driver.new_context().unwrap();
        capture_page(
            &mut context,
            URL,
            Duration::from_millis(500),
            Duration::from_millis(1),
            cancel,
        )
    }

    #[test]
    fn test_capture_reads_document_and_screenshot() {
        let driver = ScriptedDriver::new();
        driver.respond(URL, ScriptedResponse::page_at("<html><form></form></html>", "https://acme.test/join"));
        let page = run(&driver, &CancelToken::new()).unwrap();
        assert_eq!(page.html, "<html><form></form></html>");
        assert_eq!(page.resolved_url.as_deref(), Some("https://acme.test/join"));
        assert_eq!(page.status_code, Some(200));
        assert!(page.screenshot.is_some());
    }

    #[test]
    fn test_screenshot_failure_is_not_fatal() {
        let driver = ScriptedDriver::new();
        driver.respond(URL, ScriptedResponse::page("<html></html>"));
        driver.fail_screenshots();
        let page = run(&driver, &CancelToken::new()).unwrap();
        assert!(page.screenshot.is_none());
    }

    #[test]
    fn test_timeout_is_typed() {
        let driver = ScriptedDriver::new();
        driver.respond(URL, ScriptedResponse::Timeout);
        let err = run(&driver, &CancelToken::new()).unwrap_err();
        assert_eq!(err, CaptureError::Timeout(Duration::from_millis(500)));
        assert_eq!(err.to_string(), "Navigation timeout after 500 ms");
    }

    #[test]
    fn test_cancelled_before_navigation() {
        let driver = ScriptedDriver::new();
        driver.respond(URL, ScriptedResponse::page("<html></html>"));
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(run(&driver, &cancel), Err(CaptureError::Cancelled));
        assert!(driver.navigations().is_empty());
    }

    #[test]
    fn test_hanging_navigation_returns_on_cancel() {
        let driver = ScriptedDriver::new();
        driver.respond(URL, ScriptedResponse::Hang);
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });
        let result = run(&driver, &cancel);
        handle.join().unwrap();
        assert_eq!(result, Err(CaptureError::Cancelled));
    }
}
