//! In-memory rendering driver that replays canned responses per URL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::capture::driver::{BrowsingContext, CancelToken, RenderedPage, RenderingDriver};
use crate::capture::page::OUTER_HTML_SCRIPT;
use crate::errors::CaptureError;

#[derive(Clone, Debug)]
pub enum ScriptedResponse {
    Page(RenderedPage),
    Timeout,
    Fail(String),
    /// Fire the run's cancel token from inside navigation.
    CancelRun,
    /// Block until the run is cancelled.
    Hang,
}

impl ScriptedResponse {
    pub fn page(html: &str) -> Self {
        Self::Page(RenderedPage {
            html: html.to_string(),
            resolved_url: None,
            status_code: Some(200),
        })
    }

    pub fn page_at(html: &str, resolved_url: &str) -> Self {
        Self::Page(RenderedPage {
            html: html.to_string(),
            resolved_url: Some(resolved_url.to_string()),
            status_code: Some(200),
        })
    }
}

#[derive(Default)]
struct ScriptState {
    responses: Mutex<HashMap<String, ScriptedResponse>>,
    navigations: Mutex<Vec<String>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    failing_screenshots: Mutex<bool>,
}

#[derive(Clone, Default)]
pub struct ScriptedDriver {
    state: Arc<ScriptState>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: ScriptedResponse) {
        self.state.responses.lock().insert(url.to_string(), response);
    }

    pub fn fail_screenshots(&self) {
        *self.state.failing_screenshots.lock() = true;
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.navigations.lock().clone()
    }

    pub fn open_contexts(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst) - self.state.closed.load(Ordering::SeqCst)
    }

    pub fn closed_contexts(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }
}

impl RenderingDriver for ScriptedDriver {
    type Context = ScriptedContext;

    fn new_context(&self) -> Result<ScriptedContext, CaptureError> {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedContext {
            state: Arc::clone(&self.state),
            current_html: None,
        })
    }
}

pub struct ScriptedContext {
    state: Arc<ScriptState>,
    current_html: Option<String>,
}

impl BrowsingContext for ScriptedContext {
    fn navigate(
        &mut self,
        url: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<RenderedPage, CaptureError> {
        self.state.navigations.lock().push(url.to_string());
        let response = self.state.responses.lock().get(url).cloned();
        match response {
            Some(ScriptedResponse::Page(mut page)) => {
                if page.resolved_url.is_none() {
                    page.resolved_url = Some(url.to_string());
                }
                self.current_html = Some(page.html.clone());
                Ok(page)
            }
            Some(ScriptedResponse::Timeout) => Err(CaptureError::Timeout(timeout)),
            Some(ScriptedResponse::Fail(message)) => Err(CaptureError::Navigation(message)),
            Some(ScriptedResponse::CancelRun) => {
                cancel.cancel();
                Err(CaptureError::Cancelled)
            }
            Some(ScriptedResponse::Hang) => {
                cancel.sleep(Duration::from_secs(60))?;
                Err(CaptureError::Timeout(timeout))
            }
            None => Err(CaptureError::Navigation(format!("net::ERR_NAME_NOT_RESOLVED at {url}"))),
        }
    }

    fn evaluate(&mut self, script: &str) -> Result<Value, CaptureError> {
        if script == OUTER_HTML_SCRIPT {
            return self
                .current_html
                .clone()
                .map(Value::String)
                .ok_or_else(|| CaptureError::Evaluation("no document loaded".to_string()));
        }
        Ok(Value::Null)
    }

    fn screenshot(&mut self) -> Result<Vec<u8>, CaptureError> {
        if *self.state.failing_screenshots.lock() {
            return Err(CaptureError::Evaluation("screenshot failed".to_string()));
        }
        Ok(b"\x89PNG\r\n\x1a\nscripted".to_vec())
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
