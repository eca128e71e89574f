//! Headless Chromium driver over the DevTools protocol.
//!
//! The driver owns a small tokio runtime and exposes the blocking
//! [`RenderingDriver`] interface on top of it, so the monitor can run jobs on
//! plain worker threads. Every context is a separate incognito browser
//! context with a single page.

use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::handler::viewport::Viewport as CdpViewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Handler, Page};
use futures::StreamExt;
use serde_json::Value;
use tokio::runtime::Runtime;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capture::driver::{BrowsingContext, CancelToken, RenderedPage, RenderingDriver};
use crate::config::MonitorConfig;
use crate::errors::{CaptureError, FormwatchError, FormwatchResult};

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);
const NETWORK_IDLE_MS: u64 = 500;
const STATUS_SCRIPT: &str =
    "(() => { try { return performance.getEntriesByType('navigation')[0].responseStatus || null; } catch (_) { return null; } })()";

struct ChromeShared {
    runtime: Runtime,
    browser: Mutex<Browser>,
    handler_task: JoinHandle<()>,
}

impl Drop for ChromeShared {
    fn drop(&mut self) {
        let browser = self.browser.get_mut();
        self.runtime.block_on(async {
            if let Err(e) = browser.close().await {
                debug!("browser close failed: {e}");
            }
            let _ = browser.wait().await;
        });
        self.handler_task.abort();
    }
}

#[derive(Clone)]
pub struct ChromeDriver {
    shared: Arc<ChromeShared>,
}

impl ChromeDriver {
    /// Launch a Chromium process configured from `config`.
    pub fn launch(config: &MonitorConfig) -> FormwatchResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;

        let mut builder = BrowserConfig::builder()
            .window_size(config.viewport.width, config.viewport.height)
            .viewport(CdpViewport {
                width: config.viewport.width,
                height: config.viewport.height,
                ..CdpViewport::default()
            })
            .request_timeout(config.timeout);
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder.build().map_err(FormwatchError::Driver)?;

        let (browser, handler) = runtime
            .block_on(Browser::launch(browser_config))
            .map_err(|e| FormwatchError::Driver(format!("failed to launch browser: {e}")))?;
        let handler_task = runtime.spawn(drive_handler(handler));

        info!(
            headless = config.headless,
            width = config.viewport.width,
            height = config.viewport.height,
            "browser launched"
        );

        Ok(Self {
            shared: Arc::new(ChromeShared {
                runtime,
                browser: Mutex::new(browser),
                handler_task,
            }),
        })
    }
}

async fn drive_handler(mut handler: Handler) {
    while let Some(event) = handler.next().await {
        if let Err(e) = event {
            warn!("browser handler event error: {e}");
        }
    }
}

impl RenderingDriver for ChromeDriver {
    type Context = ChromeContext;

    fn new_context(&self) -> Result<ChromeContext, CaptureError> {
        let shared = Arc::clone(&self.shared);
        let (context_id, page) = self.shared.runtime.block_on(async {
            let browser = shared.browser.lock().await;
            let created = browser
                .execute(CreateBrowserContextParams::default())
                .await
                .map_err(|e| CaptureError::Context(e.to_string()))?;
            let context_id = created.result.browser_context_id;
            let params = CreateTargetParams::builder()
                .url("about:blank")
                .browser_context_id(context_id.clone())
                .build()
                .map_err(CaptureError::Context)?;
            let page = browser
                .new_page(params)
                .await
                .map_err(|e| CaptureError::Context(e.to_string()))?;
            Ok::<_, CaptureError>((context_id, page))
        })?;

        Ok(ChromeContext {
            shared,
            context_id: Some(context_id),
            page: Some(page),
        })
    }
}

pub struct ChromeContext {
    shared: Arc<ChromeShared>,
    context_id: Option<BrowserContextId>,
    page: Option<Page>,
}

impl ChromeContext {
    fn page(&self) -> Result<Page, CaptureError> {
        self.page
            .clone()
            .ok_or_else(|| CaptureError::Context("browsing context already closed".to_string()))
    }
}

impl BrowsingContext for ChromeContext {
    fn navigate(
        &mut self,
        url: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<RenderedPage, CaptureError> {
        let page = self.page()?;
        self.shared.runtime.block_on(async {
            tokio::select! {
                _ = wait_for_cancel(cancel) => Err(CaptureError::Cancelled),
                outcome = tokio::time::timeout(timeout, load(&page, url, timeout)) => {
                    outcome.unwrap_or(Err(CaptureError::Timeout(timeout)))
                }
            }
        })
    }

    fn evaluate(&mut self, script: &str) -> Result<Value, CaptureError> {
        let page = self.page()?;
        self.shared.runtime.block_on(async {
            let result = page
                .evaluate(script)
                .await
                .map_err(|e| CaptureError::Evaluation(e.to_string()))?;
            Ok(result.value().cloned().unwrap_or(Value::Null))
        })
    }

    fn screenshot(&mut self) -> Result<Vec<u8>, CaptureError> {
        let page = self.page()?;
        self.shared.runtime.block_on(async {
            page.screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(|e| CaptureError::Evaluation(e.to_string()))
        })
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        let page = self.page.take();
        let context_id = self.context_id.take();
        let shared = Arc::clone(&self.shared);
        self.shared.runtime.block_on(async {
            if let Some(page) = page {
                if let Err(e) = page.close().await {
                    debug!("page close failed: {e}");
                }
            }
            if let Some(id) = context_id {
                let browser = shared.browser.lock().await;
                browser
                    .execute(DisposeBrowserContextParams::new(id))
                    .await
                    .map_err(|e| CaptureError::Context(e.to_string()))?;
            }
            Ok(())
        })
    }
}

async fn wait_for_cancel(cancel: &CancelToken) {
    while !cancel.is_cancelled() {
        tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
    }
}

async fn load(page: &Page, url: &str, timeout: Duration) -> Result<RenderedPage, CaptureError> {
    page.goto(url)
        .await
        .map_err(|e| CaptureError::Navigation(e.to_string()))?;
    wait_for_network_idle(page, timeout).await;

    let html = page
        .content()
        .await
        .map_err(|e| CaptureError::Evaluation(e.to_string()))?;
    let resolved_url = page
        .url()
        .await
        .map_err(|e| CaptureError::Evaluation(e.to_string()))?;
    let status_code = match page.evaluate(STATUS_SCRIPT).await {
        Ok(result) => result
            .value()
            .and_then(Value::as_u64)
            .and_then(|code| u16::try_from(code).ok()),
        Err(e) => {
            debug!(url, "status lookup failed: {e}");
            None
        }
    };

    Ok(RenderedPage {
        html,
        resolved_url,
        status_code,
    })
}

/// Poll the resource-timing buffer until it stops growing for a short window
/// with the document complete. Gives up silently at `timeout`; the outer
/// deadline decides whether that is an error.
async fn wait_for_network_idle(page: &Page, timeout: Duration) {
    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    let js = format!(
        r#"(async () => {{
            const timeoutMs = {timeout_ms};
            const idleMs = {NETWORK_IDLE_MS};
            const interval = 100;
            const start = Date.now();
            const count = () => {{
                try {{ return performance.getEntriesByType('resource').length; }} catch (_) {{ return 0; }}
            }};
            let last = count();
            let stable = 0;
            while (Date.now() - start < timeoutMs) {{
                await new Promise(r => setTimeout(r, interval));
                const current = count();
                if (document.readyState === 'complete' && current === last) {{
                    stable += interval;
                    if (stable >= idleMs) {{
                        return {{ ok: true, resources: current, waitedMs: Date.now() - start }};
                    }}
                }} else {{
                    stable = 0;
                }}
                last = current;
            }}
            return {{ ok: false, resources: last, waitedMs: Date.now() - start }};
        }})()"#
    );

    match page.evaluate(js).await {
        Ok(result) => {
            let info = result.value().cloned().unwrap_or(Value::Null);
            let ok = info.get("ok").and_then(Value::as_bool).unwrap_or(false);
            let waited = info.get("waitedMs").and_then(Value::as_u64).unwrap_or(0);
            let resources = info.get("resources").and_then(Value::as_u64).unwrap_or(0);
            if ok {
                debug!(resources, waited_ms = waited, "network idle reached");
            } else {
                warn!(resources, waited_ms = waited, "network idle not reached");
            }
        }
        Err(e) => warn!("network idle probe failed: {e}"),
    }
}
