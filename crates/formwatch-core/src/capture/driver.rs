//! Rendering-engine seam.
//!
//! A [`RenderingDriver`] hands out isolated [`BrowsingContext`]s; each
//! context owns its own cookies and storage and is used by exactly one job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::errors::CaptureError;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Run-level cancellation flag shared by every job of a run.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), CaptureError> {
        if self.is_cancelled() {
            Err(CaptureError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early with [`CaptureError::Cancelled`]
    /// when the token fires.
    pub fn sleep(&self, duration: Duration) -> Result<(), CaptureError> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(CANCEL_POLL_INTERVAL));
        }
    }
}

/// What a navigation produced once the network settled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderedPage {
    pub html: String,
    pub resolved_url: Option<String>,
    pub status_code: Option<u16>,
}

pub trait RenderingDriver: Send + Sync {
    type Context: BrowsingContext;

    /// Open a fresh, isolated browsing context.
    fn new_context(&self) -> Result<Self::Context, CaptureError>;
}

pub trait BrowsingContext {
    /// Load `url` and wait for network activity to settle, bounded by
    /// `timeout`. Must return [`CaptureError::Cancelled`] promptly once
    /// `cancel` fires.
    fn navigate(
        &mut self,
        url: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<RenderedPage, CaptureError>;

    fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, CaptureError>;

    /// PNG bytes of the current viewport.
    fn screenshot(&mut self) -> Result<Vec<u8>, CaptureError>;

    fn close(&mut self) -> Result<(), CaptureError>;
}

/// Owns a browsing context and closes it when dropped, on every exit path.
pub struct ContextGuard<C: BrowsingContext> {
    context: C,
    closed: bool,
}

impl<C: BrowsingContext> ContextGuard<C> {
    pub fn new(context: C) -> Self {
        Self {
            context,
            closed: false,
        }
    }

    pub fn context(&mut self) -> &mut C {
        &mut self.context
    }

    /// Close now and surface the error instead of logging it.
    pub fn close(mut self) -> Result<(), CaptureError> {
        self.closed = true;
        self.context.close()
    }
}

impl<C: BrowsingContext> Drop for ContextGuard<C> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.context.close() {
            warn!("failed to close browsing context: {e}");
        }
    }
}
