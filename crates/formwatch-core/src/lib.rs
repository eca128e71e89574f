//! formwatch core library: form discovery and change detection for
//! third-party submission pages.
//!
//! A run renders each target page in an isolated browsing context, extracts
//! an order-stable description of its forms, fingerprints it, compares it
//! with the stored baseline and records the outcome in a per-site snapshot,
//! a master index and an append-only change log.
//!
//! The rendering engine sits behind [`capture::RenderingDriver`]; the
//! Chromium implementation is available with the `chrome` feature.

pub mod capture;
pub mod config;
pub mod diff;
pub mod errors;
pub mod extract;
pub mod fingerprint;
pub mod models;
pub mod monitor;
pub mod store;

pub use capture::{CancelToken, RenderingDriver};
pub use config::MonitorConfig;
pub use errors::{CaptureError, FormwatchError, FormwatchResult};
pub use models::{prepare_targets, RawTarget, Target};
pub use monitor::{Monitor, RunSummary, TargetOutcome};
