//! Page rendering: driver seam, capture flow and the Chromium driver.

#[cfg(feature = "chrome")]
pub mod chrome;
pub mod driver;
pub mod page;

#[cfg(test)]
pub(crate) mod scripted;

pub use driver::{BrowsingContext, CancelToken, ContextGuard, RenderedPage, RenderingDriver};
pub use page::{capture_page, CapturedPage};
