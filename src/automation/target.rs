// src/automation/target.rs
//! Contract the browser automation engine fulfils for a capture session

use crate::automation::raw::RawEvent;
use crate::utils::errors::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;

/// A navigable page plus its recording context
///
/// Implementations map their own failures to `EngineError::TargetClosed`
/// when the page or connection is gone and `EngineError::ExternalTarget`
/// otherwise. Callers bound every call with their own timeout.
#[async_trait]
pub trait AutomationTarget: Send + Sync {
    /// Open a fresh recording context whose native HAR export goes to
    /// `har_path`, returning the stream of raw callbacks for its page
    async fn attach(&self, har_path: &Path) -> Result<mpsc::UnboundedReceiver<RawEvent>>;

    /// Navigate the page, returning the main response status if any
    async fn navigate(&self, url: &str) -> Result<Option<u16>>;

    /// Evaluate `script` in the page with one JSON argument
    async fn evaluate(&self, script: &str, arg: serde_json::Value) -> Result<serde_json::Value>;

    /// URL of the page, `None` if there is no page
    fn current_url(&self) -> Option<String>;

    /// Whether the page has been closed
    fn is_closed(&self) -> bool;

    /// Close the recording context. The HAR export may legitimately be
    /// missing afterwards.
    async fn close(&self) -> Result<()>;
}

/// URL of the placeholder page a fresh context starts on
pub const BLANK_PAGE: &str = "about:blank";

/// Add `https://` when `url` has no scheme
pub fn normalize_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("about:") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("example.com"), "https://example.com");
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
        assert_eq!(normalize_url("about:blank"), "about:blank");
    }
}
