//! Driver abstraction over browser automation.
//!
//! The session manager drives pages through these traits so the
//! chromiumoxide dependency stays behind the `browser` feature and tests
//! can substitute scripted fakes.

use async_trait::async_trait;

use super::error::ScrapeError;

/// Creates fresh automation pages.
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn AutomationPage>, ScrapeError>;
}

/// One browser tab/page, exclusively owned by a session.
#[async_trait]
pub trait AutomationPage: Send {
    /// Navigate and wait for the load to settle.
    async fn goto(&mut self, url: &str) -> Result<(), ScrapeError>;

    /// Current page HTML.
    async fn content(&mut self) -> Result<String, ScrapeError>;

    /// Type into the element matching the selector.
    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), ScrapeError>;

    /// Click the element matching the selector.
    async fn click(&mut self, selector: &str) -> Result<(), ScrapeError>;

    /// URL after redirects.
    async fn current_url(&mut self) -> Result<String, ScrapeError>;

    /// Release the underlying page. Errors are ignored; the page is gone
    /// either way.
    async fn close(&mut self);
}
