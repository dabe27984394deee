//! Browser capability consumed by the login steps.
//!
//! The orchestrator and handlers only talk to [`Browser`]; the WebDriver
//! implementation lives in [`webdriver`] and the scoped acquire/release
//! wrapper in [`session`].

mod session;
pub mod tooling;
pub mod webdriver;

pub use session::BrowserSession;
pub use webdriver::WebDriverBrowser;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};

/// How to find an element on the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locator {
    Id(String),
    Css(String),
}

impl Locator {
    pub fn id(id: impl Into<String>) -> Self {
        Locator::Id(id.into())
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Id(id) => write!(f, "#{}", id),
            Locator::Css(selector) => write!(f, "{}", selector),
        }
    }
}

/// What a located element must satisfy for a wait to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Present,
    Visible,
    Clickable,
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to start browser session: {0}")]
    Launch(String),

    #[error("element is no longer attached to the page: {0}")]
    StaleElement(String),

    #[error("browser command failed: {0}")]
    Command(String),

    #[error("browser session already closed")]
    Closed,
}

pub type BrowserResult<T> = Result<T, BrowserError>;

#[async_trait]
pub trait Browser: Send + Sync {
    type Element: Clone + Send + Sync;

    async fn navigate(&self, url: &str) -> BrowserResult<()>;

    /// Look up an element once. `Ok(None)` when nothing matches.
    async fn find(&self, locator: &Locator) -> BrowserResult<Option<Self::Element>>;

    async fn is_displayed(&self, element: &Self::Element) -> BrowserResult<bool>;

    async fn is_enabled(&self, element: &Self::Element) -> BrowserResult<bool>;

    async fn click(&self, element: &Self::Element) -> BrowserResult<()>;

    async fn type_text(&self, element: &Self::Element, text: &str) -> BrowserResult<()>;

    async fn press_enter(&self, element: &Self::Element) -> BrowserResult<()>;

    async fn text(&self, element: &Self::Element) -> BrowserResult<String>;

    async fn execute_script(&self, script: &str) -> BrowserResult<serde_json::Value>;

    async fn page_source(&self) -> BrowserResult<String>;

    async fn title(&self) -> BrowserResult<String>;

    async fn refresh(&self) -> BrowserResult<()>;

    async fn quit(&self) -> BrowserResult<()>;

    /// Interval between lookups inside the wait helpers.
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(200)
    }

    /// Check `condition` against an already located element.
    async fn satisfies(&self, element: &Self::Element, condition: Condition) -> BrowserResult<bool> {
        match condition {
            Condition::Present => Ok(true),
            Condition::Visible => self.is_displayed(element).await,
            Condition::Clickable => {
                Ok(self.is_displayed(element).await? && self.is_enabled(element).await?)
            }
        }
    }

    /// Wait until `locator` matches an element satisfying `condition`.
    ///
    /// Returns `Ok(None)` when `timeout` elapses first. Stale elements count
    /// as a miss and are looked up again.
    async fn wait_for(
        &self,
        locator: &Locator,
        condition: Condition,
        timeout: Duration,
    ) -> BrowserResult<Option<Self::Element>> {
        Ok(self
            .wait_for_any(std::slice::from_ref(locator), condition, timeout)
            .await?
            .map(|(_, element)| element))
    }

    /// Like [`Browser::wait_for`] over several locators; the first locator
    /// (in order) that matches on a poll wins.
    async fn wait_for_any(
        &self,
        locators: &[Locator],
        condition: Condition,
        timeout: Duration,
    ) -> BrowserResult<Option<(usize, Self::Element)>> {
        let deadline = Instant::now() + timeout;
        loop {
            for (index, locator) in locators.iter().enumerate() {
                if let Some(element) = self.find(locator).await? {
                    match self.satisfies(&element, condition).await {
                        Ok(true) => return Ok(Some((index, element))),
                        Ok(false) | Err(BrowserError::StaleElement(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep(self.poll_interval().min(deadline - now)).await;
        }
    }

    /// Wait until `locator` no longer matches. Returns `false` on timeout.
    async fn wait_until_gone(&self, locator: &Locator, timeout: Duration) -> BrowserResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.find(locator).await?.is_none() {
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            sleep(self.poll_interval().min(deadline - now)).await;
        }
    }
}

/// Click the cookie-consent banner if it is there. Never fails the run.
pub async fn dismiss_cookie_banner<B: Browser + ?Sized>(browser: &B, locator: &Locator) {
    match browser.find(locator).await {
        Ok(Some(button)) => match browser.click(&button).await {
            Ok(()) => tracing::info!("Dismissed cookie banner"),
            Err(e) => tracing::warn!("Failed to dismiss cookie banner: {}", e),
        },
        Ok(None) => tracing::debug!("No cookie banner found"),
        Err(e) => tracing::warn!("Unexpected error while looking for cookie banner: {}", e),
    }
}
