//! Scoped browser ownership for one login attempt.

use super::Browser;

/// Owns the browser for the duration of one login attempt.
///
/// Call [`BrowserSession::release`] on every exit path. A session dropped
/// without release (e.g. on panic) schedules a best-effort quit on the
/// current runtime.
pub struct BrowserSession<B: Browser + 'static> {
    browser: Option<B>,
}

impl<B: Browser + 'static> BrowserSession<B> {
    pub fn new(browser: B) -> Self {
        Self {
            browser: Some(browser),
        }
    }

    /// The live browser. Panics only if used after release, which the
    /// by-value `release` makes impossible.
    pub fn browser(&self) -> &B {
        match &self.browser {
            Some(browser) => browser,
            None => unreachable!("browser session used after release"),
        }
    }

    /// Quit the browser. Errors are logged, never returned.
    pub async fn release(mut self) {
        if let Some(browser) = self.browser.take() {
            tracing::info!("Closing browser session...");
            match browser.quit().await {
                Ok(()) => tracing::info!("Browser session closed"),
                Err(e) => tracing::warn!("Failed to close browser session cleanly: {}", e),
            }
        }
    }
}

impl<B: Browser + 'static> Drop for BrowserSession<B> {
    fn drop(&mut self) {
        let Some(browser) = self.browser.take() else {
            return;
        };
        tracing::warn!("Browser session dropped without release, closing in background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = browser.quit().await {
                        tracing::warn!("Background browser close failed: {}", e);
                    }
                });
            }
            Err(_) => tracing::warn!("No async runtime available, browser left running"),
        }
    }
}
