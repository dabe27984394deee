//! Final "Allow access" screen and success detection.

use super::{StepHandler, StepId, StepOutcome, StepTimeouts};
use crate::browser::{Browser, Condition};
use crate::config::Selectors;
use crate::session::LoginSession;
use async_trait::async_trait;
use std::sync::Arc;

const VISIBLE_TEXT_SCRIPT: &str = "return document.body ? document.body.innerText : '';";

/// Visible page text, falling back to the page source.
async fn visible_text<B: Browser>(browser: &B) -> String {
    match browser.execute_script(VISIBLE_TEXT_SCRIPT).await {
        Ok(serde_json::Value::String(text)) => text,
        Ok(_) | Err(_) => browser.page_source().await.unwrap_or_default(),
    }
}

/// True when the portal title and a success phrase are both showing.
pub async fn page_shows_success<B: Browser>(browser: &B, selectors: &Selectors) -> bool {
    let title = match browser.title().await {
        Ok(title) => title,
        Err(e) => {
            tracing::debug!("Failed to read page title: {}", e);
            return false;
        }
    };
    if !title.contains(&selectors.success_title) {
        return false;
    }

    let text = visible_text(browser).await.to_lowercase();
    match selectors
        .success_phrases
        .iter()
        .find(|phrase| text.contains(&phrase.to_lowercase()))
    {
        Some(phrase) => {
            tracing::info!("Success marker found: '{}'", phrase);
            true
        }
        None => false,
    }
}

pub struct AllowAccessHandler {
    selectors: Arc<Selectors>,
    timeouts: StepTimeouts,
}

impl AllowAccessHandler {
    pub fn new(selectors: Arc<Selectors>, timeouts: StepTimeouts) -> Self {
        Self { selectors, timeouts }
    }
}

#[async_trait]
impl<B: Browser> StepHandler<B> for AllowAccessHandler {
    fn id(&self) -> StepId {
        StepId::AllowAccess
    }

    async fn evaluate(&self, session: &mut LoginSession, browser: &B) -> StepOutcome {
        if !session.navigated {
            return StepOutcome::NotApplicable;
        }

        if page_shows_success(browser, &self.selectors).await {
            return StepOutcome::Complete;
        }

        let found = browser
            .wait_for_any(&self.selectors.allow_buttons, Condition::Clickable, self.timeouts.check)
            .await;
        match found {
            Ok(Some((index, button))) => match browser.click(&button).await {
                Ok(()) => {
                    tracing::info!("Clicked allow access ({})", self.selectors.allow_buttons[index]);
                    StepOutcome::Handled
                }
                Err(e) => StepOutcome::Error(format!("failed to click allow access: {}", e)),
            },
            Ok(None) => StepOutcome::NotApplicable,
            Err(e) => {
                tracing::debug!("Allow access lookup failed: {}", e);
                StepOutcome::NotApplicable
            }
        }
    }
}
