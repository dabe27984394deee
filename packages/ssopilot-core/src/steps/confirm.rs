//! Device confirmation page ("Confirm and continue").

use super::{detect, StepHandler, StepId, StepOutcome, StepTimeouts};
use crate::browser::{Browser, Condition};
use crate::config::Selectors;
use crate::session::LoginSession;
use async_trait::async_trait;
use std::sync::Arc;

pub struct ConfirmationCodeHandler {
    selectors: Arc<Selectors>,
    timeouts: StepTimeouts,
}

impl ConfirmationCodeHandler {
    pub fn new(selectors: Arc<Selectors>, timeouts: StepTimeouts) -> Self {
        Self { selectors, timeouts }
    }

    /// Type the pending verification code if the page asks for one.
    /// Returns whether a code was entered.
    async fn enter_code<B: Browser>(&self, session: &mut LoginSession, browser: &B) -> bool {
        let (Some(input), Some(code)) = (&self.selectors.code_input, session.verification_code.as_deref())
        else {
            return false;
        };
        let Some(field) = detect(browser, input, Condition::Visible, self.timeouts.check).await else {
            return false;
        };
        match browser.type_text(&field, code).await {
            Ok(()) => {
                tracing::info!("Entered verification code");
                session.verification_code = None;
                true
            }
            Err(e) => {
                tracing::warn!("Failed to enter verification code: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl<B: Browser> StepHandler<B> for ConfirmationCodeHandler {
    fn id(&self) -> StepId {
        StepId::ConfirmationCode
    }

    async fn evaluate(&self, session: &mut LoginSession, browser: &B) -> StepOutcome {
        let marker = &self.selectors.confirm_button;
        let Some(button) = detect(browser, marker, Condition::Clickable, self.timeouts.check).await else {
            return StepOutcome::NotApplicable;
        };
        tracing::info!("Confirmation page detected");

        let typed = self.enter_code(session, browser).await;
        let submitted = if session.code_prefilled || typed {
            browser.press_enter(&button).await
        } else {
            browser.click(&button).await
        };
        if let Err(e) = submitted {
            return StepOutcome::Error(format!("failed to confirm code: {}", e));
        }

        match browser.wait_until_gone(marker, self.timeouts.action).await {
            Ok(true) => {
                tracing::info!("Code confirmed");
                StepOutcome::Handled
            }
            Ok(false) => StepOutcome::Error("confirmation page did not advance".to_string()),
            Err(e) => StepOutcome::Error(format!("confirmation page check failed: {}", e)),
        }
    }
}
