//! One-time code screen of the identity provider.

use super::{click_when_ready, detect, StepHandler, StepId, StepOutcome, StepTimeouts};
use crate::auth::Prompter;
use crate::browser::{Browser, Condition};
use crate::config::Selectors;
use crate::session::LoginSession;
use async_trait::async_trait;
use std::sync::Arc;

pub struct MfaHandler {
    selectors: Arc<Selectors>,
    timeouts: StepTimeouts,
    prompter: Arc<dyn Prompter>,
}

impl MfaHandler {
    pub fn new(selectors: Arc<Selectors>, timeouts: StepTimeouts, prompter: Arc<dyn Prompter>) -> Self {
        Self {
            selectors,
            timeouts,
            prompter,
        }
    }

    /// Tick "don't ask again" when the page offers it.
    async fn remember_device<B: Browser>(&self, browser: &B) {
        let checkbox = &self.selectors.mfa_remember;
        match browser.find(checkbox).await {
            Ok(Some(element)) => match browser.is_displayed(&element).await {
                Ok(true) => match browser.click(&element).await {
                    Ok(()) => tracing::debug!("Ticked 'don't ask again'"),
                    Err(e) => tracing::warn!("Failed to tick 'don't ask again': {}", e),
                },
                _ => tracing::debug!("'Don't ask again' not visible"),
            },
            _ => tracing::debug!("'Don't ask again' not offered"),
        }
    }
}

#[async_trait]
impl<B: Browser> StepHandler<B> for MfaHandler {
    fn id(&self) -> StepId {
        StepId::Mfa
    }

    async fn evaluate(&self, _session: &mut LoginSession, browser: &B) -> StepOutcome {
        let sel = &self.selectors;
        let Some(description) = detect(browser, &sel.mfa_description, Condition::Visible, self.timeouts.check).await
        else {
            return StepOutcome::NotApplicable;
        };

        let text = browser.text(&description).await.unwrap_or_default();
        tracing::info!("MFA required: {}", text.trim());

        let code = match self.prompter.mfa_code(text.trim()).await {
            Ok(code) => code,
            Err(e) => return StepOutcome::Error(e.to_string()),
        };

        let input = match browser
            .wait_for(&sel.mfa_code_input, Condition::Visible, self.timeouts.action)
            .await
        {
            Ok(Some(input)) => input,
            Ok(None) => return StepOutcome::Error("MFA code input did not appear".to_string()),
            Err(e) => return StepOutcome::Error(format!("MFA code input lookup failed: {}", e)),
        };
        if let Err(e) = browser.type_text(&input, &code).await {
            return StepOutcome::Error(format!("failed to type MFA code: {}", e));
        }

        self.remember_device(browser).await;

        if let Err(e) = click_when_ready(browser, &sel.mfa_verify, self.timeouts.action).await {
            return StepOutcome::Error(format!("failed to submit MFA code: {}", e));
        }
        tracing::info!("MFA code submitted");
        StepOutcome::Handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{session_for, test_timeouts, FakeBrowser, ScriptedPrompter};

    fn handler(prompter: Arc<ScriptedPrompter>) -> MfaHandler {
        MfaHandler::new(Arc::new(Selectors::default()), test_timeouts(), prompter)
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_applicable_without_description() {
        let prompter = Arc::new(ScriptedPrompter::new().with_mfa_code("123456"));
        let browser = FakeBrowser::new();
        let mut session = session_for("https://example.awsapps.com/start/#/device");

        let outcome = handler(prompter.clone()).evaluate(&mut session, &browser).await;
        assert_eq!(outcome, StepOutcome::NotApplicable);
        assert_eq!(prompter.mfa_prompts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompts_types_and_submits() {
        let sel = Selectors::default();
        let browser = FakeBrowser::new();
        browser.show(&sel.mfa_description);
        browser.set_text(&sel.mfa_description, "Enter the code displayed in your authenticator app");
        browser.show(&sel.mfa_code_input);
        browser.show(&sel.mfa_remember);
        browser.show(&sel.mfa_verify);

        let prompter = Arc::new(ScriptedPrompter::new().with_mfa_code("654321"));
        let mut session = session_for("https://example.awsapps.com/start/#/device");
        let outcome = handler(prompter.clone()).evaluate(&mut session, &browser).await;

        assert_eq!(outcome, StepOutcome::Handled);
        assert_eq!(browser.typed(), vec![(sel.mfa_code_input.clone(), "654321".to_string())]);
        assert_eq!(browser.clicks(), vec![sel.mfa_remember, sel.mfa_verify]);
        assert_eq!(
            prompter.mfa_descriptions(),
            vec!["Enter the code displayed in your authenticator app".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_verify_button_is_error() {
        let sel = Selectors::default();
        let browser = FakeBrowser::new();
        browser.show(&sel.mfa_description);
        browser.show(&sel.mfa_code_input);

        let prompter = Arc::new(ScriptedPrompter::new().with_mfa_code("654321"));
        let mut session = session_for("https://example.awsapps.com/start/#/device");
        let outcome = handler(prompter).evaluate(&mut session, &browser).await;

        assert!(matches!(outcome, StepOutcome::Error(_)));
    }
}
