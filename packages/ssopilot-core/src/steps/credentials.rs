//! Email and password sign-in screens.

use super::{click_when_ready, detect, StepHandler, StepId, StepOutcome, StepTimeouts};
use crate::auth::CredentialSource;
use crate::browser::{Browser, Condition};
use crate::config::Selectors;
use crate::session::LoginSession;
use async_trait::async_trait;
use std::sync::Arc;

pub struct EmailPasswordHandler {
    selectors: Arc<Selectors>,
    timeouts: StepTimeouts,
    credentials: Arc<dyn CredentialSource>,
    profile: String,
    update_password: bool,
}

impl EmailPasswordHandler {
    pub fn new(
        selectors: Arc<Selectors>,
        timeouts: StepTimeouts,
        credentials: Arc<dyn CredentialSource>,
        profile: String,
        update_password: bool,
    ) -> Self {
        Self {
            selectors,
            timeouts,
            credentials,
            profile,
            update_password,
        }
    }

    async fn load_credentials(&self, session: &mut LoginSession) -> Result<(String, String), String> {
        if let (Some(email), Some(password)) = (&session.email, &session.password) {
            return Ok((email.clone(), password.clone()));
        }
        let creds = self
            .credentials
            .get_credentials(&self.profile, self.update_password)
            .await
            .map_err(|e| e.to_string())?;
        session.email = Some(creds.email.clone());
        session.password = Some(creds.password.clone());
        Ok((creds.email, creds.password))
    }

    /// Answer "Stay signed in?" with yes if it shows up.
    async fn stay_signed_in<B: Browser>(&self, browser: &B) {
        let sel = &self.selectors;
        let Some(checkbox) = detect(browser, &sel.stay_signed_in_checkbox, Condition::Visible, self.timeouts.check).await
        else {
            tracing::debug!("No 'stay signed in' prompt");
            return;
        };
        if let Err(e) = browser.click(&checkbox).await {
            tracing::warn!("Failed to tick 'stay signed in': {}", e);
            return;
        }
        match click_when_ready(browser, &sel.stay_signed_in_yes, self.timeouts.check).await {
            Ok(()) => tracing::info!("Accepted 'stay signed in'"),
            Err(e) => tracing::warn!("Failed to accept 'stay signed in': {}", e),
        }
    }
}

#[async_trait]
impl<B: Browser> StepHandler<B> for EmailPasswordHandler {
    fn id(&self) -> StepId {
        StepId::EmailPassword
    }

    async fn evaluate(&self, session: &mut LoginSession, browser: &B) -> StepOutcome {
        let sel = &self.selectors;
        let Some(email_input) = detect(browser, &sel.email_input, Condition::Visible, self.timeouts.check).await
        else {
            return StepOutcome::NotApplicable;
        };

        if session.credentials_submitted {
            tracing::warn!("Sign-in page shown again after credentials were submitted, not re-submitting");
            return StepOutcome::NotApplicable;
        }
        tracing::info!("Sign-in page detected");

        let (email, password) = match self.load_credentials(session).await {
            Ok(creds) => creds,
            Err(e) => return StepOutcome::Error(format!("credentials unavailable: {}", e)),
        };

        if let Err(e) = browser.type_text(&email_input, &email).await {
            return StepOutcome::Error(format!("failed to type email: {}", e));
        }
        if let Err(e) = click_when_ready(browser, &sel.submit_button, self.timeouts.action).await {
            return StepOutcome::Error(format!("failed to submit email: {}", e));
        }

        let password_input = match browser
            .wait_for(&sel.password_input, Condition::Visible, self.timeouts.action)
            .await
        {
            Ok(Some(input)) => input,
            Ok(None) => return StepOutcome::Error("password field did not appear".to_string()),
            Err(e) => return StepOutcome::Error(format!("password field lookup failed: {}", e)),
        };
        if let Err(e) = browser.type_text(&password_input, &password).await {
            return StepOutcome::Error(format!("failed to type password: {}", e));
        }

        if let Err(e) = click_when_ready(browser, &sel.submit_button, self.timeouts.action).await {
            return StepOutcome::Error(format!("failed to submit password: {}", e));
        }
        session.credentials_submitted = true;
        tracing::info!("Credentials submitted");

        self.stay_signed_in(browser).await;
        StepOutcome::Handled
    }
}
