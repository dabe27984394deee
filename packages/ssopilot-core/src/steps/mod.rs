//! One handler per screen of the device-authorization flow.
//!
//! Each handler owns a detector (a marker element looked up with the short
//! check timeout) and an action (performed with the longer action timeout).
//! Handlers never fail the run: lookup misses are [`StepOutcome::NotApplicable`]
//! and failed actions are [`StepOutcome::Error`], which the orchestrator
//! treats as a stalled pass.

mod allow;
mod confirm;
mod credentials;
mod mfa;

pub use allow::{page_shows_success, AllowAccessHandler};
pub use confirm::ConfirmationCodeHandler;
pub use credentials::EmailPasswordHandler;
pub use mfa::MfaHandler;

use crate::auth::{CredentialSource, Prompter};
use crate::browser::{Browser, Condition, Locator};
use crate::config::{LoginConfig, Timing};
use crate::session::{LoginRequest, LoginSession};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Stable identity of a step handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    ConfirmationCode,
    Mfa,
    EmailPassword,
    AllowAccess,
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StepId::ConfirmationCode => "confirmation code",
            StepId::Mfa => "MFA",
            StepId::EmailPassword => "email/password",
            StepId::AllowAccess => "allow access",
        };
        f.write_str(name)
    }
}

/// Result of evaluating one handler against the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The handler's screen is not showing
    NotApplicable,
    /// The handler acted and the page should move on
    Handled,
    /// Login finished successfully
    Complete,
    /// The screen was detected but acting on it failed
    Error(String),
}

#[async_trait]
pub trait StepHandler<B: Browser>: Send + Sync {
    fn id(&self) -> StepId;

    async fn evaluate(&self, session: &mut LoginSession, browser: &B) -> StepOutcome;
}

/// Detection and action timeouts shared by all handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTimeouts {
    pub check: Duration,
    pub action: Duration,
}

impl From<&Timing> for StepTimeouts {
    fn from(timing: &Timing) -> Self {
        Self {
            check: timing.check_timeout(),
            action: timing.action_timeout(),
        }
    }
}

/// The four handlers in evaluation order.
pub fn default_handlers<B: Browser + 'static>(
    config: &LoginConfig,
    request: &LoginRequest,
    credentials: Arc<dyn CredentialSource>,
    prompter: Arc<dyn Prompter>,
) -> Vec<Box<dyn StepHandler<B>>> {
    let selectors = Arc::new(config.selectors.clone());
    let timeouts = StepTimeouts::from(&config.timing);
    vec![
        Box::new(ConfirmationCodeHandler::new(selectors.clone(), timeouts)),
        Box::new(MfaHandler::new(selectors.clone(), timeouts, prompter)),
        Box::new(EmailPasswordHandler::new(
            selectors.clone(),
            timeouts,
            credentials,
            request.profile.clone(),
            request.update_password,
        )),
        Box::new(AllowAccessHandler::new(selectors, timeouts)),
    ]
}

/// Look for a marker; lookup errors count as a miss.
async fn detect<B: Browser>(
    browser: &B,
    locator: &Locator,
    condition: Condition,
    timeout: Duration,
) -> Option<B::Element> {
    match browser.wait_for(locator, condition, timeout).await {
        Ok(found) => found,
        Err(e) => {
            tracing::debug!("Lookup of {} failed: {}", locator, e);
            None
        }
    }
}

/// Wait for `locator` to become clickable and click it.
async fn click_when_ready<B: Browser>(
    browser: &B,
    locator: &Locator,
    timeout: Duration,
) -> Result<(), String> {
    let element = browser
        .wait_for(locator, Condition::Clickable, timeout)
        .await
        .map_err(|e| format!("waiting for {}: {}", locator, e))?
        .ok_or_else(|| format!("{} not clickable within {}s", locator, timeout.as_secs_f64()))?;
    browser
        .click(&element)
        .await
        .map_err(|e| format!("clicking {}: {}", locator, e))
}
