//! Polling state machine that walks the browser through the login screens.
//!
//! ```text
//! Navigating -> Polling -> Handling -> Polling ...
//!                       -> Stalled  -> Polling (refresh at the threshold)
//!                       -> Terminal
//! ```

use crate::browser::{dismiss_cookie_banner, Browser, Locator};
use crate::config::{BackoffPolicy, LoginConfig};
use crate::error::{LoginError, LoginResult};
use crate::session::{LoginSession, TerminalStatus};
use crate::steps::{StepHandler, StepId, StepOutcome};
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Navigating,
    Polling,
    Handling(StepId),
    Stalled,
    Terminal,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Pause after a handled step before the next pass
    pub settle_delay: Duration,
    /// Empty passes in a row before the page is refreshed
    pub stall_threshold: u32,
    pub backoff: BackoffPolicy,
    pub cookie_banner: Locator,
}

impl From<&LoginConfig> for OrchestratorSettings {
    fn from(config: &LoginConfig) -> Self {
        Self {
            settle_delay: config.timing.settle_delay(),
            stall_threshold: config.timing.stall_threshold.max(1),
            backoff: config.timing.backoff.clone(),
            cookie_banner: config.selectors.cookie_banner.clone(),
        }
    }
}

/// How a single pass over the handlers ended.
enum PassResult {
    Complete,
    Handled(StepId),
    Stalled,
}

pub struct Orchestrator<B: Browser> {
    handlers: Vec<Box<dyn StepHandler<B>>>,
    settings: OrchestratorSettings,
    state: OrchestratorState,
}

impl<B: Browser> Orchestrator<B> {
    /// `handlers` are evaluated in the given order on every pass.
    pub fn new(handlers: Vec<Box<dyn StepHandler<B>>>, settings: OrchestratorSettings) -> Self {
        Self {
            handlers,
            settings,
            state: OrchestratorState::Navigating,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    fn set_state(&mut self, state: OrchestratorState) {
        if self.state != state {
            tracing::debug!("Orchestrator: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Drive the session to completion within `timeout`.
    pub async fn run(&mut self, session: &mut LoginSession, browser: &B, timeout: Duration) -> LoginResult<()> {
        match tokio::time::timeout(timeout, self.drive(session, browser)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("Login timed out after {}s", timeout.as_secs());
                self.set_state(OrchestratorState::Terminal);
                session.status = Some(TerminalStatus::Failed);
                Err(LoginError::Timeout(timeout))
            }
        }
    }

    /// Navigate and poll until a handler reports completion. Unbounded;
    /// [`Orchestrator::run`] adds the deadline.
    pub async fn drive(&mut self, session: &mut LoginSession, browser: &B) -> LoginResult<()> {
        self.set_state(OrchestratorState::Navigating);
        tracing::info!("Navigating to SSO URL");
        if let Err(e) = browser.navigate(&session.sso_url).await {
            self.set_state(OrchestratorState::Terminal);
            session.status = Some(TerminalStatus::Failed);
            return Err(e.into());
        }
        session.navigated = true;
        dismiss_cookie_banner(browser, &self.settings.cookie_banner).await;

        loop {
            self.set_state(OrchestratorState::Polling);
            match self.pass(session, browser).await {
                PassResult::Complete => {
                    self.set_state(OrchestratorState::Terminal);
                    session.status = Some(TerminalStatus::BrowserConfirmed);
                    tracing::info!("Login completed after {} passes", session.passes);
                    return Ok(());
                }
                PassResult::Handled(step) => {
                    session.record_handled(step);
                    sleep(self.settings.settle_delay).await;
                }
                PassResult::Stalled => {
                    self.set_state(OrchestratorState::Stalled);
                    let stalls = session.record_stall();
                    tracing::debug!("No step applied (stall {}/{})", stalls, self.settings.stall_threshold);
                    sleep(self.settings.backoff.delay(stalls)).await;
                    if stalls >= self.settings.stall_threshold {
                        tracing::warn!("No progress after {} passes, refreshing page", stalls);
                        if let Err(e) = browser.refresh().await {
                            tracing::warn!("Page refresh failed: {}", e);
                        }
                        session.record_refresh();
                    }
                }
            }
        }
    }

    async fn pass(&mut self, session: &mut LoginSession, browser: &B) -> PassResult {
        session.passes += 1;
        let skip = session.step_to_skip();

        for index in 0..self.handlers.len() {
            let step = self.handlers[index].id();
            if skip == Some(step) {
                tracing::debug!("Skipping {} step, handled on the previous pass", step);
                continue;
            }

            match self.handlers[index].evaluate(session, browser).await {
                StepOutcome::NotApplicable => {}
                StepOutcome::Handled => {
                    self.set_state(OrchestratorState::Handling(step));
                    tracing::info!("Handled {} step", step);
                    return PassResult::Handled(step);
                }
                StepOutcome::Complete => return PassResult::Complete,
                StepOutcome::Error(reason) => tracing::warn!("{} step failed: {}", step, reason),
            }
        }
        PassResult::Stalled
    }
}
