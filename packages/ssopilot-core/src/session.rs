//! Per-run login input and mutable orchestration state.

use crate::extractor::LoginUrl;
use crate::steps::StepId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Immutable input of one login run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub profile: String,
    /// Re-prompt for the stored password before using it
    pub update_password: bool,
    /// Show the browser window instead of running headless
    pub interactive: bool,
    pub timeout: Duration,
}

impl LoginRequest {
    pub fn new(profile: impl Into<String>, timeout: Duration) -> Self {
        Self {
            profile: profile.into(),
            update_password: false,
            interactive: false,
            timeout,
        }
    }

    pub fn headless(&self) -> bool {
        !self.interactive
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    /// Success markers were seen in the browser
    BrowserConfirmed,
    /// The authorization CLI exited successfully on its own
    CliConfirmed,
    Failed,
}

/// Mutable state of one login run, owned by the orchestrator.
#[derive(Debug, Default)]
pub struct LoginSession {
    pub sso_url: String,
    pub verification_code: Option<String>,
    /// The URL already carries the user code
    pub code_prefilled: bool,
    pub email: Option<String>,
    pub password: Option<String>,
    pub credentials_submitted: bool,
    pub navigated: bool,
    pub stall_count: u32,
    pub last_succeeded: Option<StepId>,
    /// The previous pass ended with a handled step
    pub previous_pass_handled: bool,
    pub passes: u32,
    pub refreshes: u32,
    /// Steps handled so far, in order
    pub history: Vec<StepId>,
    pub status: Option<TerminalStatus>,
}

impl LoginSession {
    pub fn new(login_url: &LoginUrl) -> Self {
        Self {
            sso_url: login_url.url.clone(),
            verification_code: login_url.verification_code.clone(),
            code_prefilled: login_url.code_prefilled,
            ..Self::default()
        }
    }

    /// Step to skip on the upcoming pass: the one handled by the pass
    /// immediately before it, while the page is still catching up.
    pub fn step_to_skip(&self) -> Option<StepId> {
        if self.previous_pass_handled {
            self.last_succeeded
        } else {
            None
        }
    }

    pub fn record_handled(&mut self, step: StepId) {
        self.stall_count = 0;
        self.last_succeeded = Some(step);
        self.previous_pass_handled = true;
        self.history.push(step);
    }

    /// Count an empty pass; returns the new stall count.
    pub fn record_stall(&mut self) -> u32 {
        self.previous_pass_handled = false;
        self.stall_count += 1;
        self.stall_count
    }

    pub fn record_refresh(&mut self) {
        self.refreshes += 1;
        self.stall_count = 0;
        self.last_succeeded = None;
        self.previous_pass_handled = false;
    }

    pub fn has_credentials(&self) -> bool {
        self.email.is_some() && self.password.is_some()
    }
}
