//! Top-level login driver.
//!
//! Runs the URL extraction, owns the browser session and the CLI process for
//! the rest of the run, and makes sure both are cleaned up on every exit
//! path: success, failure, timeout and cancellation.

use crate::auth::{CredentialSource, Prompter};
use crate::browser::webdriver::LaunchOptions;
use crate::browser::{Browser, BrowserSession, WebDriverBrowser};
use crate::config::{LoginConfig, ProcessPolicy};
use crate::error::{LoginError, LoginResult};
use crate::extractor::{Extraction, LoginProcess, LoginUrl, UrlExtractor};
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::session::{LoginRequest, LoginSession, TerminalStatus};
use crate::steps::{default_handlers, StepHandler, StepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::process::ExitStatus;
use std::sync::Arc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginReport {
    pub profile: String,
    pub status: TerminalStatus,
    pub passes: u32,
    pub refreshes: u32,
    /// Steps handled, in order
    pub steps: Vec<StepId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl LoginReport {
    fn new(profile: &str, session: &LoginSession, status: TerminalStatus, started_at: DateTime<Utc>) -> Self {
        Self {
            profile: profile.to_string(),
            status,
            passes: session.passes,
            refreshes: session.refreshes,
            steps: session.history.clone(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

pub struct LoginRunner {
    config: LoginConfig,
    credentials: Arc<dyn CredentialSource>,
    prompter: Arc<dyn Prompter>,
    cancel: CancellationToken,
}

impl LoginRunner {
    pub fn new(config: LoginConfig, credentials: Arc<dyn CredentialSource>, prompter: Arc<dyn Prompter>) -> Self {
        Self {
            config,
            credentials,
            prompter,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort the run when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &LoginConfig {
        &self.config
    }

    /// Full automated login: extract the URL, launch Chrome over WebDriver
    /// and walk the login screens.
    pub async fn login(&self, request: &LoginRequest) -> LoginResult<LoginReport> {
        let started_at = Utc::now();
        let Extraction { login_url, mut process } =
            self.extract(request, self.config.cli.process_policy).await?;

        let options = LaunchOptions {
            settings: self.config.browser.clone(),
            headless: request.headless(),
            poll_interval: self.config.timing.poll_interval(),
            backoff: self.config.timing.backoff.clone(),
        };
        let launched = tokio::select! {
            launched = WebDriverBrowser::launch(&options) => launched.map_err(LoginError::from),
            _ = self.cancel.cancelled() => Err(LoginError::Cancelled),
        };
        let browser = match launched {
            Ok(browser) => BrowserSession::new(browser),
            Err(e) => {
                tracing::error!("Failed to start browser: {}", e);
                self.cleanup_process(&mut process, false).await;
                return Err(e);
            }
        };

        let handlers = default_handlers(&self.config, request, self.credentials.clone(), self.prompter.clone());
        self.drive(request, &login_url, browser, handlers, Some(&mut process), started_at)
            .await
    }

    /// Manual login: open the URL in the system browser and let the CLI's
    /// exit code decide the outcome.
    pub async fn login_manual(&self, request: &LoginRequest) -> LoginResult<LoginReport> {
        let started_at = Utc::now();
        let Extraction { login_url, mut process } = self.extract(request, ProcessPolicy::AwaitExit).await?;

        open_in_system_browser(&login_url.url);
        if let Some(code) = &login_url.verification_code {
            tracing::info!("Verification code: {}", code);
        }

        let exit = tokio::select! {
            exit = timeout(request.timeout, process.wait_exit()) => Some(exit),
            _ = self.cancel.cancelled() => None,
        };
        let outcome = match exit {
            Some(Ok(Ok(status))) => cli_outcome(status),
            Some(Ok(Err(source))) => Err(LoginError::Spawn {
                program: self.config.cli.program.clone(),
                source,
            }),
            Some(Err(_)) => Err(LoginError::Timeout(request.timeout)),
            None => Err(LoginError::Cancelled),
        };

        self.cleanup_process(&mut process, false).await;
        outcome?;

        let session = LoginSession::new(&login_url);
        Ok(LoginReport::new(&request.profile, &session, TerminalStatus::CliConfirmed, started_at))
    }

    async fn extract(&self, request: &LoginRequest, policy: ProcessPolicy) -> LoginResult<Extraction> {
        let extractor = UrlExtractor::new(&self.config.cli, self.config.timing.backoff.clone())?.with_policy(policy);
        tokio::select! {
            extraction = extractor.extract(&self.config.cli, &request.profile) => extraction,
            _ = self.cancel.cancelled() => Err(LoginError::Cancelled),
        }
    }

    /// Drive an already acquired browser through the login screens.
    ///
    /// Races the orchestrator against the CLI's own exit (when `process` is
    /// still running) and cancellation. The browser session is released and
    /// the process cleaned up before this returns.
    pub async fn drive<B: Browser + 'static>(
        &self,
        request: &LoginRequest,
        login_url: &LoginUrl,
        browser: BrowserSession<B>,
        handlers: Vec<Box<dyn StepHandler<B>>>,
        mut process: Option<&mut LoginProcess>,
        started_at: DateTime<Utc>,
    ) -> LoginResult<LoginReport> {
        let mut session = LoginSession::new(login_url);
        let mut orchestrator = Orchestrator::new(handlers, OrchestratorSettings::from(&self.config));
        let mut watch_cli = process.as_deref().is_some_and(|p| !p.is_terminated());

        let outcome = {
            let orchestration = orchestrator.run(&mut session, browser.browser(), request.timeout);
            tokio::pin!(orchestration);
            loop {
                tokio::select! {
                    result = &mut orchestration => break result.map(|()| TerminalStatus::BrowserConfirmed),
                    exit = wait_cli(process.as_deref_mut()), if watch_cli => {
                        watch_cli = false;
                        match exit {
                            Ok(status) if status.success() => {
                                tracing::info!("AWS CLI confirmed the login");
                                break Ok(TerminalStatus::CliConfirmed);
                            }
                            Ok(status) => tracing::warn!("AWS CLI exited early ({}), continuing in the browser", status),
                            Err(e) => tracing::warn!("Failed to wait for AWS CLI: {}", e),
                        }
                    }
                    _ = self.cancel.cancelled() => {
                        tracing::warn!("Login cancelled");
                        break Err(LoginError::Cancelled);
                    }
                }
            }
        };

        browser.release().await;
        if let Some(process) = process {
            self.cleanup_process(process, outcome.is_ok()).await;
        }

        match outcome {
            Ok(status) => {
                session.status = Some(status);
                Ok(LoginReport::new(&request.profile, &session, status, started_at))
            }
            Err(e) => {
                session.status = Some(TerminalStatus::Failed);
                Err(e)
            }
        }
    }

    /// After success give a live CLI time to exit on its own; otherwise (or
    /// when it lingers) terminate it.
    async fn cleanup_process(&self, process: &mut LoginProcess, succeeded: bool) {
        if succeeded && process.is_running() {
            let grace = self.config.timing.cli_exit_timeout();
            tracing::info!("Waiting for AWS CLI to finish...");
            match timeout(grace, process.wait_exit()).await {
                Ok(Ok(status)) if status.success() => tracing::info!("AWS CLI exited successfully"),
                Ok(Ok(status)) => tracing::warn!("AWS CLI exited with {}", status),
                Ok(Err(e)) => tracing::warn!("Failed to wait for AWS CLI: {}", e),
                Err(_) => {
                    tracing::warn!("AWS CLI still running after {}s", grace.as_secs());
                    process.terminate().await;
                }
            }
        } else {
            process.terminate().await;
        }
        process.finish().await;
    }
}

async fn wait_cli(process: Option<&mut LoginProcess>) -> std::io::Result<ExitStatus> {
    match process {
        Some(process) => process.wait_exit().await,
        None => std::future::pending().await,
    }
}

fn cli_outcome(status: ExitStatus) -> LoginResult<()> {
    if status.success() {
        tracing::info!("AWS CLI confirmed the login");
        Ok(())
    } else {
        Err(LoginError::CliExit(status.to_string()))
    }
}

#[cfg(feature = "open-browser")]
fn open_in_system_browser(url: &str) {
    match webbrowser::open(url) {
        Ok(()) => tracing::info!("Opened login page in the system browser"),
        Err(e) => tracing::warn!(
            "Failed to open browser automatically: {}. Open this URL to continue: {}",
            e,
            url
        ),
    }
}

#[cfg(not(feature = "open-browser"))]
fn open_in_system_browser(url: &str) {
    tracing::info!("Open this URL to continue: {}", url);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Selectors;
    use crate::testing::{FakeBrowser, ScriptedPrompter, StaticCredentials};
    use std::time::Duration;

    const URL: &str = "https://device.sso.us-east-1.amazonaws.com/?user_code=ABCD-1234";

    fn fast_config() -> LoginConfig {
        let mut config = LoginConfig::default();
        config.timing.check_timeout_ms = 20;
        config.timing.action_timeout_secs = 1;
        config.timing.cli_exit_timeout_secs = 1;
        config
    }

    fn login_url() -> LoginUrl {
        LoginUrl {
            url: URL.to_string(),
            verification_code: None,
            code_prefilled: true,
        }
    }

    fn runner(config: LoginConfig, prompter: ScriptedPrompter) -> LoginRunner {
        LoginRunner::new(
            config,
            Arc::new(StaticCredentials::new("me@example.com", "hunter2")),
            Arc::new(prompter),
        )
    }

    fn handlers(runner: &LoginRunner, request: &LoginRequest) -> Vec<Box<dyn StepHandler<FakeBrowser>>> {
        default_handlers(
            runner.config(),
            request,
            runner.credentials.clone(),
            runner.prompter.clone(),
        )
    }

    #[tokio::test]
    async fn test_browser_markers_confirm_login() {
        let runner = runner(fast_config(), ScriptedPrompter::new());
        let request = LoginRequest::new("prod", Duration::from_secs(10));
        let browser = FakeBrowser::new();
        browser.set_title("AWS access portal");
        browser.set_body_text("Request approved");

        let report = runner
            .drive(
                &request,
                &login_url(),
                BrowserSession::new(browser.clone()),
                handlers(&runner, &request),
                None,
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(report.status, TerminalStatus::BrowserConfirmed);
        assert_eq!(report.profile, "prod");
        assert_eq!(report.passes, 1);
        assert!(report.steps.is_empty());
        assert_eq!(browser.quits(), 1);
    }

    #[tokio::test]
    async fn test_full_flow_with_fake_pages() {
        let sel = Selectors::default();
        let browser = FakeBrowser::new();
        browser.show(&sel.confirm_button);
        browser.on_enter(
            &sel.confirm_button,
            vec![
                crate::testing::Reaction::Remove(sel.confirm_button.clone()),
                crate::testing::Reaction::Show(sel.allow_buttons[0].clone()),
            ],
        );
        browser.on_click(
            &sel.allow_buttons[0],
            vec![
                crate::testing::Reaction::Remove(sel.allow_buttons[0].clone()),
                crate::testing::Reaction::SetTitle("AWS access portal".to_string()),
                crate::testing::Reaction::SetBody("Request approved".to_string()),
            ],
        );

        let runner = runner(fast_config(), ScriptedPrompter::new());
        let request = LoginRequest::new("prod", Duration::from_secs(10));
        let report = runner
            .drive(
                &request,
                &login_url(),
                BrowserSession::new(browser.clone()),
                handlers(&runner, &request),
                None,
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(report.steps, vec![StepId::ConfirmationCode, StepId::AllowAccess]);
        assert_eq!(report.refreshes, 0);
        assert_eq!(browser.quits(), 1);
    }

    #[tokio::test]
    async fn test_sign_in_without_mfa_goes_straight_to_allow() {
        let sel = Selectors::default();
        let browser = FakeBrowser::new();
        browser.show(&sel.email_input);
        browser.show(&sel.submit_button);
        browser.on_click(
            &sel.submit_button,
            vec![
                crate::testing::Reaction::Show(sel.password_input.clone()),
                crate::testing::Reaction::Remove(sel.email_input.clone()),
                crate::testing::Reaction::Show(sel.allow_buttons[0].clone()),
            ],
        );
        browser.on_click(
            &sel.allow_buttons[0],
            vec![
                crate::testing::Reaction::Remove(sel.allow_buttons[0].clone()),
                crate::testing::Reaction::SetTitle("AWS access portal".to_string()),
                crate::testing::Reaction::SetBody("Request approved".to_string()),
            ],
        );

        let credentials = Arc::new(StaticCredentials::new("me@example.com", "hunter2"));
        let prompter = Arc::new(ScriptedPrompter::new());
        let runner = LoginRunner::new(fast_config(), credentials.clone(), prompter.clone());
        let request = LoginRequest::new("prod", Duration::from_secs(10));
        let report = runner
            .drive(
                &request,
                &login_url(),
                BrowserSession::new(browser.clone()),
                handlers(&runner, &request),
                None,
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(report.status, TerminalStatus::BrowserConfirmed);
        assert_eq!(report.steps, vec![StepId::EmailPassword, StepId::AllowAccess]);
        assert_eq!(prompter.mfa_prompts(), 0);
        assert_eq!(credentials.requests(), vec![false]);
        assert_eq!(
            browser.typed(),
            vec![
                (sel.email_input.clone(), "me@example.com".to_string()),
                (sel.password_input.clone(), "hunter2".to_string()),
            ]
        );
        assert_eq!(browser.quits(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_during_mfa_releases_browser_and_process() {
        let sel = Selectors::default();
        let browser = FakeBrowser::new();
        browser.show(&sel.mfa_description);
        browser.show(&sel.mfa_code_input);

        let runner = runner(fast_config(), ScriptedPrompter::new().hanging_on_mfa());
        let request = LoginRequest::new("prod", Duration::from_millis(300));
        let (mut process, _stdout) =
            LoginProcess::spawn("sh", &["-c".to_string(), "exec sleep 30".to_string()]).unwrap();

        let err = runner
            .drive(
                &request,
                &login_url(),
                BrowserSession::new(browser.clone()),
                handlers(&runner, &request),
                Some(&mut process),
                Utc::now(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LoginError::Timeout(_)));
        assert_eq!(browser.quits(), 1);
        assert!(process.is_terminated());
        assert!(!process.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_exit_confirms_login() {
        let runner = runner(fast_config(), ScriptedPrompter::new());
        let request = LoginRequest::new("prod", Duration::from_secs(10));
        let browser = FakeBrowser::new();
        let (mut process, _stdout) =
            LoginProcess::spawn("sh", &["-c".to_string(), "sleep 0.2; exit 0".to_string()]).unwrap();

        let report = runner
            .drive(
                &request,
                &login_url(),
                BrowserSession::new(browser.clone()),
                handlers(&runner, &request),
                Some(&mut process),
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(report.status, TerminalStatus::CliConfirmed);
        assert_eq!(browser.quits(), 1);
        assert!(!process.is_terminated());
    }

    #[tokio::test]
    async fn test_cancellation_releases_browser() {
        let cancel = CancellationToken::new();
        let runner = runner(fast_config(), ScriptedPrompter::new()).with_cancellation(cancel.clone());
        let request = LoginRequest::new("prod", Duration::from_secs(10));
        let browser = FakeBrowser::new();
        cancel.cancel();

        let err = runner
            .drive(
                &request,
                &login_url(),
                BrowserSession::new(browser.clone()),
                handlers(&runner, &request),
                None,
                Utc::now(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LoginError::Cancelled));
        assert_eq!(browser.quits(), 1);
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let session = crate::testing::session_for(URL);
        let report = LoginReport::new("prod", &session, TerminalStatus::CliConfirmed, Utc::now());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "cli_confirmed");
        assert!(json.get("startedAt").is_some());
        assert!(report.elapsed() >= chrono::Duration::zero());
    }
}
