//! Login-URL extraction from the authorization CLI.
//!
//! Runs `aws sso login --no-browser`, reads its stdout line by line and stops
//! at the first line that matches one of the configured URL patterns. Stderr
//! is drained concurrently into the debug log so the child never blocks on a
//! full pipe.

mod process;

pub use process::LoginProcess;

use crate::config::{BackoffPolicy, CliSettings, ProcessPolicy};
use crate::error::{LoginError, LoginResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::ChildStdout;
use tokio::time::timeout;

/// Grace period for a CLI whose output ended to exit on its own.
const REAP_GRACE: Duration = Duration::from_secs(2);

/// Login URL plus the verification code that goes with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginUrl {
    pub url: String,
    /// Code printed separately by the CLI, if any
    pub verification_code: Option<String>,
    /// The URL carries a `user_code` parameter, so the page is pre-filled
    pub code_prefilled: bool,
}

/// Ordered URL patterns; earlier patterns win on the same line.
#[derive(Debug, Clone)]
pub struct UrlPatternSet {
    patterns: Vec<Regex>,
}

impl UrlPatternSet {
    pub fn new(patterns: &[String]) -> LoginResult<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| LoginError::Config(format!("invalid URL pattern '{}': {}", p, e)))
            })
            .collect::<LoginResult<Vec<_>>>()?;
        if patterns.is_empty() {
            return Err(LoginError::Config("no URL patterns configured".to_string()));
        }
        Ok(Self { patterns })
    }

    /// First pattern match in `line`.
    pub fn find<'l>(&self, line: &'l str) -> Option<&'l str> {
        self.patterns
            .iter()
            .find_map(|pattern| pattern.find(line))
            .map(|m| m.as_str())
    }
}

/// A short token like `ABCD-EFGH`: uppercase letters/digits joined by hyphens.
pub fn looks_like_verification_code(token: &str) -> bool {
    (5..=16).contains(&token.len())
        && token.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
        && token.chars().any(|c| c.is_ascii_uppercase())
        && token.contains('-')
        && !token.starts_with('-')
        && !token.ends_with('-')
}

fn has_user_code(url: &str) -> bool {
    url::Url::parse(url)
        .map(|u| u.query_pairs().any(|(key, value)| key == "user_code" && !value.is_empty()))
        .unwrap_or(false)
}

/// Line-by-line scanner over CLI output.
#[derive(Debug)]
pub struct OutputScanner<'p> {
    patterns: &'p UrlPatternSet,
    code: Option<String>,
}

impl<'p> OutputScanner<'p> {
    pub fn new(patterns: &'p UrlPatternSet) -> Self {
        Self { patterns, code: None }
    }

    /// Feed one line; returns the login URL once a pattern matches.
    pub fn feed(&mut self, line: &str) -> Option<LoginUrl> {
        if let Some(code) = line
            .split_whitespace()
            .filter(|token| looks_like_verification_code(token))
            .last()
        {
            tracing::debug!("Found verification code candidate: {}", code);
            self.code = Some(code.to_string());
        }

        let url = self.patterns.find(line)?;
        Some(LoginUrl {
            url: url.to_string(),
            verification_code: self.code.clone(),
            code_prefilled: has_user_code(url),
        })
    }
}

/// Result of a successful extraction.
#[derive(Debug)]
pub struct Extraction {
    pub login_url: LoginUrl,
    /// Already terminated under [`ProcessPolicy::TerminateOnMatch`]
    pub process: LoginProcess,
}

/// Launches the CLI and pulls the login URL out of its output.
#[derive(Debug, Clone)]
pub struct UrlExtractor {
    patterns: UrlPatternSet,
    policy: ProcessPolicy,
    timeout: Duration,
    backoff: BackoffPolicy,
}

impl UrlExtractor {
    pub fn new(settings: &CliSettings, backoff: BackoffPolicy) -> LoginResult<Self> {
        Ok(Self {
            patterns: UrlPatternSet::new(&settings.url_patterns)?,
            policy: settings.process_policy,
            timeout: settings.url_timeout(),
            backoff,
        })
    }

    pub fn with_policy(mut self, policy: ProcessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `<program> sso login --profile <profile> --no-browser` and extract.
    pub async fn extract(&self, settings: &CliSettings, profile: &str) -> LoginResult<Extraction> {
        let args = settings.login_args(profile);
        tracing::info!(
            "Executing '{} {}' with profile '{}'",
            settings.program,
            args[..args.len().min(2)].join(" "),
            profile
        );
        let (process, stdout) = LoginProcess::spawn(&settings.program, &args)?;
        self.extract_from(process, stdout).await
    }

    /// Extract from an already spawned process.
    pub async fn extract_from(
        &self,
        mut process: LoginProcess,
        stdout: ChildStdout,
    ) -> LoginResult<Extraction> {
        let login_url = self.scan(&mut process, stdout).await?;
        Ok(Extraction { login_url, process })
    }

    /// Read `stdout` until a login URL shows up. The process stays with the
    /// caller so its state can be inspected after a failure.
    pub(crate) async fn scan(&self, process: &mut LoginProcess, stdout: ChildStdout) -> LoginResult<LoginUrl> {
        let mut lines = BufReader::new(stdout).lines();
        let mut scanner = OutputScanner::new(&self.patterns);

        match timeout(self.timeout, read_until_match(&mut lines, &mut scanner)).await {
            Ok(Ok(Some(login_url))) => {
                tracing::info!("Found SSO URL: {}", login_url.url);
                match self.policy {
                    ProcessPolicy::TerminateOnMatch => {
                        drop(lines);
                        process.terminate().await;
                        process.finish().await;
                    }
                    ProcessPolicy::AwaitExit => process.drain_stdout(lines),
                }
                Ok(login_url)
            }
            Ok(Ok(None)) => {
                drop(lines);
                let status = process.reap(REAP_GRACE, &self.backoff).await;
                process.finish().await;
                tracing::error!("Failed to find SSO URL in command output");
                Err(LoginError::UrlNotFound(match status {
                    Some(status) => format!("CLI output ended ({})", status),
                    None => "CLI output ended".to_string(),
                }))
            }
            Ok(Err(e)) => {
                drop(lines);
                process.terminate().await;
                process.finish().await;
                Err(LoginError::UrlNotFound(format!("failed to read CLI output: {}", e)))
            }
            Err(_) => {
                drop(lines);
                process.terminate().await;
                process.finish().await;
                Err(LoginError::UrlNotFound(format!(
                    "no login URL within {}s",
                    self.timeout.as_secs_f64()
                )))
            }
        }
    }
}

async fn read_until_match(
    lines: &mut Lines<BufReader<ChildStdout>>,
    scanner: &mut OutputScanner<'_>,
) -> std::io::Result<Option<LoginUrl>> {
    while let Some(line) = lines.next_line().await? {
        tracing::info!("Command output line: {}", line.trim());
        if let Some(found) = scanner.feed(&line) {
            return Ok(Some(found));
        }
    }
    Ok(None)
}
