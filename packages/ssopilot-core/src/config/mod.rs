//! Runtime configuration.
//!
//! Loaded with priority:
//! 1. Environment variables (`SSOPILOT_AWS_CLI`, `SSOPILOT_WEBDRIVER_URL`, `SSOPILOT_CHROMEDRIVER`)
//! 2. Config file (`~/.config/ssopilot/config.toml`)
//! 3. Built-in defaults
//!
//! Element identifiers live here too so that a change on the provider's login
//! pages only needs a config edit.

mod backoff;

pub use backoff::BackoffPolicy;

use crate::browser::Locator;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the authorization CLI program
const ENV_AWS_CLI: &str = "SSOPILOT_AWS_CLI";
/// Environment variable overriding the WebDriver endpoint
const ENV_WEBDRIVER_URL: &str = "SSOPILOT_WEBDRIVER_URL";
/// Environment variable pointing at a chromedriver binary to launch
const ENV_CHROMEDRIVER: &str = "SSOPILOT_CHROMEDRIVER";

const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

/// What to do with the authorization CLI once the login URL is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessPolicy {
    /// Terminate the CLI as soon as the URL has been read.
    #[default]
    TerminateOnMatch,
    /// Keep the CLI running and await its exit after the browser flow.
    AwaitExit,
}

impl std::fmt::Display for ProcessPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessPolicy::TerminateOnMatch => write!(f, "terminate on match"),
            ProcessPolicy::AwaitExit => write!(f, "await exit"),
        }
    }
}

/// Settings for the authorization CLI subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliSettings {
    /// Program to run (e.g. "aws" or an absolute path)
    pub program: String,
    /// Extra arguments appended after `--no-browser`
    pub extra_args: Vec<String>,
    pub process_policy: ProcessPolicy,
    /// How long to wait for the login URL to appear
    pub url_timeout_secs: u64,
    /// Ordered URL patterns; the first match on a line wins
    pub url_patterns: Vec<String>,
}

impl Default for CliSettings {
    fn default() -> Self {
        Self {
            program: "aws".to_string(),
            extra_args: Vec::new(),
            process_policy: ProcessPolicy::default(),
            url_timeout_secs: 60,
            url_patterns: vec![
                r"https://device\.sso\.[a-z0-9-]+\.amazonaws\.com/\?user_code=\w+-\w+".to_string(),
                r"https://[^\s]*awsapps\.com/start/#/device[^\s]*".to_string(),
            ],
        }
    }
}

impl CliSettings {
    /// Full argument list for `<program> sso login`.
    pub fn login_args(&self, profile: &str) -> Vec<String> {
        let mut args: Vec<String> = ["sso", "login", "--profile", profile, "--no-browser"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(self.extra_args.iter().cloned());
        args
    }

    pub fn url_timeout(&self) -> Duration {
        Duration::from_secs(self.url_timeout_secs)
    }
}

/// Settings for the WebDriver browser session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub webdriver_url: String,
    /// When set, this chromedriver binary is launched for the session
    pub chromedriver_path: Option<PathBuf>,
    /// Persistent Chrome profile directory (keeps cookies between runs)
    pub profile_dir: Option<PathBuf>,
    pub no_sandbox: bool,
    pub extra_args: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
            chromedriver_path: None,
            profile_dir: None,
            no_sandbox: true,
            extra_args: Vec::new(),
        }
    }
}

impl BrowserSettings {
    /// Profile directory, falling back to the local data dir.
    pub fn resolved_profile_dir(&self) -> PathBuf {
        self.profile_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
                .unwrap_or_else(std::env::temp_dir)
                .join("ssopilot")
                .join("browser-profile")
        })
    }
}

/// Timeouts and polling cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Per-handler detection timeout
    pub check_timeout_ms: u64,
    /// Timeout for an action once a screen has been detected
    pub action_timeout_secs: u64,
    /// Element lookup poll interval inside waits
    pub poll_interval_ms: u64,
    /// Pause after a handled step to let the page settle
    pub settle_delay_ms: u64,
    /// Consecutive empty passes before the page is refreshed
    pub stall_threshold: u32,
    pub backoff: BackoffPolicy,
    /// Overall login deadline
    pub login_timeout_secs: u64,
    /// How long to wait for a kept-alive CLI to exit after success
    pub cli_exit_timeout_secs: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            check_timeout_ms: 3_000,
            action_timeout_secs: 30,
            poll_interval_ms: 200,
            settle_delay_ms: 100,
            stall_threshold: 3,
            backoff: BackoffPolicy::default(),
            login_timeout_secs: 300,
            cli_exit_timeout_secs: 30,
        }
    }
}

impl Timing {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn cli_exit_timeout(&self) -> Duration {
        Duration::from_secs(self.cli_exit_timeout_secs)
    }
}

/// Element identifiers and success markers of the provider's login pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub cookie_banner: Locator,
    pub confirm_button: Locator,
    /// Optional code-entry input shown when the URL carries no user code
    pub code_input: Option<Locator>,
    pub mfa_description: Locator,
    pub mfa_remember: Locator,
    pub mfa_code_input: Locator,
    pub mfa_verify: Locator,
    pub email_input: Locator,
    pub password_input: Locator,
    pub submit_button: Locator,
    pub stay_signed_in_checkbox: Locator,
    pub stay_signed_in_yes: Locator,
    pub allow_buttons: Vec<Locator>,
    pub success_title: String,
    pub success_phrases: Vec<String>,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            cookie_banner: Locator::css("button[data-id='awsccc-cb-btn-continue']"),
            confirm_button: Locator::id("cli_verification_btn"),
            code_input: None,
            mfa_description: Locator::id("idDiv_SAOTCC_Description"),
            mfa_remember: Locator::id("idChkBx_SAOTCC_TD"),
            mfa_code_input: Locator::id("idTxtBx_SAOTCC_OTC"),
            mfa_verify: Locator::id("idSubmit_SAOTCC_Continue"),
            email_input: Locator::id("i0116"),
            password_input: Locator::id("i0118"),
            submit_button: Locator::id("idSIButton9"),
            stay_signed_in_checkbox: Locator::id("KmsiCheckboxField"),
            stay_signed_in_yes: Locator::id("idSIButton9"),
            allow_buttons: vec![
                Locator::css("[data-testid='allow-access-button']"),
                Locator::id("cli_login_button"),
            ],
            success_title: "AWS access portal".to_string(),
            success_phrases: vec![
                "you can close this window".to_string(),
                "you have successfully logged into aws".to_string(),
                "request approved".to_string(),
                "success".to_string(),
            ],
        }
    }
}

/// Where the configuration came from
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConfigSource {
    /// Using built-in defaults
    #[default]
    Default,
    /// Loaded from the config file
    ConfigFile(PathBuf),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "defaults"),
            ConfigSource::ConfigFile(path) => write!(f, "config file {}", path.display()),
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    pub cli: CliSettings,
    pub browser: BrowserSettings,
    pub timing: Timing,
    pub selectors: Selectors,
    #[serde(skip)]
    pub source: ConfigSource,
    /// Environment variables that overrode file/default values
    #[serde(skip)]
    pub env_overrides: Vec<&'static str>,
}

impl LoginConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: LoginConfig = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.timing.stall_threshold == 0 {
            anyhow::bail!("timing.stall_threshold must be at least 1");
        }
        if self.cli.url_patterns.is_empty() {
            anyhow::bail!("cli.url_patterns must not be empty");
        }
        if self.cli.program.trim().is_empty() {
            anyhow::bail!("cli.program must not be empty");
        }
        Ok(())
    }

    /// Apply environment overrides on top of the current values.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(program) = non_empty(ENV_AWS_CLI) {
            tracing::info!("Using authorization CLI from environment variable: {}", program);
            self.cli.program = program;
            self.env_overrides.push(ENV_AWS_CLI);
        }
        if let Some(url) = non_empty(ENV_WEBDRIVER_URL) {
            tracing::info!("Using WebDriver URL from environment variable: {}", url);
            self.browser.webdriver_url = url.trim_end_matches('/').to_string();
            self.env_overrides.push(ENV_WEBDRIVER_URL);
        }
        if let Some(path) = non_empty(ENV_CHROMEDRIVER) {
            tracing::info!("Using chromedriver from environment variable: {}", path);
            self.browser.chromedriver_path = Some(PathBuf::from(path));
            self.env_overrides.push(ENV_CHROMEDRIVER);
        }
    }
}

/// Get the path to the configuration file
fn get_config_file_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("ssopilot").join("config.toml"))
}

/// Load the config file at `path`, if present and valid.
fn load_config_file(path: &Path) -> Option<LoginConfig> {
    if !path.exists() {
        return None;
    }

    match fs::read_to_string(path) {
        Ok(content) => match LoginConfig::from_toml_str(&content) {
            Ok(mut config) => {
                tracing::debug!("Loaded config from {:?}", path);
                config.source = ConfigSource::ConfigFile(path.to_path_buf());
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Ignoring config file {:?}: {:#}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

/// Load configuration from the default file location plus environment.
pub fn load_login_config() -> LoginConfig {
    let path = get_config_file_path();
    load_login_config_from(path.as_deref())
}

/// Load configuration from an explicit file (or none) plus environment.
pub fn load_login_config_from(path: Option<&Path>) -> LoginConfig {
    let mut config = path.and_then(load_config_file).unwrap_or_else(|| {
        tracing::debug!("Using default configuration");
        LoginConfig::default()
    });
    config.apply_env(|name| std::env::var(name).ok());
    config
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/ssopilot/config.toml".to_string())
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# ssopilot configuration
# Place this file at: ~/.config/ssopilot/config.toml

[cli]
# program = "aws"
# process_policy = "terminate_on_match"   # or "await_exit"
# url_timeout_secs = 60

[browser]
# webdriver_url = "http://localhost:9515"
# chromedriver_path = "/opt/homebrew/bin/chromedriver"
# profile_dir = "/home/me/.local/share/ssopilot/browser-profile"

[timing]
# check_timeout_ms = 3000
# action_timeout_secs = 30
# stall_threshold = 3
# login_timeout_secs = 300

# [timing.backoff]
# initial_ms = 250
# multiplier = 2.0
# cap_ms = 2000

[selectors]
# email_input = { id = "i0116" }
# allow_buttons = [{ css = "[data-testid='allow-access-button']" }, { id = "cli_login_button" }]
# success_title = "AWS access portal"
"#
    .to_string()
}
