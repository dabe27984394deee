//! ssopilot CLI - hands-free AWS SSO device login
//!
//! This binary drives `aws sso login` end to end:
//! - Extracts the device-login URL from the AWS CLI
//! - Walks a Chrome session through confirmation, sign-in, MFA and approval
//! - Keeps email and password in the platform keyring
//! - Checks the local Chrome/chromedriver/AWS CLI setup

mod signals;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ssopilot_core::auth::{default_store, CredentialManager, TerminalPrompter};
use ssopilot_core::browser::tooling;
use ssopilot_core::config::{generate_example_config, get_config_file_path_string};
use ssopilot_core::{
    load_login_config, LoginReport, LoginRequest, LoginRunner, ProcessPolicy, TerminalStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "ssopilot")]
#[command(author = "Stratiform LLC")]
#[command(version)]
#[command(about = "Hands-free AWS SSO device login")]
#[command(long_about = "
ssopilot runs 'aws sso login --no-browser', opens the device-login page in
Chrome over WebDriver and completes the confirmation, sign-in, MFA and
approval screens for you. Only the MFA code is asked for.

Quick start:
  1. Check your setup:   ssopilot doctor
  2. Log in:             ssopilot login --profile prod
  3. Rotate a password:  ssopilot login --profile prod --update-password
")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// `ssopilot --profile p` is the same as `ssopilot login --profile p`
    #[command(flatten)]
    pub login: LoginArgs,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Args, Clone)]
pub struct LoginArgs {
    /// AWS profile to use
    #[arg(long, default_value = "prod")]
    pub profile: String,

    /// Prompt for a new password and store it
    #[arg(long)]
    pub update_password: bool,

    /// Show the browser window and log at debug level
    #[arg(long)]
    pub debug: bool,

    /// Overall login timeout in seconds (defaults to the configured value)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Keep the AWS CLI running and let it confirm the login
    #[arg(long)]
    pub keep_cli: bool,

    /// Open the URL in the system browser and complete the login by hand
    #[arg(long)]
    pub manual: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in to AWS SSO (default)
    Login(LoginArgs),

    /// Show configuration paths and settings
    Config,

    /// Check Chrome, chromedriver and AWS CLI
    Doctor,

    /// Delete the stored email and password of a profile
    Forget {
        /// AWS profile whose credentials are deleted
        #[arg(long, default_value = "prod")]
        profile: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let debug = match &cli.command {
        Some(Commands::Login(args)) => args.debug,
        None => cli.login.debug,
        _ => false,
    };

    // Initialize logging
    let log_level = if cli.verbose || debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("ssopilot={},ssopilot_core={}", log_level, log_level).into()),
        )
        .with_target(false)
        .init();

    let result = match &cli.command {
        Some(Commands::Login(args)) => cmd_login(&cli, args).await,
        None => cmd_login(&cli, &cli.login).await,
        Some(Commands::Config) => cmd_config(&cli),
        Some(Commands::Doctor) => cmd_doctor(&cli).await,
        Some(Commands::Forget { profile }) => cmd_forget(&cli, profile),
    };

    if let Err(e) = result {
        tracing::error!("{:#}", e);
        if let OutputFormat::Json = cli.format {
            println!("{}", serde_json::json!({
                "status": "failed",
                "error": format!("{:#}", e),
            }));
        }
        std::process::exit(1);
    }
}

async fn cmd_login(cli: &Cli, args: &LoginArgs) -> Result<()> {
    let mut config = load_login_config();
    if args.keep_cli {
        config.cli.process_policy = ProcessPolicy::AwaitExit;
    }
    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.timing.login_timeout());

    let mut request = LoginRequest::new(args.profile.clone(), timeout);
    request.update_password = args.update_password;
    request.interactive = args.debug;

    let prompter = Arc::new(TerminalPrompter);
    let store = default_store().context("Failed to open credential store")?;
    let credentials = Arc::new(CredentialManager::new(store, prompter.clone()));

    let cancel = CancellationToken::new();
    signals::cancel_on_signal(cancel.clone());
    let runner = LoginRunner::new(config, credentials, prompter).with_cancellation(cancel.clone());

    tracing::info!("Starting AWS SSO login for profile '{}'", request.profile);
    let result = if args.manual {
        runner.login_manual(&request).await
    } else {
        runner.login(&request).await
    };
    cancel.cancel();

    let report = result.with_context(|| format!("AWS SSO login failed for profile '{}'", request.profile))?;
    print_report(cli, &report);
    Ok(())
}

fn print_report(cli: &Cli, report: &LoginReport) {
    match cli.format {
        OutputFormat::Text => {
            println!("Successfully logged in to AWS SSO (profile '{}')", report.profile);
            println!(
                "Confirmed by {} after {} passes, {} refreshes, {}s",
                match report.status {
                    TerminalStatus::CliConfirmed => "AWS CLI",
                    _ => "browser",
                },
                report.passes,
                report.refreshes,
                report.elapsed().num_seconds()
            );
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "status": "logged_in",
                "report": report,
            }));
        }
    }
}

fn cmd_config(cli: &Cli) -> Result<()> {
    let config = load_login_config();
    let config_path = get_config_file_path_string();
    let storage = default_store()
        .map(|store| store.describe())
        .unwrap_or_else(|e| format!("unavailable ({})", e));

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:      {} (using {})", config_path, config.source);
            println!("AWS CLI:          {}", config.cli.program);
            println!("WebDriver URL:    {}", config.browser.webdriver_url);
            println!(
                "Chromedriver:     {}",
                config
                    .browser
                    .chromedriver_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "- (connect to a running driver)".to_string())
            );
            println!("Browser profile:  {}", config.browser.resolved_profile_dir().display());
            println!("Login timeout:    {}s", config.timing.login_timeout_secs);
            println!("Credential store: {}", storage);
            println!();
            println!("Environment variables:");
            println!("  SSOPILOT_AWS_CLI        - Override the AWS CLI program");
            println!("  SSOPILOT_WEBDRIVER_URL  - Override the WebDriver endpoint");
            println!("  SSOPILOT_CHROMEDRIVER   - Launch this chromedriver binary");
            if !config.env_overrides.is_empty() {
                println!("  (set: {})", config.env_overrides.join(", "));
            }
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", generate_example_config());
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "config_file": config_path,
                "source": format!("{}", config.source),
                "env_overrides": config.env_overrides,
                "credential_storage": storage,
                "config": {
                    "cli": config.cli,
                    "browser": config.browser,
                    "timing": config.timing,
                    "selectors": config.selectors,
                },
            }));
        }
    }

    Ok(())
}

async fn cmd_doctor(cli: &Cli) -> Result<()> {
    let config = load_login_config();
    let program = config.cli.program.clone();
    let chromedriver = config
        .browser
        .chromedriver_path
        .as_ref()
        .map(|p| p.display().to_string());

    let report = tokio::task::spawn_blocking(move || tooling::check_tooling(&program, chromedriver.as_deref()))
        .await
        .context("Tooling check failed")?;
    let warnings = report.warnings();

    match cli.format {
        OutputFormat::Text => {
            let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "not found".to_string());
            println!("Chrome:       {}", show(&report.chrome_version));
            println!("ChromeDriver: {}", show(&report.chromedriver_version));
            println!("AWS CLI:      {}", show(&report.aws_cli_version));
            println!();
            if warnings.is_empty() {
                println!("All checks passed.");
            } else {
                for warning in &warnings {
                    println!("Warning: {}", warning);
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "tooling": report,
                "warnings": warnings,
            }));
        }
    }

    Ok(())
}

fn cmd_forget(cli: &Cli, profile: &str) -> Result<()> {
    let store = default_store().context("Failed to open credential store")?;
    let manager = CredentialManager::new(store, Arc::new(TerminalPrompter));
    manager
        .forget(profile)
        .with_context(|| format!("Failed to delete credentials for profile '{}'", profile))?;

    match cli.format {
        OutputFormat::Text => println!("Deleted stored credentials for profile '{}'", profile),
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "status": "forgotten",
                "profile": profile,
            }));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_flags_mean_login() {
        let cli = Cli::try_parse_from(["ssopilot", "--profile", "dev", "--update-password"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.login.profile, "dev");
        assert!(cli.login.update_password);
    }

    #[test]
    fn test_login_subcommand_defaults() {
        let cli = Cli::try_parse_from(["ssopilot", "login"]).unwrap();
        match cli.command {
            Some(Commands::Login(args)) => {
                assert_eq!(args.profile, "prod");
                assert!(!args.debug);
                assert!(!args.keep_cli);
                assert_eq!(args.timeout, None);
            }
            _ => panic!("expected login subcommand"),
        }
    }

    #[test]
    fn test_forget_takes_profile() {
        let cli = Cli::try_parse_from(["ssopilot", "forget", "--profile", "dev", "--format", "json"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Forget { ref profile }) if profile == "dev"));
        assert!(matches!(cli.format, OutputFormat::Json));
    }
}
