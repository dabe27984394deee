//! Local tooling checks: Chrome vs chromedriver versions, AWS CLI presence.

use serde::Serialize;
use std::process::Command;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Create a Command that hides the console window on Windows.
pub fn hidden_command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

#[cfg(target_os = "macos")]
const CHROME_CANDIDATES: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "google-chrome",
];

#[cfg(not(target_os = "macos"))]
const CHROME_CANDIDATES: &[&str] = &["google-chrome", "google-chrome-stable", "chromium"];

/// Versions of the local tools the login depends on.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolingReport {
    pub chrome_version: Option<String>,
    pub chromedriver_version: Option<String>,
    pub aws_cli_version: Option<String>,
    /// `None` when either browser version is unknown
    pub browser_compatible: Option<bool>,
}

impl ToolingReport {
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        match self.browser_compatible {
            Some(false) => warnings.push(format!(
                "Chrome version ({}) and ChromeDriver version ({}) may be incompatible. Please update ChromeDriver to match your Chrome version.",
                self.chrome_version.as_deref().unwrap_or("?"),
                self.chromedriver_version.as_deref().unwrap_or("?"),
            )),
            Some(true) => {}
            None => warnings.push(
                "Unable to check Chrome and ChromeDriver compatibility.".to_string(),
            ),
        }
        if self.aws_cli_version.is_none() {
            warnings.push("AWS CLI not found on PATH.".to_string());
        }
        warnings
    }
}

/// Run `<program> --version` and return trimmed stdout.
fn version_output(program: &str) -> Option<String> {
    match hidden_command(program).arg("--version").output() {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            // aws prints its version on stderr on some installs
            if stdout.is_empty() {
                Some(String::from_utf8_lossy(&output.stderr).trim().to_string())
                    .filter(|s| !s.is_empty())
            } else {
                Some(stdout)
            }
        }
        Ok(output) => {
            tracing::debug!("'{} --version' exited with {}", program, output.status);
            None
        }
        Err(e) => {
            tracing::debug!("Failed to run '{} --version': {}", program, e);
            None
        }
    }
}

/// "Google Chrome 120.0.6099.109" -> "120.0.6099.109"
pub fn parse_chrome_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .last()
        .filter(|v| v.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .map(String::from)
}

/// "ChromeDriver 120.0.6099.109 (3419140ab665...)" -> "120.0.6099.109"
pub fn parse_chromedriver_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .nth(1)
        .filter(|v| v.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .map(String::from)
}

/// "aws-cli/2.15.0 Python/3.11.6 ..." -> "2.15.0"
pub fn parse_aws_cli_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .next()
        .and_then(|first| first.strip_prefix("aws-cli/"))
        .map(String::from)
}

fn major(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

/// Compare major versions; `None` if either side is unknown.
pub fn versions_compatible(chrome: Option<&str>, chromedriver: Option<&str>) -> Option<bool> {
    match (chrome, chromedriver) {
        (Some(c), Some(d)) => Some(major(c) == major(d)),
        _ => None,
    }
}

/// Probe the local tools. Blocking; run off the async runtime.
pub fn check_tooling(aws_program: &str, chromedriver_path: Option<&str>) -> ToolingReport {
    let chrome_version = CHROME_CANDIDATES
        .iter()
        .find_map(|program| version_output(program))
        .and_then(|out| parse_chrome_version(&out));
    let chromedriver_version = version_output(chromedriver_path.unwrap_or("chromedriver"))
        .and_then(|out| parse_chromedriver_version(&out));
    let aws_cli_version = version_output(aws_program).and_then(|out| parse_aws_cli_version(&out));

    let browser_compatible =
        versions_compatible(chrome_version.as_deref(), chromedriver_version.as_deref());

    match browser_compatible {
        Some(true) => tracing::info!("Chrome and ChromeDriver versions appear to be compatible."),
        Some(false) => tracing::warn!(
            "Chrome version ({:?}) and ChromeDriver version ({:?}) may be incompatible.",
            chrome_version,
            chromedriver_version
        ),
        None => tracing::warn!("Unable to check Chrome and ChromeDriver compatibility."),
    }

    ToolingReport {
        chrome_version,
        chromedriver_version,
        aws_cli_version,
        browser_compatible,
    }
}
