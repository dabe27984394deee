//! [`Browser`] over a WebDriver session (chromedriver).

use super::{Browser, BrowserError, BrowserResult, Locator};
use crate::config::{BackoffPolicy, BrowserSettings};
use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::error::CmdError;
use fantoccini::{Client, ClientBuilder};
use serde_json::{json, Map, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// WebDriver "Enter" key code point.
const ENTER_KEY: &str = "\u{E007}";

/// How long a freshly spawned chromedriver gets to accept connections.
const DRIVER_STARTUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Launch options for a WebDriver session.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub settings: BrowserSettings,
    pub headless: bool,
    pub poll_interval: Duration,
    pub backoff: BackoffPolicy,
}

pub struct WebDriverBrowser {
    client: Client,
    /// chromedriver we spawned ourselves, stopped on quit
    driver: Mutex<Option<Child>>,
    poll_interval: Duration,
}

impl WebDriverBrowser {
    /// Start (or connect to) chromedriver and open a Chrome session.
    pub async fn launch(options: &LaunchOptions) -> BrowserResult<Self> {
        let settings = &options.settings;
        let profile_dir = settings.resolved_profile_dir();
        std::fs::create_dir_all(&profile_dir).map_err(|e| {
            BrowserError::Launch(format!(
                "failed to create profile directory {}: {}",
                profile_dir.display(),
                e
            ))
        })?;

        let args = chrome_args(settings, options.headless);
        tracing::info!("Chrome options: {:?}", args);
        tracing::info!("Browser profile directory: {}", profile_dir.display());

        let driver = match &settings.chromedriver_path {
            Some(path) => Some(spawn_chromedriver(path, &settings.webdriver_url)?),
            None => None,
        };

        let capabilities = chrome_capabilities(args);
        tracing::info!("Connecting to WebDriver at {}...", settings.webdriver_url);

        let deadline = Instant::now() + DRIVER_STARTUP_TIMEOUT;
        let mut attempt = 0;
        let client = loop {
            attempt += 1;
            let mut builder = ClientBuilder::native();
            builder.capabilities(capabilities.clone());
            match builder.connect(&settings.webdriver_url).await {
                Ok(client) => break client,
                // A driver we just spawned may not be listening yet.
                Err(e) if driver.is_some() && Instant::now() < deadline => {
                    tracing::debug!("WebDriver not ready (attempt {}): {}", attempt, e);
                    sleep(options.backoff.delay(attempt)).await;
                }
                Err(e) => {
                    return Err(BrowserError::Launch(format!(
                        "could not open a session at {}: {}",
                        settings.webdriver_url, e
                    )));
                }
            }
        };

        tracing::info!("Browser session created successfully");
        Ok(Self {
            client,
            driver: Mutex::new(driver),
            poll_interval: options.poll_interval,
        })
    }
}

/// Command-line switches passed to Chrome.
fn chrome_args(settings: &BrowserSettings, headless: bool) -> Vec<String> {
    let mut args = Vec::new();
    if headless {
        args.push("--headless=new".to_string());
    }
    args.push(format!(
        "--user-data-dir={}",
        settings.resolved_profile_dir().display()
    ));
    args.push("--profile-directory=Default".to_string());
    if settings.no_sandbox {
        args.push("--no-sandbox".to_string());
    }
    args.push("--disable-dev-shm-usage".to_string());
    args.extend(settings.extra_args.iter().cloned());
    args
}

fn chrome_capabilities(args: Vec<String>) -> Map<String, Value> {
    let mut capabilities = Map::new();
    capabilities.insert("browserName".to_string(), json!("chrome"));
    capabilities.insert(
        "goog:chromeOptions".to_string(),
        json!({
            "args": args,
            "excludeSwitches": ["enable-automation"],
            "useAutomationExtension": false,
        }),
    );
    capabilities
}

/// Port chromedriver should listen on, taken from the WebDriver URL.
fn driver_port(webdriver_url: &str) -> u16 {
    url::Url::parse(webdriver_url)
        .ok()
        .and_then(|u| u.port_or_known_default())
        .unwrap_or(9515)
}

fn spawn_chromedriver(path: &std::path::Path, webdriver_url: &str) -> BrowserResult<Child> {
    let port = driver_port(webdriver_url);
    tracing::info!("Starting {} on port {}", path.display(), port);
    Command::new(path)
        .arg(format!("--port={}", port))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BrowserError::Launch(format!("failed to start {}: {}", path.display(), e)))
}

fn to_fantoccini(locator: &Locator) -> fantoccini::Locator<'_> {
    match locator {
        Locator::Id(id) => fantoccini::Locator::Id(id),
        Locator::Css(selector) => fantoccini::Locator::Css(selector),
    }
}

fn command_error(err: CmdError) -> BrowserError {
    let message = err.to_string();
    if message.to_lowercase().contains("stale element") {
        BrowserError::StaleElement(message)
    } else {
        BrowserError::Command(message)
    }
}

#[async_trait]
impl Browser for WebDriverBrowser {
    type Element = Element;

    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        self.client.goto(url).await.map_err(command_error)
    }

    async fn find(&self, locator: &Locator) -> BrowserResult<Option<Element>> {
        // find_all yields an empty list instead of a no-such-element error
        let mut elements = self
            .client
            .find_all(to_fantoccini(locator))
            .await
            .map_err(command_error)?;
        if elements.is_empty() {
            Ok(None)
        } else {
            Ok(Some(elements.swap_remove(0)))
        }
    }

    async fn is_displayed(&self, element: &Element) -> BrowserResult<bool> {
        element.is_displayed().await.map_err(command_error)
    }

    async fn is_enabled(&self, element: &Element) -> BrowserResult<bool> {
        element.is_enabled().await.map_err(command_error)
    }

    async fn click(&self, element: &Element) -> BrowserResult<()> {
        element.click().await.map_err(command_error)
    }

    async fn type_text(&self, element: &Element, text: &str) -> BrowserResult<()> {
        element.send_keys(text).await.map_err(command_error)
    }

    async fn press_enter(&self, element: &Element) -> BrowserResult<()> {
        element.send_keys(ENTER_KEY).await.map_err(command_error)
    }

    async fn text(&self, element: &Element) -> BrowserResult<String> {
        element.text().await.map_err(command_error)
    }

    async fn execute_script(&self, script: &str) -> BrowserResult<Value> {
        self.client
            .execute(script, Vec::new())
            .await
            .map_err(command_error)
    }

    async fn page_source(&self) -> BrowserResult<String> {
        self.client.source().await.map_err(command_error)
    }

    async fn title(&self) -> BrowserResult<String> {
        self.client.title().await.map_err(command_error)
    }

    async fn refresh(&self) -> BrowserResult<()> {
        self.client.refresh().await.map_err(command_error)
    }

    async fn quit(&self) -> BrowserResult<()> {
        let closed = self.client.clone().close().await.map_err(command_error);

        if let Some(mut driver) = self.driver.lock().await.take() {
            if let Err(e) = driver.kill().await {
                tracing::debug!("chromedriver already stopped: {}", e);
            }
        }
        closed
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_chrome_args_headless_and_profile() {
        let settings = BrowserSettings {
            profile_dir: Some(PathBuf::from("/tmp/ssopilot-profile")),
            extra_args: vec!["--lang=en-US".to_string()],
            ..BrowserSettings::default()
        };
        let args = chrome_args(&settings, true);
        assert_eq!(args[0], "--headless=new");
        assert!(args.contains(&"--user-data-dir=/tmp/ssopilot-profile".to_string()));
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--lang=en-US"));

        let interactive = chrome_args(&settings, false);
        assert!(!interactive.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn test_capabilities_hide_automation_switch() {
        let caps = chrome_capabilities(vec!["--no-sandbox".to_string()]);
        assert_eq!(
            caps["goog:chromeOptions"]["excludeSwitches"],
            json!(["enable-automation"])
        );
        assert_eq!(caps["goog:chromeOptions"]["useAutomationExtension"], json!(false));
    }

    #[test]
    fn test_driver_port() {
        assert_eq!(driver_port("http://localhost:4444"), 4444);
        assert_eq!(driver_port("http://localhost"), 80);
        assert_eq!(driver_port("not a url"), 9515);
    }
}
