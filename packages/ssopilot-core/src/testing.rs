//! In-crate fakes for browser, credential and step tests.

use crate::auth::{
    CredentialField, CredentialSource, CredentialStore, Credentials, Prompter, StoredCredentials,
};
use crate::browser::{Browser, BrowserError, BrowserResult, Locator};
use crate::error::{LoginError, LoginResult};
use crate::extractor::LoginUrl;
use crate::session::LoginSession;
use crate::steps::{StepHandler, StepId, StepOutcome, StepTimeouts};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn session_for(url: &str) -> LoginSession {
    LoginSession::new(&LoginUrl {
        url: url.to_string(),
        verification_code: None,
        code_prefilled: url.contains("user_code="),
    })
}

pub fn test_timeouts() -> StepTimeouts {
    StepTimeouts {
        check: Duration::from_secs(1),
        action: Duration::from_secs(5),
    }
}

// ============================================================================
// Browser
// ============================================================================

/// Page change triggered by a click, an Enter key or a refresh.
#[derive(Debug, Clone)]
pub enum Reaction {
    Show(Locator),
    Hide(Locator),
    Remove(Locator),
    SetTitle(String),
    SetBody(String),
}

#[derive(Default)]
struct Page {
    present: HashSet<Locator>,
    hidden: HashSet<Locator>,
    disabled: HashSet<Locator>,
    stale: HashSet<Locator>,
    texts: HashMap<Locator, String>,
    title: String,
    body_text: String,
    on_click: HashMap<Locator, Vec<Reaction>>,
    on_enter: HashMap<Locator, Vec<Reaction>>,
    on_refresh: Vec<Reaction>,
    clicks: Vec<Locator>,
    typed: Vec<(Locator, String)>,
    enters: Vec<Locator>,
    navigations: Vec<String>,
    refreshes: usize,
    quits: usize,
}

impl Page {
    fn apply(&mut self, reactions: &[Reaction]) {
        for reaction in reactions {
            match reaction {
                Reaction::Show(locator) => {
                    self.present.insert(locator.clone());
                    self.hidden.remove(locator);
                }
                Reaction::Hide(locator) => {
                    self.hidden.insert(locator.clone());
                }
                Reaction::Remove(locator) => {
                    self.present.remove(locator);
                }
                Reaction::SetTitle(title) => self.title = title.clone(),
                Reaction::SetBody(text) => self.body_text = text.clone(),
            }
        }
    }

    fn require(&self, locator: &Locator) -> BrowserResult<()> {
        if self.stale.contains(locator) {
            return Err(BrowserError::StaleElement(locator.to_string()));
        }
        if !self.present.contains(locator) {
            return Err(BrowserError::Command(format!("no such element: {}", locator)));
        }
        Ok(())
    }
}

/// Scriptable page; elements are their own locators.
#[derive(Clone, Default)]
pub struct FakeBrowser {
    page: Arc<Mutex<Page>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_page<T>(&self, f: impl FnOnce(&mut Page) -> T) -> T {
        let mut page = self.page.lock().unwrap();
        f(&mut page)
    }

    pub fn show(&self, locator: &Locator) {
        self.with_page(|p| p.apply(&[Reaction::Show(locator.clone())]));
    }

    pub fn hide(&self, locator: &Locator) {
        self.with_page(|p| p.apply(&[Reaction::Hide(locator.clone())]));
    }

    pub fn disable(&self, locator: &Locator) {
        self.with_page(|p| p.disabled.insert(locator.clone()));
    }

    pub fn mark_stale(&self, locator: &Locator) {
        self.with_page(|p| p.stale.insert(locator.clone()));
    }

    pub fn set_text(&self, locator: &Locator, text: &str) {
        self.with_page(|p| p.texts.insert(locator.clone(), text.to_string()));
    }

    pub fn set_title(&self, title: &str) {
        self.with_page(|p| p.title = title.to_string());
    }

    pub fn set_body_text(&self, text: &str) {
        self.with_page(|p| p.body_text = text.to_string());
    }

    pub fn on_click(&self, locator: &Locator, reactions: Vec<Reaction>) {
        self.with_page(|p| p.on_click.insert(locator.clone(), reactions));
    }

    pub fn on_enter(&self, locator: &Locator, reactions: Vec<Reaction>) {
        self.with_page(|p| p.on_enter.insert(locator.clone(), reactions));
    }

    pub fn on_refresh(&self, reactions: Vec<Reaction>) {
        self.with_page(|p| p.on_refresh = reactions);
    }

    pub fn clicks(&self) -> Vec<Locator> {
        self.with_page(|p| p.clicks.clone())
    }

    pub fn typed(&self) -> Vec<(Locator, String)> {
        self.with_page(|p| p.typed.clone())
    }

    pub fn enters(&self) -> Vec<Locator> {
        self.with_page(|p| p.enters.clone())
    }

    pub fn navigations(&self) -> Vec<String> {
        self.with_page(|p| p.navigations.clone())
    }

    pub fn refreshes(&self) -> usize {
        self.with_page(|p| p.refreshes)
    }

    pub fn quits(&self) -> usize {
        self.with_page(|p| p.quits)
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    type Element = Locator;

    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        self.with_page(|p| p.navigations.push(url.to_string()));
        Ok(())
    }

    async fn find(&self, locator: &Locator) -> BrowserResult<Option<Locator>> {
        Ok(self.with_page(|p| p.present.contains(locator).then(|| locator.clone())))
    }

    async fn is_displayed(&self, element: &Locator) -> BrowserResult<bool> {
        self.with_page(|p| {
            p.require(element)?;
            Ok(!p.hidden.contains(element))
        })
    }

    async fn is_enabled(&self, element: &Locator) -> BrowserResult<bool> {
        self.with_page(|p| {
            p.require(element)?;
            Ok(!p.disabled.contains(element))
        })
    }

    async fn click(&self, element: &Locator) -> BrowserResult<()> {
        self.with_page(|p| {
            p.require(element)?;
            p.clicks.push(element.clone());
            let reactions = p.on_click.get(element).cloned().unwrap_or_default();
            p.apply(&reactions);
            Ok(())
        })
    }

    async fn type_text(&self, element: &Locator, text: &str) -> BrowserResult<()> {
        self.with_page(|p| {
            p.require(element)?;
            p.typed.push((element.clone(), text.to_string()));
            Ok(())
        })
    }

    async fn press_enter(&self, element: &Locator) -> BrowserResult<()> {
        self.with_page(|p| {
            p.require(element)?;
            p.enters.push(element.clone());
            let reactions = p.on_enter.get(element).cloned().unwrap_or_default();
            p.apply(&reactions);
            Ok(())
        })
    }

    async fn text(&self, element: &Locator) -> BrowserResult<String> {
        self.with_page(|p| {
            p.require(element)?;
            Ok(p.texts.get(element).cloned().unwrap_or_default())
        })
    }

    async fn execute_script(&self, _script: &str) -> BrowserResult<serde_json::Value> {
        Ok(serde_json::Value::String(self.with_page(|p| p.body_text.clone())))
    }

    async fn page_source(&self) -> BrowserResult<String> {
        Ok(self.with_page(|p| {
            format!("<html><head><title>{}</title></head><body>{}</body></html>", p.title, p.body_text)
        }))
    }

    async fn title(&self) -> BrowserResult<String> {
        Ok(self.with_page(|p| p.title.clone()))
    }

    async fn refresh(&self) -> BrowserResult<()> {
        self.with_page(|p| {
            p.refreshes += 1;
            let reactions = p.on_refresh.clone();
            p.apply(&reactions);
        });
        Ok(())
    }

    async fn quit(&self) -> BrowserResult<()> {
        self.with_page(|p| p.quits += 1);
        Ok(())
    }
}

// ============================================================================
// Credentials and prompts
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredCredentials>>,
}

impl CredentialStore for MemoryStore {
    fn get(&self, profile: &str) -> anyhow::Result<StoredCredentials> {
        Ok(self.entries.lock().unwrap().get(profile).cloned().unwrap_or_default())
    }

    fn set(&self, profile: &str, field: CredentialField, value: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(profile.to_string()).or_default();
        match field {
            CredentialField::Email => entry.email = Some(value.to_string()),
            CredentialField::Password => entry.password = Some(value.to_string()),
        }
        Ok(())
    }

    fn delete(&self, profile: &str) -> anyhow::Result<()> {
        self.entries.lock().unwrap().remove(profile);
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}

/// Fixed credentials; records every `force_refresh` flag it was asked with.
pub struct StaticCredentials {
    credentials: Credentials,
    requests: Mutex<Vec<bool>>,
}

impl StaticCredentials {
    pub fn new(email: &str, password: &str) -> Self {
        Self {
            credentials: Credentials {
                email: email.to_string(),
                password: password.to_string(),
            },
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<bool> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn get_credentials(&self, _profile: &str, force_refresh: bool) -> LoginResult<Credentials> {
        self.requests.lock().unwrap().push(force_refresh);
        Ok(self.credentials.clone())
    }
}

#[derive(Default)]
pub struct ScriptedPrompter {
    email: Option<String>,
    password: Option<String>,
    mfa_codes: Mutex<VecDeque<String>>,
    /// MFA prompt never answers
    hang_on_mfa: bool,
    email_prompts: AtomicUsize,
    password_prompts: AtomicUsize,
    mfa_descriptions: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_mfa_code(self, code: &str) -> Self {
        self.mfa_codes.lock().unwrap().push_back(code.to_string());
        self
    }

    pub fn hanging_on_mfa(mut self) -> Self {
        self.hang_on_mfa = true;
        self
    }

    pub fn email_prompts(&self) -> usize {
        self.email_prompts.load(Ordering::SeqCst)
    }

    pub fn password_prompts(&self) -> usize {
        self.password_prompts.load(Ordering::SeqCst)
    }

    pub fn mfa_prompts(&self) -> usize {
        self.mfa_descriptions.lock().unwrap().len()
    }

    pub fn mfa_descriptions(&self) -> Vec<String> {
        self.mfa_descriptions.lock().unwrap().clone()
    }
}

fn unanswered(what: &str) -> LoginError {
    LoginError::Prompt(format!("no scripted {}", what))
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn email(&self, _profile: &str) -> LoginResult<String> {
        self.email_prompts.fetch_add(1, Ordering::SeqCst);
        self.email.clone().ok_or_else(|| unanswered("email"))
    }

    async fn password(&self, _profile: &str) -> LoginResult<String> {
        self.password_prompts.fetch_add(1, Ordering::SeqCst);
        self.password.clone().ok_or_else(|| unanswered("password"))
    }

    async fn mfa_code(&self, description: &str) -> LoginResult<String> {
        self.mfa_descriptions.lock().unwrap().push(description.to_string());
        if self.hang_on_mfa {
            std::future::pending::<()>().await;
        }
        self.mfa_codes.lock().unwrap().pop_front().ok_or_else(|| unanswered("MFA code"))
    }
}

// ============================================================================
// Steps
// ============================================================================

/// Handler that replays fixed outcomes, then reports `NotApplicable`.
pub struct ScriptedHandler {
    id: StepId,
    outcomes: Mutex<VecDeque<StepOutcome>>,
    log: Arc<Mutex<Vec<StepId>>>,
}

impl ScriptedHandler {
    pub fn new(id: StepId, outcomes: Vec<StepOutcome>, log: Arc<Mutex<Vec<StepId>>>) -> Self {
        Self {
            id,
            outcomes: Mutex::new(outcomes.into()),
            log,
        }
    }
}

#[async_trait]
impl<B: Browser> StepHandler<B> for ScriptedHandler {
    fn id(&self) -> StepId {
        self.id
    }

    async fn evaluate(&self, _session: &mut LoginSession, _browser: &B) -> StepOutcome {
        self.log.lock().unwrap().push(self.id);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(StepOutcome::NotApplicable)
    }
}
