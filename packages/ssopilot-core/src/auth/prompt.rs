//! Operator prompts: email, password, one-time MFA codes.
//!
//! MFA codes are the one deliberate manual step of the flow; everything
//! else is answered from the credential store.

use crate::error::{LoginError, LoginResult};
use async_trait::async_trait;
use std::io::{BufRead, Write};

#[async_trait]
pub trait Prompter: Send + Sync {
    async fn email(&self, profile: &str) -> LoginResult<String>;

    async fn password(&self, profile: &str) -> LoginResult<String>;

    /// Ask for the current code of the operator's authenticator app.
    async fn mfa_code(&self, description: &str) -> LoginResult<String>;
}

/// Prompts on the controlling terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

fn read_line(prompt: String) -> LoginResult<String> {
    let mut stderr = std::io::stderr();
    write!(stderr, "{}", prompt).map_err(|e| LoginError::Prompt(e.to_string()))?;
    stderr.flush().map_err(|e| LoginError::Prompt(e.to_string()))?;

    let mut line = String::new();
    let read = std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| LoginError::Prompt(e.to_string()))?;
    if read == 0 {
        return Err(LoginError::Prompt("stdin closed".to_string()));
    }
    Ok(line.trim().to_string())
}

async fn blocking<F>(f: F) -> LoginResult<String>
where
    F: FnOnce() -> LoginResult<String> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LoginError::Prompt(format!("prompt task failed: {}", e)))?
}

fn non_empty(value: String, what: &str) -> LoginResult<String> {
    if value.is_empty() {
        Err(LoginError::Prompt(format!("{} must not be empty", what)))
    } else {
        Ok(value)
    }
}

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn email(&self, profile: &str) -> LoginResult<String> {
        let prompt = format!("Enter your email address for profile '{}': ", profile);
        let email = blocking(move || read_line(prompt)).await?;
        non_empty(email, "email address")
    }

    async fn password(&self, profile: &str) -> LoginResult<String> {
        let prompt = format!("Enter your password for profile '{}': ", profile);
        let password = blocking(move || {
            rpassword::prompt_password(prompt).map_err(|e| LoginError::Prompt(e.to_string()))
        })
        .await?;
        non_empty(password, "password")
    }

    async fn mfa_code(&self, description: &str) -> LoginResult<String> {
        if !description.is_empty() {
            eprintln!("{}", description);
        }
        let code = blocking(|| read_line("Enter the code from your authenticator app: ".to_string())).await?;
        let code: String = code.chars().filter(|c| !c.is_whitespace()).collect();
        non_empty(code, "MFA code")
    }
}
