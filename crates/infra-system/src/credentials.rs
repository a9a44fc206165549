// Credential Resolver
// Accepts a JSON object, inline JSON text, or a path to a service-account file

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use topiq_core::error::{QueueError, Result};
use topiq_core::Credentials;

/// Environment variable consulted when no credentials are configured
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Credentials as written in configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CredentialInput {
    /// Inline JSON (leading `{`) or a file path
    Text(String),
    /// Already-structured credentials
    Object(Map<String, Value>),
}

impl CredentialInput {
    fn is_blank(&self) -> bool {
        match self {
            CredentialInput::Text(text) => text.trim().is_empty(),
            CredentialInput::Object(map) => map.is_empty(),
        }
    }
}

/// Turns configured credentials into [`Credentials`]
///
/// Relative paths are resolved against `root`.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    root: PathBuf,
}

impl CredentialResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolver rooted at the current working directory
    pub fn from_current_dir() -> Self {
        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve credentials, falling back to `GOOGLE_APPLICATION_CREDENTIALS`
    pub fn resolve(&self, input: Option<CredentialInput>) -> Result<Credentials> {
        let env = std::env::var(CREDENTIALS_ENV).ok();
        self.resolve_from(input, env.as_deref())
    }

    /// Resolve credentials with an explicit environment value
    ///
    /// # Errors
    /// - QueueError::Credentials("Invalid or missing credentials") if nothing usable is given
    /// - QueueError::Credentials("Credentials could not be parsed") for bad inline JSON
    /// - QueueError::Credentials("Credentials could not be read [path]") for unreadable files
    pub fn resolve_from(
        &self,
        input: Option<CredentialInput>,
        env: Option<&str>,
    ) -> Result<Credentials> {
        let configured = input.filter(|input| !input.is_blank());
        let input = match (configured, env) {
            (Some(input), _) => input,
            (None, Some(env)) if !env.trim().is_empty() => {
                debug!(source = CREDENTIALS_ENV, "Using credentials from environment");
                CredentialInput::Text(env.to_string())
            }
            (None, _) => {
                error!("Broker credentials are missing");
                return Err(missing());
            }
        };

        match input {
            CredentialInput::Object(map) => Credentials::from_value(Value::Object(map)),
            CredentialInput::Text(text) => self.resolve_text(text.trim()),
        }
    }

    fn resolve_text(&self, text: &str) -> Result<Credentials> {
        if text.starts_with('{') {
            return Credentials::from_json_str(text);
        }

        let path = self.credential_path(text);
        let unreadable =
            || QueueError::Credentials(format!("Credentials could not be read [{}]", path.display()));

        let raw = std::fs::read_to_string(&path).map_err(|e| {
            debug!(path = %path.display(), error = %e, "Credential file read failed");
            unreadable()
        })?;
        let value: Value = serde_json::from_str(&raw).map_err(|e| {
            debug!(path = %path.display(), error = %e, "Credential file is not JSON");
            unreadable()
        })?;
        Credentials::from_value(value)
    }

    /// Expand `~` and anchor relative paths at the root
    pub fn credential_path(&self, raw: &str) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(raw).into_owned());
        if expanded.is_absolute() {
            expanded
        } else {
            self.root.join(expanded)
        }
    }
}

fn missing() -> QueueError {
    QueueError::Credentials("Invalid or missing credentials".to_string())
}
