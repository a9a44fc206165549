// Layered Settings (file + TOPIQ_* environment)

use crate::credentials::{CredentialInput, CredentialResolver};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use topiq_core::domain::config::{DEFAULT_QUEUE_NAME, DEFAULT_SUBSCRIPTION};
use topiq_core::domain::OptionsMap;
use topiq_core::error::{QueueError, Result};
use topiq_core::QueueConfig;

/// Environment variable prefix (`TOPIQ_TOPIC`, `TOPIQ_PUBLISHER_OPTIONS__...`)
pub const ENV_PREFIX: &str = "TOPIQ";

/// Nested-key separator for environment variables
pub const ENV_SEPARATOR: &str = "__";

/// Queue settings as written in a file or the environment
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub name: Option<String>,
    pub topic: Option<String>,
    pub project_id: Option<String>,
    pub credentials: Option<CredentialInput>,
    /// Base directory for relative credential paths
    pub credentials_root: Option<PathBuf>,
    pub subscription: Option<String>,
    pub publisher_options: OptionsMap,
    pub subscription_options: OptionsMap,
    /// Max in-flight messages per subscription handle
    pub messages: Option<usize>,
    pub max_concurrent_publishes: Option<usize>,
}

impl QueueSettings {
    /// Resolve credentials and build a queue configuration
    ///
    /// The result is validated when a queue is connected, not here.
    pub fn into_config(self, resolver: &CredentialResolver) -> Result<QueueConfig> {
        let resolver = match &self.credentials_root {
            Some(root) => CredentialResolver::new(resolver.root().join(root)),
            None => resolver.clone(),
        };
        let credentials = resolver.resolve(self.credentials)?;

        Ok(QueueConfig {
            name: self.name.unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string()),
            topic: self.topic.unwrap_or_default(),
            project_id: self.project_id.filter(|p| !p.trim().is_empty()),
            credentials: Some(credentials),
            subscription: self
                .subscription
                .unwrap_or_else(|| DEFAULT_SUBSCRIPTION.to_string()),
            publisher_options: self.publisher_options,
            subscription_options: self.subscription_options,
            max_messages: self.messages.unwrap_or(QueueConfig::default().max_messages),
            max_concurrent_publishes: self.max_concurrent_publishes,
        })
    }
}

/// Load settings from an optional file plus `TOPIQ_*` environment variables
///
/// Environment values override file values.
pub fn load_settings(path: Option<&Path>) -> Result<QueueSettings> {
    load_settings_from(path, None)
}

/// Same as [`load_settings`] with an explicit environment map
pub fn load_settings_from(
    path: Option<&Path>,
    env: Option<HashMap<String, String>>,
) -> Result<QueueSettings> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        info!(path = %path.display(), "Loading queue settings file");
        builder = builder.add_source(config::File::from(path).required(true));
    }
    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .source(env),
    );

    let settings = builder
        .build()
        .and_then(|c| c.try_deserialize::<QueueSettings>())
        .map_err(|e| QueueError::Config(format!("Settings could not be loaded: {}", e)))?;

    debug!(
        topic = ?settings.topic,
        subscription = ?settings.subscription,
        "Queue settings loaded"
    );
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio_test::assert_ok;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn toml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_file_settings() {
        let file = toml_file(
            r#"
            topic = "projects/acme/topics/orders"
            subscription = "workers"
            messages = 5

            [credentials]
            project_id = "acme"

            [publisher_options.batching]
            maxMessages = 10
            "#,
        );

        let settings = assert_ok!(load_settings_from(Some(file.path()), env(&[])));

        assert_eq!(settings.topic.as_deref(), Some("projects/acme/topics/orders"));
        assert_eq!(settings.subscription.as_deref(), Some("workers"));
        assert_eq!(settings.messages, Some(5));
        assert!(matches!(settings.credentials, Some(CredentialInput::Object(_))));
        assert!(settings.publisher_options.contains_key("batching"));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = toml_file(r#"topic = "from-file""#);

        let settings = assert_ok!(load_settings_from(
            Some(file.path()),
            env(&[
                ("TOPIQ_TOPIC", "from-env"),
                ("TOPIQ_MESSAGES", "3"),
                ("TOPIQ_CREDENTIALS", r#"{"project_id":"acme"}"#),
            ]),
        ));

        assert_eq!(settings.topic.as_deref(), Some("from-env"));
        assert_eq!(settings.messages, Some(3));
        assert!(matches!(settings.credentials, Some(CredentialInput::Text(_))));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = load_settings_from(Some(Path::new("/nonexistent/topiq.toml")), env(&[]))
            .unwrap_err();
        assert_eq!(err.code(), "QUEUE.CONFIG");
    }

    #[test]
    fn test_into_config_applies_defaults() {
        let settings = QueueSettings {
            topic: Some("orders".into()),
            credentials: Some(CredentialInput::Text(r#"{"project_id":"acme"}"#.into())),
            ..Default::default()
        };

        let config = assert_ok!(settings.into_config(&CredentialResolver::new("/")));

        assert_eq!(config.topic, "orders");
        assert_eq!(config.name, "queue");
        assert_eq!(config.subscription, "default");
        assert_eq!(config.max_messages, 1);
        assert_eq!(config.credentials.unwrap().project_id(), Some("acme"));
    }

    #[test]
    fn test_into_config_resolves_relative_to_credentials_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("keys")).unwrap();
        std::fs::write(dir.path().join("keys/sa.json"), r#"{"project_id":"acme"}"#).unwrap();

        let settings = QueueSettings {
            topic: Some("orders".into()),
            credentials: Some(CredentialInput::Text("sa.json".into())),
            credentials_root: Some(PathBuf::from("keys")),
            ..Default::default()
        };

        let config = assert_ok!(settings.into_config(&CredentialResolver::new(dir.path())));
        assert_eq!(config.credentials.unwrap().project_id(), Some("acme"));
    }
}
