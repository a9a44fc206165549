// Topiq Infrastructure - System Adapters
// Credential files, environment and layered settings

pub mod credentials;
pub mod settings;

pub use credentials::{CredentialInput, CredentialResolver, CREDENTIALS_ENV};
pub use settings::{load_settings, load_settings_from, QueueSettings, ENV_PREFIX};
