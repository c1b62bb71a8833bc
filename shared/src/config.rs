//! Backend identity and container tuning.
//!
//! Placeholder credentials are the documented switch into demo mode: the
//! client records run entirely against local storage and no sign-in is
//! attempted.

use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
    AUTH_BACKOFF_BASE, CLIENTS_COLLECTION, CLIENTS_STORAGE_KEY, DEFAULT_AUTH_MAX_RETRIES,
    DEFAULT_TOAST_DURATION, THEME_STORAGE_KEY,
};

pub const ENV_PREFIX: &str = "WOOL_TRACKER_FIREBASE_";
pub const DOCUMENTS_API_BASE: &str = "https://firestore.googleapis.com/v1/";

const PLACEHOLDER_API_KEY: &str = "your-api-key";
const PLACEHOLDER_AUTH_DOMAIN: &str = "your-project.firebaseapp.com";
const PLACEHOLDER_PROJECT_ID: &str = "your-project-id";
const PLACEHOLDER_STORAGE_BUCKET: &str = "your-project.appspot.com";
const PLACEHOLDER_SENDER_ID: &str = "123456789";
const PLACEHOLDER_APP_ID: &str = "your-app-id";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} is empty")]
    Empty { field: &'static str },
    #[error("{field} contains whitespace")]
    Whitespace { field: &'static str },
    #[error("invalid url for project {project_id}: {reason}")]
    InvalidUrl { project_id: String, reason: String },
    #[error("{0}")]
    Invalid(String),
}

/// Backend project identity and credentials.
#[derive(Clone)]
pub struct BackendConfig {
    pub api_key: SecretString,
    pub auth_domain: String,
    pub project_id: String,
    pub storage_bucket: String,
    pub messaging_sender_id: String,
    pub app_id: String,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("api_key", &"[REDACTED]")
            .field("auth_domain", &self.auth_domain)
            .field("project_id", &self.project_id)
            .field("storage_bucket", &self.storage_bucket)
            .field("messaging_sender_id", &self.messaging_sender_id)
            .field("app_id", &self.app_id)
            .finish()
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_key: SecretString::new(PLACEHOLDER_API_KEY.to_string()),
            auth_domain: PLACEHOLDER_AUTH_DOMAIN.to_string(),
            project_id: PLACEHOLDER_PROJECT_ID.to_string(),
            storage_bucket: PLACEHOLDER_STORAGE_BUCKET.to_string(),
            messaging_sender_id: PLACEHOLDER_SENDER_ID.to_string(),
            app_id: PLACEHOLDER_APP_ID.to_string(),
        }
    }
}

impl BackendConfig {
    /// Environment variable suffixes, in declaration order.
    pub const FIELDS: [&'static str; 6] = [
        "API_KEY",
        "AUTH_DOMAIN",
        "PROJECT_ID",
        "STORAGE_BUCKET",
        "MESSAGING_SENDER_ID",
        "APP_ID",
    ];

    pub fn from_env() -> Self {
        let config = Self::from_lookup(|name| std::env::var(name).ok());
        if config.is_configured() {
            info!(project_id = %config.project_id, "backend configuration loaded");
        } else {
            warn!(
                placeholders = ?config.placeholder_fields(),
                "backend not configured, running in demo mode"
            );
        }
        config
    }

    /// Builds the config from an arbitrary lookup; absent values keep their
    /// placeholder.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));
        let defaults = Self::default();

        Self {
            api_key: get("API_KEY").map_or(defaults.api_key, SecretString::new),
            auth_domain: get("AUTH_DOMAIN").unwrap_or(defaults.auth_domain),
            project_id: get("PROJECT_ID").unwrap_or(defaults.project_id),
            storage_bucket: get("STORAGE_BUCKET").unwrap_or(defaults.storage_bucket),
            messaging_sender_id: get("MESSAGING_SENDER_ID")
                .unwrap_or(defaults.messaging_sender_id),
            app_id: get("APP_ID").unwrap_or(defaults.app_id),
        }
    }

    /// False while either the api key or the project id is a placeholder.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !is_placeholder(self.api_key.expose_secret()) && !is_placeholder(&self.project_id)
    }

    /// Environment suffixes whose values still look like template placeholders.
    #[must_use]
    pub fn placeholder_fields(&self) -> Vec<&'static str> {
        self.values()
            .into_iter()
            .filter(|(_, v)| is_placeholder(v))
            .map(|(k, _)| k)
            .collect()
    }

    /// Environment suffixes missing from `lookup`.
    pub fn missing_fields<F>(lookup: F) -> Vec<&'static str>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::FIELDS
            .into_iter()
            .filter(|suffix| lookup(&format!("{ENV_PREFIX}{suffix}")).is_none())
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in self.values() {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty { field });
            }
            if value.chars().any(char::is_whitespace) {
                return Err(ConfigError::Whitespace { field });
            }
        }
        Ok(())
    }

    /// REST root of the project's document database.
    pub fn documents_base_url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidUrl {
            project_id: self.project_id.clone(),
            reason,
        };
        if self.project_id.contains('/') {
            return Err(invalid("project id cannot contain '/'".to_string()));
        }
        Url::parse(DOCUMENTS_API_BASE)
            .and_then(|base| {
                base.join(&format!(
                    "projects/{}/databases/(default)/documents/",
                    self.project_id
                ))
            })
            .map_err(|e| invalid(e.to_string()))
    }

    fn values(&self) -> [(&'static str, &str); 6] {
        [
            ("API_KEY", self.api_key.expose_secret().as_str()),
            ("AUTH_DOMAIN", self.auth_domain.as_str()),
            ("PROJECT_ID", self.project_id.as_str()),
            ("STORAGE_BUCKET", self.storage_bucket.as_str()),
            ("MESSAGING_SENDER_ID", self.messaging_sender_id.as_str()),
            ("APP_ID", self.app_id.as_str()),
        ]
    }
}

fn is_placeholder(value: &str) -> bool {
    value.starts_with("your-") || value.contains("123456") || value.contains("abcdef")
}

/// Tuning shared by the four containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub default_toast_duration: Duration,
    pub auth_max_retries: u32,
    pub auth_backoff_base: Duration,
    pub clients_collection: String,
    pub clients_storage_key: String,
    pub theme_storage_key: String,
    pub seed_demo_data: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_toast_duration: DEFAULT_TOAST_DURATION,
            auth_max_retries: DEFAULT_AUTH_MAX_RETRIES,
            auth_backoff_base: AUTH_BACKOFF_BASE,
            clients_collection: CLIENTS_COLLECTION.to_string(),
            clients_storage_key: CLIENTS_STORAGE_KEY.to_string(),
            theme_storage_key: THEME_STORAGE_KEY.to_string(),
            seed_demo_data: false,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_toast_duration.is_zero() {
            return Err(ConfigError::Invalid(
                "default_toast_duration must be > 0".into(),
            ));
        }
        if self.auth_backoff_base.is_zero() {
            return Err(ConfigError::Invalid("auth_backoff_base must be > 0".into()));
        }
        if self.clients_collection.is_empty() {
            return Err(ConfigError::Empty {
                field: "clients_collection",
            });
        }
        if self.clients_storage_key == self.theme_storage_key {
            return Err(ConfigError::Invalid(
                "clients and theme storage keys must differ".into(),
            ));
        }
        Ok(())
    }
}
