//! Process configuration. Loaded once at start-up from built-in defaults, an
//! optional TOML file and the environment, then handed to the server as an
//! immutable value.

use anyhow::{Context, Result};
use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Default `tracing` filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Public Clarifai API host
pub const DEFAULT_BASE_URL: &str = "https://api.clarifai.com";

/// Upper bound on a single upstream call
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Environment variables and the settings keys they override
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("CLARIFAI_API_KEY", "clarifai.api_key"),
    ("CLARIFAI_USER_ID", "clarifai.user_id"),
    ("CLARIFAI_APP_ID", "clarifai.app_id"),
    ("CLARIFAI_MODEL_ID", "clarifai.model_id"),
    ("CLARIFAI_MODEL_VERSION_ID", "clarifai.model_version_id"),
    ("CLARIFAI_BASE_URL", "clarifai.base_url"),
    ("CLARIFAI_TIMEOUT_SECS", "clarifai.timeout_secs"),
    ("HOST", "server.host"),
    ("PORT", "server.port"),
    ("CORS_PERMISSIVE", "server.cors_permissive"),
];

/// Raised when required upstream credentials are missing or blank
#[derive(Debug, thiserror::Error)]
#[error("missing required configuration: {}", .missing.join(", "))]
pub struct ConfigurationError {
    pub missing: Vec<&'static str>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub clarifai: ClarifaiSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,

    /// Allow any origin, method and header
    pub cors_permissive: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub filter: String,
}

/// Identifiers and secret used to address the recognition model
#[derive(Clone, Deserialize)]
pub struct ClarifaiSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub model_version_id: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl fmt::Debug for ClarifaiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClarifaiSettings")
            .field("api_key", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("app_id", &self.app_id)
            .field("model_id", &self.model_id)
            .field("model_version_id", &self.model_version_id)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ClarifaiSettings {
    /// The model-version outputs endpoint
    pub fn outputs_url(&self) -> String {
        format!(
            "{}/v2/users/{}/apps/{}/models/{}/versions/{}/outputs",
            self.base_url.trim_end_matches('/'),
            self.user_id,
            self.app_id,
            self.model_id,
            self.model_version_id
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> std::result::Result<(), ConfigurationError> {
        let required = [
            ("CLARIFAI_API_KEY", &self.api_key),
            ("CLARIFAI_USER_ID", &self.user_id),
            ("CLARIFAI_APP_ID", &self.app_id),
            ("CLARIFAI_MODEL_ID", &self.model_id),
            ("CLARIFAI_MODEL_VERSION_ID", &self.model_version_id),
        ];
        let missing: Vec<&'static str> = required
            .into_iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(var, _)| var)
            .collect();

        match missing.is_empty() {
            true => Ok(()),
            false => Err(ConfigurationError { missing }),
        }
    }
}

impl Settings {
    /// Load settings from an optional file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_sources(path, &env)
    }

    /// Load settings from an optional file and an explicit environment map
    pub fn from_sources(path: Option<&Path>, env: &HashMap<String, String>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 5000)?
            .set_default("server.cors_permissive", true)?
            .set_default("clarifai.base_url", DEFAULT_BASE_URL)?
            .set_default("clarifai.timeout_secs", DEFAULT_TIMEOUT_SECS)?
            .set_default("log.filter", DEFAULT_LOG_FILTER)?;

        if let Some(path) = path {
            let name = path
                .to_str()
                .with_context(|| format!("config path {path:?} is not valid UTF-8"))?;
            builder = builder.add_source(File::new(name, FileFormat::Toml));
        }

        for (var, key) in ENV_OVERRIDES {
            builder = builder.set_override_option(*key, env.get(*var).cloned())?;
        }

        let settings: Settings = builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        settings.clarifai.validate()?;
        Ok(settings)
    }

    /// The address the HTTP server binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
impl ClarifaiSettings {
    pub(crate) fn for_tests(base_url: &str) -> Self {
        ClarifaiSettings {
            api_key: "test-key".into(),
            user_id: "clarifai".into(),
            app_id: "main".into(),
            model_id: "food-item-recognition".into(),
            model_version_id: "1d5fd481e0cf4826aa72ec3ff049e044".into(),
            base_url: base_url.into(),
            timeout_secs: 5,
        }
    }
}
