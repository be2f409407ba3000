//! Configuration loader and validator for the recording sync engine.
use crate::auth::Session;
use crate::dispatch::{FailurePolicy, PermanentFailureRule};
use crate::model::OwnerInfo;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub remote: Remote,
    #[serde(default)]
    pub identity: Identity,
    #[serde(default)]
    pub dispatch: Dispatch,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Empty means "generate once and keep in `<data_dir>/device_id`".
    #[serde(default)]
    pub device_id: String,
    #[serde(default = "default_probe_timeout_ms")]
    pub duration_probe_timeout_ms: u64,
}

/// Remote API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Remote {
    pub base_url: String,
    /// Bearer credential; empty means signed out.
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Identity snapshot attached to new records and events.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dispatch {
    pub permanent_failures: Vec<PermanentFailure>,
}

/// A remote error shape that means the event can never succeed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermanentFailure {
    pub status_code: u16,
    /// Regex matched against the remote error code.
    pub error_code: String,
}

impl Default for Dispatch {
    fn default() -> Self {
        Self {
            permanent_failures: vec![PermanentFailure {
                status_code: 404,
                error_code: "^APPOINTMENT_NOT_FOUND$".into(),
            }],
        }
    }
}

fn default_probe_timeout_ms() -> u64 {
    3000
}

fn default_user_agent() -> String {
    "recsync/0.1".into()
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.app.data_dir)
    }

    /// `DATABASE_URL` wins over the data-dir default.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/recsync.db", self.app.data_dir))
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.remote.base_url)
            .map_err(|_| ConfigError::Invalid("remote.base_url must be a valid URL"))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.app.duration_probe_timeout_ms)
    }

    pub fn owner(&self) -> OwnerInfo {
        OwnerInfo {
            subject: non_empty(&self.identity.subject),
            email: non_empty(&self.identity.email),
            name: non_empty(&self.identity.name),
        }
    }

    pub fn session(&self) -> Option<Session> {
        non_empty(&self.remote.token).map(|bearer| Session {
            bearer,
            owner: self.owner(),
        })
    }

    pub fn failure_policy(&self) -> Result<FailurePolicy, ConfigError> {
        let rules = self
            .dispatch
            .permanent_failures
            .iter()
            .map(|rule| {
                Ok(PermanentFailureRule {
                    status_code: rule.status_code,
                    error_code: Regex::new(&rule.error_code).map_err(|_| {
                        ConfigError::Invalid(
                            "dispatch.permanent_failures[].error_code must be a valid regex",
                        )
                    })?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(FailurePolicy::new(rules))
    }

    /// Configured device id, or the one persisted under the data dir,
    /// generating and storing it on first use.
    pub fn resolve_device_id(&self) -> Result<String, ConfigError> {
        if let Some(id) = non_empty(&self.app.device_id) {
            return Ok(id);
        }
        let path = self.device_id_path();
        if let Ok(existing) = fs::read_to_string(&path) {
            if let Some(id) = non_empty(&existing) {
                return Ok(id);
            }
        }
        let id = Uuid::new_v4().to_string();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &id)?;
        Ok(id)
    }

    fn device_id_path(&self) -> PathBuf {
        Path::new(&self.app.data_dir).join("device_id")
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.duration_probe_timeout_ms == 0 {
        return Err(ConfigError::Invalid("app.duration_probe_timeout_ms must be > 0"));
    }
    cfg.base_url()?;
    if cfg.remote.user_agent.trim().is_empty() {
        return Err(ConfigError::Invalid("remote.user_agent must be non-empty"));
    }
    cfg.failure_policy()?;
    Ok(())
}

/// Returns an example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  device_id: ""
  duration_probe_timeout_ms: 3000

remote:
  base_url: "https://api.example.com/"
  token: "YOUR_BEARER_TOKEN"
  user_agent: "recsync/0.1"

identity:
  subject: "user-123"
  email: "tech@example.com"
  name: "Field Tech"

dispatch:
  permanent_failures:
    - status_code: 404
      error_code: "^APPOINTMENT_NOT_FOUND$"
"#
}
