use crate::{
    cleanup::DEFAULT_HISTORY_PAGE_SIZE,
    retry::{RetryPolicy, DEFAULT_MAX_THROTTLE_RETRIES},
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "tg-cleaner.yaml";
const DEFAULT_SESSION_NAME: &str = "telegram_cleaner";
const DEFAULT_CANDIDATES_FILE: &str = "inactive_chats.json";
const DEFAULT_KEEP_FILE: &str = "keep_chats.json";
const DEFAULT_DIALOGS_FILE: &str = "dialogs.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TG_API_ID and TG_API_HASH must be set (environment, .env or config file)")]
    MissingCredentials,
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub paths: PathsConfig,
    pub cleanup: CleanupConfig,
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    pub api_id: Option<i32>,
    pub api_hash: Option<String>,
    pub session_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PathsConfig {
    pub candidates: Option<String>,
    pub keep: Option<String>,
    pub dialogs: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CleanupConfig {
    pub max_throttle_retries: Option<u32>,
    pub history_page_size: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_id: i32,
    pub api_hash: String,
    pub session_file: PathBuf,
}

/// Load the YAML config. A missing file is only an error when the user
/// named it explicitly.
pub fn load_config(path: &Path, explicit: bool) -> Result<Config, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
            return Ok(Config::default())
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Overlay `TG_API_ID`, `TG_API_HASH` and `TG_SESSION_NAME`.
pub fn apply_env<F>(cfg: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("TG_API_ID").filter(|v| !v.trim().is_empty()) {
        let id = v
            .trim()
            .parse::<i32>()
            .map_err(|_| ConfigError::Invalid(format!("TG_API_ID is not a number: '{v}'")))?;
        cfg.telegram.api_id = Some(id);
    }
    if let Some(v) = lookup("TG_API_HASH").filter(|v| !v.trim().is_empty()) {
        cfg.telegram.api_hash = Some(v.trim().to_string());
    }
    if let Some(v) = lookup("TG_SESSION_NAME").filter(|v| !v.trim().is_empty()) {
        cfg.telegram.session_file = Some(v.trim().to_string());
    }
    Ok(())
}

pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    if let Some(id) = cfg.telegram.api_id {
        if id <= 0 {
            return Err(ConfigError::Invalid(format!("api_id must be > 0, got {id}")));
        }
    }
    if cfg.telegram.api_hash.as_deref().is_some_and(|h| h.trim().is_empty()) {
        return Err(ConfigError::Invalid("api_hash is empty".into()));
    }
    if let Some(n) = cfg.cleanup.max_throttle_retries {
        if n > 10 {
            return Err(ConfigError::Invalid(format!(
                "cleanup.max_throttle_retries={n} out of range (0..=10)"
            )));
        }
    }
    if let Some(n) = cfg.cleanup.history_page_size {
        if !(1..=100).contains(&n) {
            return Err(ConfigError::Invalid(format!(
                "cleanup.history_page_size={n} out of range (1..=100)"
            )));
        }
    }
    Ok(())
}

impl Config {
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let (Some(api_id), Some(api_hash)) = (self.telegram.api_id, self.telegram.api_hash.clone())
        else {
            return Err(ConfigError::MissingCredentials);
        };
        let name = self
            .telegram
            .session_file
            .clone()
            .unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string());
        let mut session_file = PathBuf::from(name);
        if session_file.extension().is_none() {
            session_file.set_extension("session");
        }
        Ok(Credentials {
            api_id,
            api_hash,
            session_file,
        })
    }

    pub fn candidates_path(&self) -> PathBuf {
        PathBuf::from(
            self.paths
                .candidates
                .as_deref()
                .unwrap_or(DEFAULT_CANDIDATES_FILE),
        )
    }

    pub fn keep_path(&self) -> PathBuf {
        PathBuf::from(self.paths.keep.as_deref().unwrap_or(DEFAULT_KEEP_FILE))
    }

    pub fn dialogs_path(&self) -> PathBuf {
        PathBuf::from(self.paths.dialogs.as_deref().unwrap_or(DEFAULT_DIALOGS_FILE))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_throttle_retries: self
                .cleanup
                .max_throttle_retries
                .unwrap_or(DEFAULT_MAX_THROTTLE_RETRIES),
        }
    }

    pub fn history_page_size(&self) -> usize {
        self.cleanup
            .history_page_size
            .unwrap_or(DEFAULT_HISTORY_PAGE_SIZE)
    }
}
