//! Configuration for the wp-todo client

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::http::ClientOptions;

/// Client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database holding credentials and cached tasks
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds; unset means requests may wait forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("wp-todo"))
        .unwrap_or_default()
        .join("wp-todo.sqlite")
}

fn default_user_agent() -> String {
    ClientOptions::default().user_agent
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: None,
        }
    }
}

impl AppConfig {
    /// Default config path
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(env_path) = std::env::var("WP_TODO_CONFIG") {
            return Ok(PathBuf::from(env_path));
        }

        let local = PathBuf::from("config.toml");
        if local.exists() {
            return Ok(local);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("wp-todo");

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from default path, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save config to specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let with_comments = format!(
            "# wp-todo configuration\n\n\
             {}\n\
             # Give up on requests after this many seconds:\n\
             # timeout_secs = 30\n",
            content
        );

        std::fs::write(path, with_comments).context("Failed to write config file")?;

        Ok(())
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            user_agent: self.http.user_agent.clone(),
            timeout: self.http.timeout_secs.map(Duration::from_secs),
        }
    }
}
