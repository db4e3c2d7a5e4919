//! Runtime configuration: models, directories, and the capability server list.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const DEFAULT_CONFIG_PATH: &str = "majordomo.json";

/// Agent configuration, loaded from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model driving the orchestrator turn loop.
    pub model: String,

    /// Cheaper model used for story summarization.
    pub summary_model: String,

    /// Directory for persisted state (memory, stories, schedules).
    pub data_dir: PathBuf,

    /// Directory of markdown capability docs folded into the system prompt.
    pub docs_dir: PathBuf,

    /// Capability servers to spawn at startup.
    pub servers: Vec<ServerConfig>,
}

/// How to launch one capability server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Display name used in logs and error messages.
    pub name: String,

    /// Executable to spawn.
    pub command: String,

    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            summary_model: "gpt-4o-mini".to_string(),
            data_dir: PathBuf::from("data"),
            docs_dir: PathBuf::from("prompts"),
            servers: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from `MAJORDOMO_CONFIG`, falling back to
    /// `majordomo.json` in the working directory.
    ///
    /// A missing or unreadable file yields the defaults; startup never fails
    /// on configuration.
    pub async fn load() -> Self {
        let path = std::env::var("MAJORDOMO_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path).await
    }

    /// Load configuration from an explicit path.
    pub async fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded configuration");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Invalid config file, using defaults");
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read config file, using defaults");
                Self::default()
            }
        }
    }
}
