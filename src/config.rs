//! Configuration loaded from `docflow.toml`.
//!
//! Every field has a default, so a missing file or a partial one is fine.
//! `DOCFLOW_BROKER_URL` takes precedence over the file's broker url.
//! The broker section is built once at start-up and shared read-only.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::DocflowError;
use crate::poller::PollConfig;
use crate::state_machine::BatchMode;

pub const CONFIG_FILE: &str = "docflow.toml";
pub const BROKER_URL_ENV: &str = "DOCFLOW_BROKER_URL";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocflowConfig {
    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub poll: PollSettings,

    #[serde(default)]
    pub batch: BatchSettings,
}

/// Connection settings for the broker gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_url")]
    pub url: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Task that converts a single document.
    #[serde(default = "default_convert_task")]
    pub convert_task: String,

    /// Task that converts a whole batch in one job.
    #[serde(default = "default_batch_task")]
    pub batch_task: String,

    /// How long the broker keeps results. Batches are forgotten after this.
    #[serde(default = "default_result_expires_secs")]
    pub result_expires_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollSettings {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    #[serde(default = "default_log_every_secs")]
    pub log_every_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchSettings {
    #[serde(default)]
    pub mode: BatchMode,
}

fn default_broker_url() -> String {
    "http://localhost:5555".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_convert_task() -> String {
    "convert_pdf_to_markdown".to_string()
}

fn default_batch_task() -> String {
    "process_batch".to_string()
}

fn default_result_expires_secs() -> u64 {
    900
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_max_wait_secs() -> u64 {
    3600
}

fn default_log_every_secs() -> u64 {
    30
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            convert_task: default_convert_task(),
            batch_task: default_batch_task(),
            result_expires_secs: default_result_expires_secs(),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_wait_secs: default_max_wait_secs(),
            log_every_secs: default_log_every_secs(),
        }
    }
}

impl BrokerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn result_expires(&self) -> Duration {
        Duration::from_secs(self.result_expires_secs)
    }
}

impl PollSettings {
    pub fn to_poll_config(&self) -> Result<PollConfig, DocflowError> {
        PollConfig::new(
            Duration::from_millis(self.interval_ms),
            Duration::from_secs(self.max_wait_secs),
            Duration::from_secs(self.log_every_secs),
        )
    }
}

impl DocflowConfig {
    /// Loads `docflow.toml` from the current directory, or defaults if absent.
    pub fn load() -> Result<Self> {
        let path = Path::new(CONFIG_FILE);
        let config = if path.exists() {
            Self::load_from(path)?
        } else {
            Self::default()
        };
        Ok(config.with_broker_url(std::env::var(BROKER_URL_ENV).ok()))
    }

    /// Loads an explicit config file. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = toml::from_str::<DocflowConfig>(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.poll.to_poll_config()?;
        Ok(config)
    }

    /// Replaces the broker url when `url` is set and non-empty.
    pub fn with_broker_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url
            && !url.is_empty()
        {
            self.broker.url = url;
        }
        self
    }
}
