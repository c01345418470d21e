use crate::ConsumerError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub host: String,
    pub port: u16,
    pub max_workers: usize,
    pub max_queue_size: usize,
    /// Pause after an empty poll
    pub poll_interval_ms: u64,
    /// How long the reader waits on a full queue before logging and retrying
    pub enqueue_timeout_ms: u64,
    /// How long an idle worker waits before re-checking for shutdown
    pub dequeue_timeout_ms: u64,
    pub request_timeout_secs: u64,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub log_format: LogFormat,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    pub base_url: String,
    pub output_dir: PathBuf,
    pub max_tool_rounds: usize,
    pub request_timeout_secs: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            host: "broker".to_string(),
            port: 4000,
            max_workers: 4,
            max_queue_size: 500,
            poll_interval_ms: 100,
            enqueue_timeout_ms: 1000,
            dequeue_timeout_ms: 1000,
            request_timeout_secs: 30,
            reconnect_delay_ms: 500,
            max_reconnect_delay_ms: 10_000,
            log_format: LogFormat::Text,
            agent: AgentConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            model: "qwen3:8b".to_string(),
            base_url: "http://127.0.0.1:11434".to_string(),
            output_dir: PathBuf::from("./output"),
            max_tool_rounds: 8,
            request_timeout_secs: 300,
        }
    }
}

impl ConsumerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ConsumerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConsumerError> {
        if self.host.trim().is_empty() {
            return Err(ConsumerError::Config("host must not be empty".to_string()));
        }
        if self.max_workers == 0 {
            return Err(ConsumerError::Config("max_workers must be at least 1".to_string()));
        }
        if self.max_queue_size == 0 {
            return Err(ConsumerError::Config(
                "max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.agent.max_tool_rounds == 0 {
            return Err(ConsumerError::Config(
                "agent.max_tool_rounds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms.max(self.reconnect_delay_ms))
    }
}
