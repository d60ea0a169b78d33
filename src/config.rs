//! Configuration management with YAML support

use anyhow::{anyhow, bail, Context, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::classifier::{ChatCompletionsModel, KeywordModel, LanguageModel};
use crate::model::FeedId;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub feeds: FeedsConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierBackend {
    #[default]
    Keywords,
    Chat,
}

/// Classifier policy and backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub backend: ClassifierBackend,

    /// Verdicts below this confidence need review
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-attempt limit
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// UTC offset for dates and times written in message bodies
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,

    #[serde(default)]
    pub chat: ChatConfig,
}

/// OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_chat_base_url")]
    pub base_url: String,

    #[serde(default = "default_chat_model")]
    pub model: String,

    /// Environment variable holding the API key (never the key itself)
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedsConfig {
    #[serde(default)]
    pub mail: FeedConfig,

    #[serde(default)]
    pub calendar: FeedConfig,

    #[serde(default)]
    pub tasks: FeedConfig,
}

/// Individual feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub path: Option<String>,
}

// Default value functions
fn default_database_path() -> String {
    "~/.local/share/mailsieve/mailsieve.db".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_threshold() -> f64 {
    0.6
}

fn default_max_attempts() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8000
}

fn default_utc_offset_hours() -> i32 {
    9
}

fn default_chat_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_interval_secs() -> u64 {
    30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            backend: ClassifierBackend::default(),
            threshold: default_threshold(),
            max_attempts: default_max_attempts(),
            timeout_secs: default_timeout_secs(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            utc_offset_hours: default_utc_offset_hours(),
            chat: ChatConfig::default(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: default_chat_base_url(),
            model: default_chat_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            path: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./mailsieve.yaml (current directory)
    /// 3. ~/.config/mailsieve/mailsieve.yaml
    pub fn load(path: &str) -> Result<Self> {
        let search_paths = vec![
            shellexpand::tilde(path).to_string(),
            "mailsieve.yaml".to_string(),
            shellexpand::tilde("~/.config/mailsieve/mailsieve.yaml").to_string(),
        ];

        for search_path in &search_paths {
            if std::path::Path::new(search_path).exists() {
                let content = std::fs::read_to_string(search_path)
                    .with_context(|| format!("reading {}", search_path))?;
                let config: Config = serde_yaml::from_str(&content)
                    .with_context(|| format!("parsing {}", search_path))?;
                config.validate()?;
                log::debug!("Loaded configuration from {}", search_path);
                return Ok(config);
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.classifier;
        if !(0.0..=1.0).contains(&c.threshold) {
            bail!("classifier.threshold must be within [0, 1], got {}", c.threshold);
        }
        if c.max_attempts == 0 {
            bail!("classifier.max_attempts must be at least 1");
        }
        if !(-12..=14).contains(&c.utc_offset_hours) {
            bail!(
                "classifier.utc_offset_hours must be within [-12, 14], got {}",
                c.utc_offset_hours
            );
        }
        if self.worker.interval_secs == 0 {
            bail!("worker.interval_secs must be at least 1");
        }
        Ok(())
    }

    /// Get the database path, expanding ~ to home directory
    pub fn database_path(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.database.path).to_string();
        PathBuf::from(expanded)
    }

    fn feed(&self, feed: FeedId) -> &FeedConfig {
        match feed {
            FeedId::Mail => &self.feeds.mail,
            FeedId::Calendar => &self.feeds.calendar,
            FeedId::Tasks => &self.feeds.tasks,
        }
    }

    /// Path of an enabled feed; `None` when disabled or unset
    pub fn feed_path(&self, feed: FeedId) -> Option<PathBuf> {
        let config = self.feed(feed);
        if !config.enabled {
            return None;
        }
        config
            .path
            .as_ref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
    }

    pub fn local_offset(&self) -> Result<FixedOffset> {
        let hours = self.classifier.utc_offset_hours;
        FixedOffset::east_opt(hours * 3600)
            .ok_or_else(|| anyhow!("invalid UTC offset {} hours", hours))
    }

    pub fn worker_interval(&self) -> Duration {
        Duration::from_secs(self.worker.interval_secs)
    }

    /// Instantiate the configured model backend
    pub fn build_model(&self) -> Result<Arc<dyn LanguageModel>> {
        match self.classifier.backend {
            ClassifierBackend::Keywords => Ok(Arc::new(KeywordModel::new())),
            ClassifierBackend::Chat => {
                let chat = &self.classifier.chat;
                let api_key = std::env::var(&chat.api_key_env).unwrap_or_default();
                let model = ChatCompletionsModel::new(
                    &chat.base_url,
                    &chat.model,
                    api_key,
                    Duration::from_secs(self.classifier.timeout_secs),
                )
                .with_context(|| format!("set {} to use the chat backend", chat.api_key_env))?;
                Ok(Arc::new(model))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.classifier.backend, ClassifierBackend::Keywords);
        assert_eq!(config.classifier.threshold, 0.6);
        assert_eq!(config.classifier.max_attempts, 3);
        assert_eq!(config.worker.interval_secs, 30);
        assert!(config.feed_path(FeedId::Mail).is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
database:
  path: ~/.local/share/mailsieve/test.db

classifier:
  backend: chat
  threshold: 0.75
  chat:
    model: local-model
    base_url: http://localhost:8080/v1

feeds:
  mail:
    path: /var/mail/export.jsonl
  calendar:
    enabled: false
    path: /var/mail/calendar.jsonl
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.database.path, "~/.local/share/mailsieve/test.db");
        assert_eq!(config.classifier.backend, ClassifierBackend::Chat);
        assert_eq!(config.classifier.threshold, 0.75);
        assert_eq!(config.classifier.max_attempts, 3);
        assert_eq!(config.classifier.chat.model, "local-model");
        assert_eq!(config.classifier.chat.api_key_env, "OPENAI_API_KEY");
        assert_eq!(
            config.feed_path(FeedId::Mail),
            Some(PathBuf::from("/var/mail/export.jsonl"))
        );
        assert!(config.feed_path(FeedId::Calendar).is_none());
        assert!(config.feed_path(FeedId::Tasks).is_none());
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let mut config = Config::default();
        config.classifier.threshold = 1.5;
        assert!(config.validate().is_err());

        config.classifier.threshold = 0.5;
        config.classifier.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_local_offset() {
        let mut config = Config::default();
        assert_eq!(config.local_offset().unwrap().local_minus_utc(), 9 * 3600);

        config.classifier.utc_offset_hours = -5;
        assert!(config.validate().is_ok());
        assert_eq!(config.local_offset().unwrap().local_minus_utc(), -5 * 3600);

        config.classifier.utc_offset_hours = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        let config = Config::load(missing.to_str().unwrap()).unwrap();
        assert_eq!(config.worker.interval_secs, 30);
    }

    #[test]
    fn test_load_reads_given_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.yaml");
        std::fs::write(&path, "worker:\n  interval_secs: 5\n").unwrap();
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.worker_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_keywords_backend_needs_no_key() {
        let model = Config::default().build_model().unwrap();
        assert_eq!(model.name(), "keywords");
    }
}
