use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration, one table per subsystem
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub qdrant: QdrantConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rerank: RerankSettings,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub history: HistorySettings,
    #[serde(default)]
    pub article: ArticleSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub url: String,
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:11434".to_string(),
            model: "qwen2.5:7b-instruct".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantConfig {
    pub url: String,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model_id: String,
    /// Worker count; 0 means one per available core
    pub workers: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            workers: 0,
        }
    }
}

impl EmbeddingConfig {
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Passages kept after fusion
    pub limit: usize,
    /// Vector candidates requested per kept passage
    pub oversampling: usize,
    pub min_score: f32,
    pub keyword_min_score: f32,
    pub keyword_page_size: u32,
    pub alpha: f32,
    pub beta: f32,
    pub use_keyword_search: bool,
    /// Payload key holding the scope (source document) id
    pub scope_key: String,
    /// Extra synonym entries merged over the built-in table
    pub synonyms: BTreeMap<String, Vec<String>>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: 5,
            oversampling: 3,
            min_score: 0.2,
            keyword_min_score: 0.1,
            keyword_page_size: 100,
            alpha: 0.7,
            beta: 0.3,
            use_keyword_search: true,
            scope_key: "id".to_string(),
            synonyms: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankSettings {
    pub enabled: bool,
    pub threshold: f32,
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub acquire_timeout_secs: u64,
    pub delta_timeout_secs: u64,
    pub channel_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            acquire_timeout_secs: 30,
            delta_timeout_secs: 60,
            channel_capacity: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    pub storage_dir: PathBuf,
    pub temperature: f32,
    pub max_tokens: u32,
    pub save_timeout_secs: u64,
}

impl Default for HistorySettings {
    fn default() -> Self {
        let storage_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".chatrag")
            .join("sessions");

        Self {
            storage_dir,
            temperature: 0.7,
            max_tokens: 3000,
            save_timeout_secs: 10,
        }
    }
}

/// Generation settings for stateless article turns
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArticleSettings {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ArticleSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub embed_secs: u64,
    pub retrieve_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            embed_secs: 10,
            retrieve_secs: 10,
        }
    }
}

impl TimeoutSettings {
    pub fn embed(&self) -> Duration {
        Duration::from_secs(self.embed_secs)
    }

    pub fn retrieve(&self) -> Duration {
        Duration::from_secs(self.retrieve_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from the default path, creating it if missing
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, creating it if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let config = Config::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(config_path)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents)
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(config_path, toml_string)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .context("Could not determine home directory")?;

        Ok(home.join(".chatrag").join("config.toml"))
    }
}
