//! Application settings storage
//!
//! Stores configuration like the API key and model parameters in a JSON file
//! in the app data directory.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::ai_client::LlmConfig;
use crate::error::{ClusterError, Result};

/// Global settings instance
static SETTINGS: RwLock<Option<Settings>> = RwLock::new(None);

/// Path to config file (set during init)
static CONFIG_PATH: RwLock<Option<PathBuf>> = RwLock::new(None);

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_BATCH_SIZE: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProcessingStats {
    #[serde(default)]
    pub total_clustering_secs: f64,
    #[serde(default)]
    pub last_clustering_secs: f64,
    #[serde(default)]
    pub clustering_runs: u32,
    #[serde(default)]
    pub total_keywords_clustered: u64,
    #[serde(default)]
    pub total_openai_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Keywords per model request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub processing_stats: ProcessingStats,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_timeout() -> u64 {
    120
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            batch_size: DEFAULT_BATCH_SIZE,
            request_timeout_secs: default_timeout(),
            processing_stats: ProcessingStats::default(),
        }
    }
}

impl Settings {
    /// Load settings from disk or create default
    fn load(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                    tracing::warn!("[Settings] Ignoring unreadable {:?}: {}", path, e);
                    Settings::default()
                }),
                Err(_) => Settings::default(),
            }
        } else {
            Settings::default()
        }
    }

    /// Save settings to disk
    fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ClusterError::Config(format!("Failed to serialize settings: {}", e)))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, content)?;
        Ok(())
    }
}

/// Clustering parameters resolved from settings and CLI overrides
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    pub batch_size: usize,
    pub llm: LlmConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            llm: LlmConfig::default(),
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ClusterError::Config("batch size must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ClusterError::Config(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }
        if self.llm.max_tokens == 0 {
            return Err(ClusterError::Config("max_tokens must be at least 1".into()));
        }
        if self.llm.model.trim().is_empty() {
            return Err(ClusterError::Config("model name cannot be empty".into()));
        }
        Ok(())
    }
}

/// Default app data directory for settings
pub fn default_app_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("kwcluster"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Initialize settings with the app data directory
pub fn init(app_data_dir: PathBuf) {
    let config_path = app_data_dir.join("settings.json");
    let settings = Settings::load(&config_path);

    if let Ok(mut guard) = CONFIG_PATH.write() {
        *guard = Some(config_path);
    }
    if let Ok(mut guard) = SETTINGS.write() {
        *guard = Some(settings);
    }
}

/// Snapshot of the current settings
pub fn current() -> Settings {
    SETTINGS
        .read()
        .ok()
        .and_then(|g| g.clone())
        .unwrap_or_default()
}

/// Apply a change and persist it
fn update<F>(change: F) -> Result<()>
where
    F: FnOnce(&mut Settings),
{
    // Nothing changes in memory unless there is a file to persist it to
    let config_path = CONFIG_PATH
        .read()
        .map_err(|_| ClusterError::Config("Failed to acquire config path lock".into()))?
        .clone()
        .ok_or_else(|| ClusterError::Config("Settings not initialized".into()))?;

    let mut settings_guard = SETTINGS
        .write()
        .map_err(|_| ClusterError::Config("Failed to acquire settings lock".into()))?;

    let settings = settings_guard.get_or_insert_with(Settings::default);
    change(settings);
    settings.save(&config_path)
}

/// Path of the settings file, once initialized
pub fn config_path() -> Option<PathBuf> {
    CONFIG_PATH.read().ok().and_then(|g| g.clone())
}

// ==================== OpenAI API Key ====================

/// Extract `OPENAI_API_KEY=...` from .env file contents
fn parse_dotenv_key(content: &str) -> Option<String> {
    content
        .lines()
        .filter_map(|line| line.trim().strip_prefix("OPENAI_API_KEY="))
        .map(|v| v.trim().trim_matches('"').trim_matches('\'').to_string())
        .find(|v| !v.is_empty())
}

/// Get the OpenAI API key: env var, then ./.env, then stored setting
pub fn get_openai_api_key() -> Option<String> {
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            return Some(key);
        }
    }

    if let Ok(content) = fs::read_to_string(".env") {
        if let Some(key) = parse_dotenv_key(&content) {
            return Some(key);
        }
    }

    let guard = SETTINGS.read().ok()?;
    let settings = guard.as_ref()?;
    settings.openai_api_key.clone().filter(|k| !k.is_empty())
}

/// Check if OpenAI API key is available
pub fn has_openai_api_key() -> bool {
    get_openai_api_key().is_some()
}

/// Set and save the OpenAI API key (empty clears it)
pub fn set_openai_api_key(key: String) -> Result<()> {
    update(|s| s.openai_api_key = if key.is_empty() { None } else { Some(key) })?;
    tracing::info!("[Settings] OpenAI API key saved");
    Ok(())
}

fn mask_key(key: &str) -> String {
    if key.len() > 12 && key.is_char_boundary(8) && key.is_char_boundary(key.len() - 4) {
        format!("{}...{}", &key[..8], &key[key.len() - 4..])
    } else {
        "*".repeat(key.chars().count())
    }
}

/// Get masked OpenAI API key for display (shows first 8 / last 4 chars)
pub fn get_masked_openai_api_key() -> Option<String> {
    get_openai_api_key().map(|key| mask_key(&key))
}

// ==================== Clustering Parameters ====================

/// Resolve the clustering configuration from stored settings
pub fn cluster_config() -> ClusterConfig {
    let s = current();
    ClusterConfig {
        batch_size: s.batch_size,
        llm: LlmConfig {
            api_url: s.api_url,
            model: s.model,
            temperature: s.temperature,
            max_tokens: s.max_tokens,
            request_timeout_secs: s.request_timeout_secs,
        },
    }
}

/// Set a named setting from its string form
pub fn set_field(field: &str, value: &str) -> Result<()> {
    let invalid = |e: &dyn std::fmt::Display| ClusterError::Config(format!("invalid value for {}: {}", field, e));

    match field {
        "api_url" => {
            let value = value.to_string();
            update(|s| s.api_url = value)?
        }
        "model" => {
            if value.trim().is_empty() {
                return Err(ClusterError::Config("model name cannot be empty".into()));
            }
            let value = value.to_string();
            update(|s| s.model = value)?
        }
        "temperature" => {
            let t: f32 = value.parse().map_err(|e| invalid(&e))?;
            if !(0.0..=2.0).contains(&t) {
                return Err(ClusterError::Config("temperature must be between 0.0 and 2.0".into()));
            }
            update(|s| s.temperature = t)?
        }
        "max_tokens" => {
            let n: u32 = value.parse().map_err(|e| invalid(&e))?;
            update(|s| s.max_tokens = n)?
        }
        "batch_size" => {
            let n: usize = value.parse().map_err(|e| invalid(&e))?;
            if n == 0 {
                return Err(ClusterError::Config("batch size must be at least 1".into()));
            }
            update(|s| s.batch_size = n)?
        }
        "request_timeout_secs" => {
            let n: u64 = value.parse().map_err(|e| invalid(&e))?;
            update(|s| s.request_timeout_secs = n)?
        }
        other => return Err(ClusterError::Config(format!("unknown setting: {}", other))),
    }

    tracing::info!("[Settings] {} set to: {}", field, value);
    Ok(())
}

// ==================== Processing Stats ====================

/// Get processing stats
pub fn get_processing_stats() -> ProcessingStats {
    current().processing_stats
}

/// Record one finished clustering run (additive)
pub fn add_clustering_run(elapsed_secs: f64, keywords: usize) -> Result<()> {
    update(|s| {
        s.processing_stats.total_clustering_secs += elapsed_secs;
        s.processing_stats.last_clustering_secs = elapsed_secs;
        s.processing_stats.clustering_runs += 1;
        s.processing_stats.total_keywords_clustered += keywords as u64;
    })
}

/// Add OpenAI API token usage
pub fn add_openai_tokens(tokens: u64) -> Result<()> {
    update(|s| s.processing_stats.total_openai_tokens += tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("settings.json"));
        assert_eq!(settings.batch_size, 200);
        assert_eq!(settings.model, "gpt-4");
        assert!(settings.openai_api_key.is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut settings = Settings::default();
        settings.batch_size = 50;
        settings.openai_api_key = Some("sk-saved".into());
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path);
        assert_eq!(loaded.batch_size, 50);
        assert_eq!(loaded.openai_api_key.as_deref(), Some("sk-saved"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"model": "gpt-4o"}"#).unwrap();
        let loaded = Settings::load(&path);
        assert_eq!(loaded.model, "gpt-4o");
        assert_eq!(loaded.max_tokens, 4000);
        assert_eq!(loaded.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_parse_dotenv_key() {
        assert_eq!(parse_dotenv_key("FOO=1\nOPENAI_API_KEY=sk-abc \n"), Some("sk-abc".into()));
        assert_eq!(parse_dotenv_key("OPENAI_API_KEY=\"sk-quoted\""), Some("sk-quoted".into()));
        assert_eq!(parse_dotenv_key("OPENAI_API_KEY="), None);
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("sk-proj-abcdefghijkl"), "sk-proj-...ijkl");
        assert_eq!(mask_key("short"), "*****");
    }

    #[test]
    fn test_update_before_init_leaves_settings_untouched() {
        // No test in this crate calls init(), so the globals stay unset
        assert!(add_openai_tokens(500).is_err());
        assert_eq!(get_processing_stats().total_openai_tokens, 0);
        assert!(SETTINGS.read().unwrap().is_none());
    }

    #[test]
    fn test_cluster_config_validation() {
        assert!(ClusterConfig::default().validate().is_ok());

        let zero = ClusterConfig { batch_size: 0, ..ClusterConfig::default() };
        assert!(zero.validate().is_err());

        let mut hot = ClusterConfig::default();
        hot.llm.temperature = 3.5;
        assert!(hot.validate().is_err());
    }
}
