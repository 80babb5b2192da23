use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::requirements::DEFAULT_OUTLINE_LEVEL;

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout() -> u64 {
    600
}

fn default_required_level() -> u32 {
    DEFAULT_OUTLINE_LEVEL
}

fn default_max_children() -> usize {
    7
}

fn default_max_parallel() -> usize {
    8
}

fn default_per_node_ceiling() -> u32 {
    5_000
}

fn default_max_total_length() -> usize {
    60_000
}

fn default_max_chapter_length() -> usize {
    8_000
}

fn default_similarity_threshold() -> f64 {
    0.7
}

fn default_max_regenerations() -> usize {
    1
}

fn default_recent_summary_limit() -> usize {
    5
}

fn default_recent_title_limit() -> usize {
    10
}

fn default_summary_digest_chars() -> usize {
    200
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub interface_format: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            interface_format: String::new(),
            model_name: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout: default_timeout(),
        }
    }
}

impl LlmConfig {
    pub fn is_meaningful(&self) -> bool {
        !(self.api_key.is_empty()
            && self.base_url.is_empty()
            && self.interface_format.is_empty()
            && self.model_name.is_empty())
    }
}

/// 生成引擎的可调参数。相似度阈值与重生成次数没有公认的最优值，
/// 因此全部开放为配置项。
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    #[serde(default = "default_required_level")]
    pub default_required_level: u32,
    #[serde(default = "default_max_children")]
    pub max_children_per_node: usize,
    #[serde(default = "default_max_parallel")]
    pub max_parallel_chapters: usize,
    #[serde(default = "default_per_node_ceiling")]
    pub per_node_word_ceiling: u32,
    #[serde(default = "default_max_total_length")]
    pub max_total_length: usize,
    #[serde(default = "default_max_chapter_length")]
    pub max_chapter_length: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_max_regenerations")]
    pub max_regenerations: usize,
    #[serde(default = "default_recent_summary_limit")]
    pub recent_summary_limit: usize,
    #[serde(default = "default_recent_title_limit")]
    pub recent_title_limit: usize,
    #[serde(default = "default_summary_digest_chars")]
    pub summary_digest_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_required_level: default_required_level(),
            max_children_per_node: default_max_children(),
            max_parallel_chapters: default_max_parallel(),
            per_node_word_ceiling: default_per_node_ceiling(),
            max_total_length: default_max_total_length(),
            max_chapter_length: default_max_chapter_length(),
            similarity_threshold: default_similarity_threshold(),
            max_regenerations: default_max_regenerations(),
            recent_summary_limit: default_recent_summary_limit(),
            recent_title_limit: default_recent_title_limit(),
            summary_digest_chars: default_summary_digest_chars(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub knowledge_base_ids: Vec<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl RetrievalConfig {
    pub fn is_meaningful(&self) -> bool {
        !self.base_url.is_empty()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptConfig {
    #[serde(default)]
    pub custom_directories: Vec<PathBuf>,
    #[serde(default)]
    pub enable_hot_reload: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    #[serde(default)]
    pub directory: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RecentUsage {
    #[serde(default)]
    pub last_llm_interface: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub llm_profiles: BTreeMap<String, LlmConfig>,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub recent: RecentUsage,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_llm_profile(&self, name: &str) -> Option<&LlmConfig> {
        self.llm_profiles.get(name)
    }

    pub fn upsert_llm_profile<S: Into<String>>(&mut self, name: S, profile: LlmConfig) {
        self.llm_profiles.insert(name.into(), profile);
    }

    pub fn remove_llm_profile(&mut self, name: &str) -> Option<LlmConfig> {
        self.llm_profiles.remove(name)
    }

    pub fn primary_llm_profile(&self) -> Option<(&String, &LlmConfig)> {
        self.llm_profiles.iter().next()
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(input)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: Config,
}

impl ConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = if path.exists() {
            Config::from_path(&path)?
        } else {
            Config::default()
        };
        Ok(Self { path, config })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        Config::from_path(path.as_ref())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn reload(&mut self) -> Result<(), ConfigError> {
        if self.path.exists() {
            self.config = Config::from_path(&self.path)?;
        } else {
            self.config = Config::default();
        }
        Ok(())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.config.to_path(&self.path)
    }

    pub fn touch_llm_interface<S: Into<String>>(&mut self, name: S) {
        self.config.recent.last_llm_interface = Some(name.into());
    }

    pub fn last_llm_interface(&self) -> Option<&str> {
        self.config
            .recent
            .last_llm_interface
            .as_deref()
            .filter(|name| self.config.llm_profiles.contains_key(*name))
    }

    pub fn ensure_recent_defaults(&mut self) {
        let valid = self
            .config
            .recent
            .last_llm_interface
            .as_ref()
            .map(|name| self.config.llm_profiles.contains_key(name))
            == Some(true);
        if !valid {
            self.config.recent.last_llm_interface =
                self.config.llm_profiles.keys().next().cloned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_full_config() {
        let json = r#"{
            "llm_profiles": {
                "openai": {
                    "api_key": "123",
                    "base_url": "https://api.openai.com/v1",
                    "interface_format": "openai",
                    "model_name": "gpt-4o-mini",
                    "temperature": 0.7,
                    "max_tokens": 1024,
                    "timeout": 600
                }
            },
            "generation": {
                "default_required_level": 2,
                "per_node_word_ceiling": 4000
            },
            "retrieval": {
                "base_url": "https://rag.example.com",
                "knowledge_base_ids": ["kb-1", "kb-2"]
            },
            "recent": {
                "last_llm_interface": "openai"
            }
        }"#;

        let config = Config::from_json_str(json).expect("config");
        assert_eq!(config.llm_profiles.len(), 1);
        assert_eq!(config.generation.default_required_level, 2);
        assert_eq!(config.generation.per_node_word_ceiling, 4000);
        // 未给出的字段落到默认值。
        assert_eq!(config.generation.similarity_threshold, 0.7);
        assert_eq!(config.generation.max_regenerations, 1);
        assert_eq!(config.retrieval.knowledge_base_ids, vec!["kb-1", "kb-2"]);
        assert_eq!(config.recent.last_llm_interface.as_deref(), Some("openai"));
    }

    #[test]
    fn empty_input_yields_default_config() {
        let config = Config::from_json_str("").expect("config");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn store_persists_config() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.json");

        let mut store = ConfigStore::open(config_path.clone()).expect("store");
        store.config_mut().upsert_llm_profile(
            "openai",
            LlmConfig {
                api_key: "123".into(),
                base_url: "https://api.openai.com/v1".into(),
                interface_format: "openai".into(),
                model_name: "gpt-4o-mini".into(),
                ..LlmConfig::default()
            },
        );
        store.touch_llm_interface("openai");
        store.save().expect("save");

        let store = ConfigStore::open(config_path).expect("reopen");
        assert_eq!(store.last_llm_interface(), Some("openai"));
        assert!(store.config().llm_profiles.contains_key("openai"));
    }

    #[test]
    fn ensure_recent_defaults_backfills_missing_profile() {
        let mut store =
            ConfigStore::open(PathBuf::from("/nonexistent/config.json")).expect("store");
        store
            .config_mut()
            .upsert_llm_profile("deepseek", LlmConfig::default());
        store.config_mut().recent.last_llm_interface = Some("gone".into());
        store.ensure_recent_defaults();
        assert_eq!(store.last_llm_interface(), Some("deepseek"));
    }
}
