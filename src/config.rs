//! Application configuration, loaded once from a YAML file.
//!
//! Every field carries a serde default so a minimal config stays minimal.
//! `AppConfig::from_yaml_file` is the only entry point; validation of the
//! configured endpoints happens there so bad URLs fail at startup rather
//! than mid-pipeline.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Chat-completion endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Model identifier passed to the chat endpoint.
    pub model_name: String,
    pub api_key: String,
    /// OpenAI-compatible endpoint root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Semaphore width for concurrent chat calls.
    pub max_concurrent_requests: usize,
    /// Language the summarizer writes in.
    pub summary_language: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_name: "gpt-3.5-turbo".into(),
            api_key: String::new(),
            base_url: String::new(),
            temperature: 0.7,
            max_tokens: 2000,
            max_concurrent_requests: 5,
            summary_language: "Chinese".into(),
        }
    }
}

/// Where KV blobs, state files and the PDF cache live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub base_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: "./data".into(),
        }
    }
}

/// A topic expression: one phrase or a list that gets OR-joined.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopicList {
    One(String),
    Many(Vec<String>),
}

impl Default for TopicList {
    fn default() -> Self {
        TopicList::Many(Vec::new())
    }
}

impl TopicList {
    pub fn is_empty(&self) -> bool {
        match self {
            TopicList::One(s) => s.is_empty(),
            TopicList::Many(v) => v.is_empty(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub storage: StorageConfig,

    /// Topic expression for the catalog query.
    pub arxiv_topic_list: TopicList,
    pub arxiv_search_offset: usize,
    #[serde(default = "default_search_limit")]
    pub arxiv_search_limit: usize,

    /// When true, the summarize pipeline reads from the filtered-papers KV
    /// instead of querying the catalog directly.
    pub enable_llm_filter: bool,
    /// Target topic the LLM filter judges abstracts against.
    pub llm_filter_topic: String,

    /// Batch cap for one round of the summarize loop.
    #[serde(default = "default_batch_size")]
    pub process_batch_size: usize,

    /// Parallelism for PDF download and extraction.
    #[serde(default = "default_reader_workers")]
    pub paper_reader_max_workers: usize,

    pub feishu_webhook_url: String,
}

fn default_search_limit() -> usize {
    100
}

fn default_batch_size() -> usize {
    10
}

fn default_reader_workers() -> usize {
    20
}

impl AppConfig {
    /// Load and validate a config file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let config: AppConfig = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (label, value) in [
            ("llm.base_url", &self.llm.base_url),
            ("feishu_webhook_url", &self.feishu_webhook_url),
        ] {
            if !value.is_empty() && url::Url::parse(value).is_err() {
                return Err(PipelineError::config(format!("{label} is not a valid URL: {value}")));
            }
        }
        if self.process_batch_size == 0 {
            return Err(PipelineError::config("process_batch_size must be at least 1"));
        }
        if self.llm.max_concurrent_requests == 0 {
            return Err(PipelineError::config("llm.max_concurrent_requests must be at least 1"));
        }
        Ok(())
    }
}
