//! Runtime configuration.
//!
//! Layered with Figment: built-in defaults, then an optional TOML file, then
//! `RAG_`-prefixed environment variables (`RAG_RETRIEVAL__K=5`,
//! `RAG_LLM__MODEL=...`). The resulting [`RagConfig`] is built once at
//! startup and handed to each component's constructor.

use crate::chunking::ChunkingConfig;
use crate::error::ConfigError;
use crate::models::{Partition, SearchOptions};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "RAG_";
pub const DEFAULT_CONFIG_FILE: &str = "rag.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Root directory holding one sub-directory per partition index.
    pub persist_dir: PathBuf,
    pub partitions: PartitionRegistry,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub index: IndexConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    /// Upper bound for routing, retrieval and synthesis.
    pub stage_timeout_secs: u64,
    /// Upper bound for building missing indexes; embedding a whole
    /// knowledge base takes far longer than answering a query.
    pub build_timeout_secs: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            persist_dir: PathBuf::from("./vector_store"),
            partitions: PartitionRegistry::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            index: IndexConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            stage_timeout_secs: 120,
            build_timeout_secs: 3_600,
        }
    }
}

impl RagConfig {
    /// Loads defaults, then `file` (or `rag.toml` when present), then the environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(RagConfig::default()));

        match file {
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => {
                let default_file = Path::new(DEFAULT_CONFIG_FILE);
                if default_file.exists() {
                    figment = figment.merge(Toml::file(default_file));
                }
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: RagConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking
            .validate()
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;

        let retrieval = &self.retrieval;
        if retrieval.k == 0 {
            return Err(ConfigError::Invalid("retrieval.k must be positive".to_string()));
        }
        if retrieval.fetch_k < retrieval.k {
            return Err(ConfigError::Invalid(format!(
                "retrieval.fetch_k {} must be >= k {}",
                retrieval.fetch_k, retrieval.k
            )));
        }
        if !(0.0..=1.0).contains(&retrieval.mmr_lambda) {
            return Err(ConfigError::Invalid(format!(
                "retrieval.mmr_lambda {} must be within [0, 1]",
                retrieval.mmr_lambda
            )));
        }
        if self.index.batch_size == 0 {
            return Err(ConfigError::Invalid("index.batch_size must be positive".to_string()));
        }
        if self.index.build_workers == 0 {
            return Err(ConfigError::Invalid(
                "index.build_workers must be positive".to_string(),
            ));
        }
        if self.stage_timeout_secs == 0
            || self.build_timeout_secs == 0
            || self.llm.request_timeout_secs == 0
        {
            return Err(ConfigError::Invalid("timeouts must be positive".to_string()));
        }
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Invalid(
                "embedding.dimensions must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn collection_dir(&self, partition: Partition) -> PathBuf {
        self.persist_dir
            .join(&self.partitions.get(partition).collection)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionSpec {
    /// Collection name; also the index directory name.
    pub collection: String,
    pub source_file: PathBuf,
}

/// Lookup table from every [`Partition`] to its collection and source file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PartitionRegistry {
    pub developer: PartitionSpec,
    pub documentation: PartitionSpec,
}

impl Default for PartitionRegistry {
    fn default() -> Self {
        Self {
            developer: PartitionSpec {
                collection: "atlan_developer".to_string(),
                source_file: PathBuf::from("knowledge_base/atlan_developer.json"),
            },
            documentation: PartitionSpec {
                collection: "atlan_documentation".to_string(),
                source_file: PathBuf::from("knowledge_base/atlan_documentation.json"),
            },
        }
    }
}

impl PartitionRegistry {
    pub fn get(&self, partition: Partition) -> &PartitionSpec {
        match partition {
            Partition::Developer => &self.developer,
            Partition::Documentation => &self.documentation,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub k: usize,
    pub fetch_k: usize,
    pub mmr_lambda: f32,
    /// Candidates below this cosine similarity never reach the synthesizer.
    pub min_similarity: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        let options = SearchOptions::default();
        Self {
            k: options.k,
            fetch_k: options.fetch_k,
            mmr_lambda: options.mmr_lambda,
            min_similarity: options.min_similarity,
        }
    }
}

impl From<RetrievalConfig> for SearchOptions {
    fn from(value: RetrievalConfig) -> Self {
        Self {
            k: value.k,
            fetch_k: value.fetch_k,
            mmr_lambda: value.mmr_lambda,
            min_similarity: value.min_similarity,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexConfig {
    pub batch_size: usize,
    pub build_workers: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            batch_size: 1_000,
            build_workers: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Takes precedence over `api_key_env`.
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub temperature: Option<f32>,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash-lite".to_string(),
            api_key: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
            temperature: Some(0.2),
            request_timeout_secs: 60,
            connect_timeout_secs: 10,
        }
    }
}

impl LlmConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Local hashed character trigrams; no network.
    Ngram,
    Gemini,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Ngram,
            model: "text-embedding-004".to_string(),
            dimensions: crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let config = RagConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.retrieval.k, 4);
        assert_eq!(config.retrieval.fetch_k, 75);
        assert_eq!(config.index.batch_size, 1_000);
        assert!(config.build_timeout() > config.stage_timeout());
        assert_eq!(
            config.collection_dir(Partition::Developer),
            PathBuf::from("./vector_store/atlan_developer")
        );
    }

    #[test]
    fn toml_file_overrides_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("rag.toml");
        fs::write(
            &path,
            r#"
persist_dir = "/var/lib/rag"

[retrieval]
k = 5
fetch_k = 40

[partitions.documentation]
collection = "docs"
source_file = "kb/docs.json"
"#,
        )?;

        let config = RagConfig::load(Some(&path))?;
        assert_eq!(config.persist_dir, PathBuf::from("/var/lib/rag"));
        assert_eq!(config.retrieval.k, 5);
        assert_eq!(config.retrieval.fetch_k, 40);
        assert_eq!(config.retrieval.mmr_lambda, 0.5);
        assert_eq!(config.partitions.get(Partition::Documentation).collection, "docs");
        assert_eq!(
            config.partitions.get(Partition::Developer).collection,
            "atlan_developer"
        );
        Ok(())
    }

    #[test]
    fn validation_rejects_fetch_k_below_k() {
        let mut config = RagConfig::default();
        config.retrieval.k = 10;
        config.retrieval.fetch_k = 5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = RagConfig::default();
        config.retrieval.mmr_lambda = 1.5;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.chunking.overlap = config.chunking.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_api_key_wins_over_environment() {
        let config = LlmConfig {
            api_key: Some("inline-key".to_string()),
            api_key_env: "RAG_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..LlmConfig::default()
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("inline-key"));

        let missing = LlmConfig {
            api_key: None,
            api_key_env: "RAG_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..LlmConfig::default()
        };
        assert_eq!(missing.resolve_api_key(), None);
    }
}
