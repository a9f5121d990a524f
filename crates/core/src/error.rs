use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::models::Partition;

#[derive(Debug, Error)]
pub enum SourceDataError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed source json in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("source file {0} holds no usable documents")]
    Empty(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedding count {got} doesn't match input count {expected}")]
    CountMismatch { expected: usize, got: usize },

    #[error("missing api key (set {0})")]
    MissingApiKey(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index for collection {0} has not been built")]
    NotFound(String),

    #[error("embedding model mismatch: index built with {indexed}, query embedder is {configured}")]
    EmbeddingMismatch { indexed: String, configured: String },

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt index {collection}: {details}")]
    Corrupt { collection: String, details: String },
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} returned status {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("could not parse model response: {0}")]
    ResponseParse(String),

    #[error("missing api key (set {0})")]
    MissingApiKey(String),

    #[error("model call timed out after {0}s")]
    Timeout(u64),
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("language model failed: {0}")]
    Llm(#[from] LlmError),

    #[error("language model returned an empty answer")]
    EmptyResponse,

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("source data for {partition}: {source}")]
    Source {
        partition: Partition,
        #[source]
        source: SourceDataError,
    },

    #[error("index write for {partition}: {source}")]
    Index {
        partition: Partition,
        #[source]
        source: IndexError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config load failed: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failures while wiring a pipeline from configuration.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("embedder setup failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("language model setup failed: {0}")]
    Llm(#[from] LlmError),

    #[error("synthesizer setup failed: {0}")]
    Synthesis(#[from] SynthesisError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Building,
    Routing,
    Retrieving,
    Synthesizing,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Building => "building",
            PipelineStage::Routing => "routing",
            PipelineStage::Retrieving => "retrieving",
            PipelineStage::Synthesizing => "synthesizing",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("query is empty")]
    EmptyQuery,

    #[error("{stage} stage timed out after {}ms", limit.as_millis())]
    Timeout { stage: PipelineStage, limit: Duration },

    #[error("building failed: {0}")]
    Build(#[from] BuildError),

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] IndexError),

    #[error("synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),
}

impl PipelineError {
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineError::EmptyQuery => PipelineStage::Routing,
            PipelineError::Timeout { stage, .. } => *stage,
            PipelineError::Build(_) => PipelineStage::Building,
            PipelineError::Retrieval(_) => PipelineStage::Retrieving,
            PipelineError::Synthesis(_) => PipelineStage::Synthesizing,
        }
    }
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
