pub mod builder;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod rerank;
pub mod router;
pub mod stores;
pub mod synthesizer;
pub mod traits;

#[cfg(test)]
mod testing;

pub use builder::{
    prepare_passages, BuildOutcome, BuildReport, IndexBuilder, PartitionBuild, PreparedSource,
};
pub use chunking::{chunk_document, split_spans, ChunkingConfig};
pub use config::{
    EmbeddingBackend, EmbeddingConfig, IndexConfig, LlmConfig, PartitionRegistry, PartitionSpec,
    RagConfig, RetrievalConfig,
};
pub use embeddings::{
    embedder_from_config, CharacterNgramEmbedder, Embedder, GeminiEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    BuildError, ConfigError, EmbeddingError, IndexError, LlmError, PipelineError, PipelineStage,
    SetupError, SourceDataError, SynthesisError,
};
pub use ingest::{load_source_documents, load_source_file, parse_source_documents, SourceFile};
pub use llm::{GeminiClient, TextGenerator};
pub use models::{
    IndexManifest, Partition, Passage, RetrievedPassage, ScoredPassage, SearchOptions,
    SourceDocument,
};
pub use pipeline::SupportPipeline;
pub use rerank::{cosine_similarity, mmr_select};
pub use router::QueryRouter;
pub use stores::LocalVectorStore;
pub use synthesizer::{AnswerSynthesizer, FALLBACK_MESSAGE};
pub use traits::{PartitionIndexes, VectorIndex};
