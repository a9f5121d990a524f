use crate::chunking::{chunk_document, ChunkingConfig};
use crate::config::{PartitionRegistry, RagConfig};
use crate::error::{BuildError, SourceDataError};
use crate::ingest::{load_source_file, resolvable_url};
use crate::models::{Partition, Passage};
use crate::traits::PartitionIndexes;
use futures::stream::{self, StreamExt};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The partition was already built; nothing was embedded.
    AlreadyBuilt,
    Built { documents: usize, passages: usize },
}

#[derive(Debug)]
pub struct PartitionBuild {
    pub partition: Partition,
    pub result: Result<BuildOutcome, BuildError>,
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub partitions: Vec<PartitionBuild>,
}

impl BuildReport {
    pub fn failures(&self) -> impl Iterator<Item = (Partition, &BuildError)> {
        self.partitions.iter().filter_map(|build| {
            build
                .result
                .as_ref()
                .err()
                .map(|error| (build.partition, error))
        })
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn take(&mut self, partition: Partition) -> Option<Result<BuildOutcome, BuildError>> {
        let position = self
            .partitions
            .iter()
            .position(|build| build.partition == partition)?;
        Some(self.partitions.remove(position).result)
    }
}

/// Populates partition indexes from their source files, once.
///
/// `build` is cheap when the index already exists, so it is safe to call on
/// every pipeline run. Builds of one partition through the same builder are
/// serialized; builds from separate processes are not coordinated.
pub struct IndexBuilder {
    indexes: PartitionIndexes,
    registry: PartitionRegistry,
    chunking: ChunkingConfig,
    workers: usize,
    developer_lock: Mutex<()>,
    documentation_lock: Mutex<()>,
}

impl IndexBuilder {
    pub fn new(
        indexes: PartitionIndexes,
        registry: PartitionRegistry,
        chunking: ChunkingConfig,
        workers: usize,
    ) -> Self {
        Self {
            indexes,
            registry,
            chunking,
            workers: workers.max(1),
            developer_lock: Mutex::new(()),
            documentation_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &RagConfig, indexes: PartitionIndexes) -> Self {
        Self::new(
            indexes,
            config.partitions.clone(),
            config.chunking,
            config.index.build_workers,
        )
    }

    fn lock_for(&self, partition: Partition) -> &Mutex<()> {
        match partition {
            Partition::Developer => &self.developer_lock,
            Partition::Documentation => &self.documentation_lock,
        }
    }

    pub async fn build(&self, partition: Partition) -> Result<BuildOutcome, BuildError> {
        let _building = self.lock_for(partition).lock().await;
        let index = self.indexes.get(partition);
        let exists = index
            .exists()
            .await
            .map_err(|source| BuildError::Index { partition, source })?;
        if exists {
            debug!(
                partition = %partition,
                collection = index.collection(),
                "index exists, skipping build"
            );
            return Ok(BuildOutcome::AlreadyBuilt);
        }

        let source_file = &self.registry.get(partition).source_file;
        let PreparedSource {
            documents,
            passages,
            checksum,
        } = prepare_passages(partition, source_file, self.chunking)
            .map_err(|source| BuildError::Source { partition, source })?;

        index
            .upsert(&passages, Some(checksum))
            .await
            .map_err(|source| BuildError::Index { partition, source })?;

        info!(
            partition = %partition,
            collection = index.collection(),
            documents,
            passages = passages.len(),
            "indexed partition"
        );
        Ok(BuildOutcome::Built {
            documents,
            passages: passages.len(),
        })
    }

    /// Builds every partition with at most `workers` in flight. One
    /// partition failing does not stop the others.
    pub async fn build_all(&self) -> BuildReport {
        let mut partitions = stream::iter(Partition::ALL)
            .map(|partition| async move {
                PartitionBuild {
                    partition,
                    result: self.build(partition).await,
                }
            })
            .buffer_unordered(self.workers)
            .collect::<Vec<_>>()
            .await;
        partitions.sort_by_key(|build| build.partition);

        let report = BuildReport { partitions };
        for (partition, error) in report.failures() {
            warn!(partition = %partition, error = %error, "partition build failed");
        }
        report
    }
}

/// Chunked contents of one source file.
#[derive(Debug)]
pub struct PreparedSource {
    /// Records that produced at least one passage.
    pub documents: usize,
    pub passages: Vec<Passage>,
    /// SHA-256 of the bytes the passages were cut from.
    pub checksum: String,
}

/// Loads and chunks a source file.
pub fn prepare_passages(
    partition: Partition,
    source_file: &Path,
    chunking: ChunkingConfig,
) -> Result<PreparedSource, SourceDataError> {
    let source = load_source_file(source_file)?;
    let mut used_documents = 0usize;
    let mut passages = Vec::new();

    for document in &source.documents {
        let body = document.body();
        if body.trim().is_empty() {
            continue;
        }
        let Some(url) = resolvable_url(document) else {
            continue;
        };

        let chunks = chunk_document(url, body, partition, chunking)?;
        if !chunks.is_empty() {
            used_documents += 1;
            passages.extend(chunks);
        }
    }

    if passages.is_empty() {
        return Err(SourceDataError::Empty(source_file.display().to_string()));
    }

    debug!(
        partition = %partition,
        records = source.documents.len(),
        documents = used_documents,
        passages = passages.len(),
        "chunked source file"
    );
    Ok(PreparedSource {
        documents: used_documents,
        passages,
        checksum: source.checksum,
    })
}
