use crate::error::IndexError;
use crate::models::{IndexManifest, Partition, Passage, ScoredPassage, SearchOptions};
use async_trait::async_trait;
use std::sync::Arc;

/// Persisted vector index for a single partition.
///
/// A partition is either fully built or reported as absent: `upsert` is
/// all-or-nothing from a reader's point of view. Two processes building the
/// same partition at once are not coordinated; callers serialize builds.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn collection(&self) -> &str;

    /// True once a committed generation holds at least one passage.
    async fn exists(&self) -> Result<bool, IndexError>;

    async fn manifest(&self) -> Result<Option<IndexManifest>, IndexError>;

    /// Embeds and commits `passages`. `source_checksum` is recorded in the
    /// manifest for provenance.
    async fn upsert(
        &self,
        passages: &[Passage],
        source_checksum: Option<String>,
    ) -> Result<(), IndexError>;

    /// Nearest `fetch_k` by cosine similarity, narrowed to `k` with MMR.
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<ScoredPassage>, IndexError>;
}

/// One index handle per partition.
#[derive(Clone)]
pub struct PartitionIndexes {
    pub developer: Arc<dyn VectorIndex>,
    pub documentation: Arc<dyn VectorIndex>,
}

impl PartitionIndexes {
    pub fn get(&self, partition: Partition) -> &Arc<dyn VectorIndex> {
        match partition {
            Partition::Developer => &self.developer,
            Partition::Documentation => &self.documentation,
        }
    }
}
