use crate::config::RagConfig;
use crate::embeddings::Embedder;
use crate::error::{EmbeddingError, IndexError, Result};
use crate::models::{IndexManifest, Partition, Passage, ScoredPassage, SearchOptions};
use crate::rerank::{cosine_similarity, mmr_select};
use crate::traits::{PartitionIndexes, VectorIndex};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};
use uuid::Uuid;

const MANIFEST_FILE: &str = "manifest.json";
const PASSAGES_FILE: &str = "passages.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPassage {
    id: String,
    text: String,
    source_url: String,
    partition: Partition,
    embedding: Vec<f32>,
}

impl StoredPassage {
    fn into_passage(self) -> Passage {
        Passage {
            id: self.id,
            text: self.text,
            source_url: self.source_url,
            partition: self.partition,
        }
    }
}

/// File-backed index for one partition.
///
/// Layout: `<persist_dir>/<collection>/manifest.json` plus
/// `passages.jsonl` (one passage with its embedding per line). A generation
/// is written into a hidden staging directory and renamed into place only
/// after the manifest is on disk, so readers see the old generation or the
/// new one, never a half-written one.
pub struct LocalVectorStore {
    persist_dir: PathBuf,
    collection: String,
    partition: Partition,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl LocalVectorStore {
    pub fn new(
        persist_dir: impl Into<PathBuf>,
        collection: impl Into<String>,
        partition: Partition,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
    ) -> Self {
        Self {
            persist_dir: persist_dir.into(),
            collection: collection.into(),
            partition,
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(
        config: &RagConfig,
        partition: Partition,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self::new(
            config.persist_dir.clone(),
            config.partitions.get(partition).collection.clone(),
            partition,
            embedder,
            config.index.batch_size,
        )
    }

    pub fn collection_dir(&self) -> PathBuf {
        self.persist_dir.join(&self.collection)
    }

    fn sibling_dir(&self, label: &str) -> PathBuf {
        self.persist_dir
            .join(format!(".{}.{}-{}", self.collection, label, Uuid::new_v4()))
    }

    /// Removes staging and retired directories left by an interrupted build
    /// of this collection.
    async fn sweep_stale_siblings(&self) -> Result<()> {
        let prefixes = [
            format!(".{}.staging-", self.collection),
            format!(".{}.retired-", self.collection),
        ];
        let mut entries = fs::read_dir(&self.persist_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !prefixes.iter().any(|prefix| name.starts_with(prefix.as_str())) {
                continue;
            }
            match fs::remove_dir_all(entry.path()).await {
                Ok(()) => debug!(path = %entry.path().display(), "removed stale generation"),
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => return Err(error.into()),
            }
        }
        Ok(())
    }

    async fn read_manifest(&self, dir: &Path) -> Result<Option<IndexManifest>> {
        match fs::read(dir.join(MANIFEST_FILE)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn load_passages(&self, dir: &Path) -> Result<Vec<StoredPassage>> {
        let raw = fs::read_to_string(dir.join(PASSAGES_FILE)).await?;
        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| {
                serde_json::from_str(line).map_err(|error| IndexError::Corrupt {
                    collection: self.collection.clone(),
                    details: format!("{PASSAGES_FILE} line {}: {error}", number + 1),
                })
            })
            .collect()
    }

    fn check_embedding_space(&self, manifest: &IndexManifest) -> Result<()> {
        let configured = self.embedder.model_id();
        if manifest.embedding_model != configured
            || manifest.dimensions != self.embedder.dimensions()
        {
            return Err(IndexError::EmbeddingMismatch {
                indexed: format!("{} ({}d)", manifest.embedding_model, manifest.dimensions),
                configured: format!("{} ({}d)", configured, self.embedder.dimensions()),
            });
        }
        Ok(())
    }

    async fn write_generation(
        &self,
        staging: &Path,
        passages: &[Passage],
        source_checksum: Option<String>,
    ) -> Result<IndexManifest> {
        fs::create_dir_all(staging).await?;
        let file = fs::File::create(staging.join(PASSAGES_FILE)).await?;
        let mut writer = BufWriter::new(file);
        let mut passage_count = 0usize;

        let live_dir = self.collection_dir();
        if let Some(manifest) = self.read_manifest(&live_dir).await? {
            self.check_embedding_space(&manifest)?;
            for stored in self.load_passages(&live_dir).await? {
                write_line(&mut writer, &stored).await?;
                passage_count += 1;
            }
            debug!(
                collection = %self.collection,
                carried = passage_count,
                "carried existing passages"
            );
        }

        let dimensions = self.embedder.dimensions();
        for (batch_index, batch) in passages.chunks(self.batch_size).enumerate() {
            let texts = batch
                .iter()
                .map(|passage| passage.text.clone())
                .collect::<Vec<_>>();
            let embeddings = self.embedder.embed_batch(&texts).await?;

            if embeddings.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    got: embeddings.len(),
                }
                .into());
            }

            for (passage, embedding) in batch.iter().zip(embeddings) {
                if embedding.len() != dimensions {
                    return Err(EmbeddingError::BackendResponse {
                        backend: self.embedder.model_id(),
                        details: format!(
                            "embedding dimension {} != {}",
                            embedding.len(),
                            dimensions
                        ),
                    }
                    .into());
                }

                let stored = StoredPassage {
                    id: passage.id.clone(),
                    text: passage.text.clone(),
                    source_url: passage.source_url.clone(),
                    partition: passage.partition,
                    embedding,
                };
                write_line(&mut writer, &stored).await?;
                passage_count += 1;
            }

            debug!(
                collection = %self.collection,
                batch = batch_index,
                size = batch.len(),
                "embedded batch"
            );
        }

        writer.flush().await?;
        writer.into_inner().sync_all().await?;

        let manifest = IndexManifest {
            collection: self.collection.clone(),
            partition: self.partition,
            embedding_model: self.embedder.model_id(),
            dimensions,
            passage_count,
            source_checksum,
            built_at: Utc::now(),
        };
        fs::write(staging.join(MANIFEST_FILE), serde_json::to_vec_pretty(&manifest)?).await?;

        Ok(manifest)
    }

    async fn commit(&self, staging: &Path) -> Result<()> {
        let live_dir = self.collection_dir();
        let retired = self.sibling_dir("retired");
        let had_live = fs::try_exists(&live_dir).await?;

        if had_live {
            fs::rename(&live_dir, &retired).await?;
        }

        if let Err(error) = fs::rename(staging, &live_dir).await {
            if had_live {
                if let Err(restore) = fs::rename(&retired, &live_dir).await {
                    warn!(
                        collection = %self.collection,
                        error = %restore,
                        "could not restore previous generation"
                    );
                }
            }
            return Err(error.into());
        }

        if had_live {
            if let Err(error) = fs::remove_dir_all(&retired).await {
                warn!(
                    path = %retired.display(),
                    error = %error,
                    "could not remove retired generation"
                );
            }
        }
        Ok(())
    }
}

/// Staging directory that is removed unless the generation was committed,
/// including when the upsert future is dropped mid-write.
struct StagingDir {
    path: PathBuf,
    armed: bool,
}

impl StagingDir {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Drop cannot await; the directory holds one generation at most
        if let Err(error) = std::fs::remove_dir_all(&self.path) {
            if error.kind() != ErrorKind::NotFound {
                warn!(
                    path = %self.path.display(),
                    error = %error,
                    "could not remove staging directory"
                );
            }
        }
    }
}

impl PartitionIndexes {
    /// File-backed indexes for every partition, sharing one embedder.
    pub fn local(config: &RagConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            developer: Arc::new(LocalVectorStore::from_config(
                config,
                Partition::Developer,
                embedder.clone(),
            )),
            documentation: Arc::new(LocalVectorStore::from_config(
                config,
                Partition::Documentation,
                embedder,
            )),
        }
    }
}

async fn write_line<W>(writer: &mut W, stored: &StoredPassage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(stored)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}

#[async_trait]
impl VectorIndex for LocalVectorStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self
            .read_manifest(&self.collection_dir())
            .await?
            .is_some_and(|manifest| manifest.passage_count > 0))
    }

    async fn manifest(&self) -> Result<Option<IndexManifest>> {
        self.read_manifest(&self.collection_dir()).await
    }

    async fn upsert(&self, passages: &[Passage], source_checksum: Option<String>) -> Result<()> {
        if passages.is_empty() {
            return Ok(());
        }

        fs::create_dir_all(&self.persist_dir).await?;
        self.sweep_stale_siblings().await?;
        let staging = StagingDir::new(self.sibling_dir("staging"));

        let manifest = self
            .write_generation(staging.path(), passages, source_checksum)
            .await?;
        self.commit(staging.path()).await?;
        staging.disarm();
        info!(
            collection = %self.collection,
            passages = manifest.passage_count,
            model = %manifest.embedding_model,
            "index committed"
        );
        Ok(())
    }

    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<ScoredPassage>> {
        let live_dir = self.collection_dir();
        let manifest = self
            .read_manifest(&live_dir)
            .await?
            .filter(|manifest| manifest.passage_count > 0)
            .ok_or_else(|| IndexError::NotFound(self.collection.clone()))?;
        self.check_embedding_space(&manifest)?;

        let query_vector = self.embedder.embed_query(query).await?;
        let stored = self.load_passages(&live_dir).await?;

        let mut ranked: Vec<(f32, StoredPassage)> = stored
            .into_iter()
            .map(|passage| (cosine_similarity(&query_vector, &passage.embedding), passage))
            .filter(|(similarity, _)| {
                options
                    .min_similarity
                    .map_or(true, |floor| *similarity >= floor)
            })
            .collect();

        // stable: equal similarities keep insertion order
        ranked.sort_by(|left, right| right.0.total_cmp(&left.0));
        ranked.truncate(options.fetch_k.max(options.k));

        let picks = {
            let vectors: Vec<&[f32]> = ranked
                .iter()
                .map(|(_, passage)| passage.embedding.as_slice())
                .collect();
            mmr_select(&query_vector, &vectors, options.k, options.mmr_lambda)
        };

        let mut slots: Vec<Option<(f32, StoredPassage)>> = ranked.into_iter().map(Some).collect();
        let results = picks
            .into_iter()
            .filter_map(|index| slots.get_mut(index).and_then(Option::take))
            .map(|(similarity, stored)| ScoredPassage {
                passage: stored.into_passage(),
                similarity,
            })
            .collect::<Vec<_>>();

        debug!(
            collection = %self.collection,
            fetched = slots.len(),
            returned = results.len(),
            "mmr search"
        );
        Ok(results)
    }
}
