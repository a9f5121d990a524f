use crate::builder::IndexBuilder;
use crate::config::RagConfig;
use crate::embeddings::embedder_from_config;
use crate::error::{IndexError, PipelineError, PipelineStage, SetupError};
use crate::llm::{GeminiClient, TextGenerator};
use crate::models::{Partition, RetrievedPassage, SearchOptions};
use crate::router::QueryRouter;
use crate::synthesizer::AnswerSynthesizer;
use crate::traits::PartitionIndexes;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// End-to-end answering: build, route, retrieve, synthesize.
///
/// Routing, retrieval and synthesis run under `stage_timeout`; building a
/// missing index runs under the longer `build_timeout`. Failures never escape
/// [`SupportPipeline::answer`]; callers that need the reason use
/// [`SupportPipeline::run`].
pub struct SupportPipeline {
    indexes: PartitionIndexes,
    builder: IndexBuilder,
    router: QueryRouter,
    synthesizer: AnswerSynthesizer,
    search: SearchOptions,
    stage_timeout: Duration,
    build_timeout: Duration,
}

impl SupportPipeline {
    pub fn new(
        config: &RagConfig,
        indexes: PartitionIndexes,
        generator: Arc<dyn TextGenerator>,
    ) -> Result<Self, SetupError> {
        config.validate()?;
        Ok(Self {
            builder: IndexBuilder::from_config(config, indexes.clone()),
            indexes,
            router: QueryRouter::new(generator.clone()),
            synthesizer: AnswerSynthesizer::new(generator)?,
            search: config.retrieval.into(),
            stage_timeout: config.stage_timeout(),
            build_timeout: config.build_timeout(),
        })
    }

    /// Wires the configured embedder, Gemini client and local stores.
    pub fn from_config(config: &RagConfig) -> Result<Self, SetupError> {
        let embedder = embedder_from_config(&config.llm, &config.embedding)?;
        let generator: Arc<dyn TextGenerator> = Arc::new(GeminiClient::new(&config.llm)?);
        Self::new(config, PartitionIndexes::local(config, embedder), generator)
    }

    pub fn with_stage_timeout(mut self, stage_timeout: Duration) -> Self {
        self.stage_timeout = stage_timeout;
        self
    }

    pub fn with_build_timeout(mut self, build_timeout: Duration) -> Self {
        self.build_timeout = build_timeout;
        self
    }

    pub fn indexes(&self) -> &PartitionIndexes {
        &self.indexes
    }

    pub fn builder(&self) -> &IndexBuilder {
        &self.builder
    }

    pub fn router(&self) -> &QueryRouter {
        &self.router
    }

    pub fn search_options(&self) -> &SearchOptions {
        &self.search
    }

    /// Answer text, the fallback message, or `None` when any stage failed.
    pub async fn answer(&self, query: &str) -> Option<String> {
        match self.run(query).await {
            Ok(answer) => Some(answer),
            Err(PipelineError::EmptyQuery) => {
                debug!("ignoring blank query");
                None
            }
            Err(failure) => {
                error!(
                    stage = %PipelineStage::Failed,
                    failed_stage = %failure.stage(),
                    error = %failure,
                    "pipeline failed"
                );
                None
            }
        }
    }

    pub async fn run(&self, query: &str) -> Result<String, PipelineError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PipelineError::EmptyQuery);
        }
        let started = Instant::now();

        enter(PipelineStage::Building);
        // per-partition failures are logged by the builder and only matter
        // if the routed partition is still missing at retrieval time
        self.within(
            PipelineStage::Building,
            self.build_timeout,
            self.builder.build_all(),
        )
        .await?;

        enter(PipelineStage::Routing);
        let partition = match timeout(self.stage_timeout, self.router.classify(query)).await {
            Ok(partition) => partition,
            Err(_) => {
                warn!(
                    limit_ms = self.stage_timeout.as_millis() as u64,
                    "classification timed out, defaulting to documentation"
                );
                Partition::Documentation
            }
        };

        enter(PipelineStage::Retrieving);
        let passages = self.retrieve(partition, query).await?;
        debug!(partition = %partition, passages = passages.len(), "retrieved passages");

        enter(PipelineStage::Synthesizing);
        let answer = self
            .within(
                PipelineStage::Synthesizing,
                self.stage_timeout,
                self.synthesizer.synthesize(query, &passages),
            )
            .await??;

        info!(
            stage = %PipelineStage::Done,
            partition = %partition,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "answered query"
        );
        Ok(answer)
    }

    /// Searches one partition, building it once if it is missing. The
    /// searches count against `stage_timeout`, the build against
    /// `build_timeout`.
    async fn retrieve(
        &self,
        partition: Partition,
        query: &str,
    ) -> Result<Vec<RetrievedPassage>, PipelineError> {
        let index = self.indexes.get(partition);
        let search = || {
            self.within(
                PipelineStage::Retrieving,
                self.stage_timeout,
                index.search(query, &self.search),
            )
        };

        let hits = match search().await? {
            Err(IndexError::NotFound(collection)) => {
                warn!(
                    partition = %partition,
                    collection = %collection,
                    "index missing, building before retry"
                );
                self.within(
                    PipelineStage::Building,
                    self.build_timeout,
                    self.builder.build(partition),
                )
                .await??;
                search().await??
            }
            other => other?,
        };
        Ok(hits.into_iter().map(RetrievedPassage::from).collect())
    }

    async fn within<F>(
        &self,
        stage: PipelineStage,
        limit: Duration,
        future: F,
    ) -> Result<F::Output, PipelineError>
    where
        F: Future,
    {
        timeout(limit, future)
            .await
            .map_err(|_| PipelineError::Timeout { stage, limit })
    }
}

fn enter(stage: PipelineStage) {
    debug!(stage = %stage, "pipeline stage");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PartitionRegistry, PartitionSpec};
    use crate::embeddings::Embedder;
    use crate::error::{BuildError, LlmError, SynthesisError};
    use crate::synthesizer::FALLBACK_MESSAGE;
    use crate::testing::{ScriptedEmbedder, ScriptedGenerator};
    use async_trait::async_trait;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    const DEVELOPER: &str = r#"[
        {"url": "https://developer.example.com/sdk", "content": "Install the Python SDK with pip install pyatlan and set the API token."}
    ]"#;
    const DOCUMENTATION: &str = r#"[
        {"url": "https://docs.example.com/sso", "content": "Enable SSO from Admin > SSO and upload the SAML metadata from your identity provider."},
        {"url": "https://docs.example.com/lineage", "content": "Lineage shows how assets flow between systems."}
    ]"#;

    struct Fixture {
        _dir: TempDir,
        config: RagConfig,
        embedder: Arc<ScriptedEmbedder>,
    }

    impl Fixture {
        fn new(developer: Option<&str>) -> Self {
            let dir = tempdir().unwrap();
            let developer_file = dir.path().join("developer.json");
            let documentation_file = dir.path().join("documentation.json");
            if let Some(raw) = developer {
                fs::write(&developer_file, raw).unwrap();
            }
            fs::write(&documentation_file, DOCUMENTATION).unwrap();

            let config = RagConfig {
                persist_dir: dir.path().join("store"),
                partitions: PartitionRegistry {
                    developer: PartitionSpec {
                        collection: "dev".to_string(),
                        source_file: developer_file,
                    },
                    documentation: PartitionSpec {
                        collection: "docs".to_string(),
                        source_file: documentation_file,
                    },
                },
                ..RagConfig::default()
            };

            Self {
                _dir: dir,
                config,
                embedder: Arc::new(ScriptedEmbedder::new(None)),
            }
        }

        fn indexes(&self) -> PartitionIndexes {
            let embedder: Arc<dyn Embedder> = self.embedder.clone();
            PartitionIndexes::local(&self.config, embedder)
        }

        fn pipeline(&self, generator: Arc<dyn TextGenerator>) -> SupportPipeline {
            SupportPipeline::new(&self.config, self.indexes(), generator).unwrap()
        }
    }

    /// Routes instantly, then never finishes a synthesis call.
    struct StalledSynthesis;

    #[async_trait]
    impl TextGenerator for StalledSynthesis {
        async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
            if prompt.contains("Answer with one word") {
                return Ok("documentation".to_string());
            }
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("too late".to_string())
        }
    }

    #[tokio::test]
    async fn blank_query_makes_no_model_calls() {
        let fixture = Fixture::new(Some(DEVELOPER));
        let generator = Arc::new(ScriptedGenerator::replying("developer"));
        let pipeline = fixture.pipeline(generator.clone());

        assert_eq!(pipeline.answer("   ").await, None);
        assert!(generator.prompts().is_empty());
        assert_eq!(fixture.embedder.calls(), 0);
    }

    #[tokio::test]
    async fn answers_from_the_routed_partition_only() {
        let fixture = Fixture::new(Some(DEVELOPER));
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("developer".to_string()),
            Ok("Run pip install pyatlan (https://developer.example.com/sdk).".to_string()),
        ]));
        let pipeline = fixture.pipeline(generator.clone());

        let answer = pipeline.answer("How do I install the Python SDK?").await.unwrap();
        assert!(answer.contains("https://developer.example.com/sdk"));

        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("Source: https://developer.example.com/sdk"));
        assert!(!prompts[1].contains("docs.example.com"));
    }

    #[tokio::test]
    async fn empty_synthesis_is_a_failure_at_synthesizing() {
        let fixture = Fixture::new(Some(DEVELOPER));
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("documentation".to_string()),
            Ok("".to_string()),
        ]));
        let pipeline = fixture.pipeline(generator);

        let failure = pipeline.run("How do I connect via SSO?").await.unwrap_err();
        assert_eq!(failure.stage(), PipelineStage::Synthesizing);
        assert!(matches!(
            failure,
            PipelineError::Synthesis(SynthesisError::EmptyResponse)
        ));
    }

    #[tokio::test]
    async fn router_failure_falls_back_to_documentation() {
        let fixture = Fixture::new(Some(DEVELOPER));
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Err(LlmError::Timeout(60)),
            Ok("Sorry. Your ticket is recorded and will be sent to the appropriate team.".to_string()),
        ]));
        let pipeline = fixture.pipeline(generator.clone());

        let answer = pipeline.answer("What is the refund policy?").await;
        assert_eq!(answer.as_deref(), Some(FALLBACK_MESSAGE));
        assert!(generator.prompts()[1].contains("docs.example.com"));
    }

    #[tokio::test]
    async fn unbuildable_routed_partition_fails_the_query() {
        let fixture = Fixture::new(None);
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("developer".to_string()),
            Ok("unused".to_string()),
        ]));
        let pipeline = fixture.pipeline(generator.clone());

        let failure = pipeline.run("Why does the SDK raise a 401?").await.unwrap_err();
        assert!(matches!(failure, PipelineError::Build(BuildError::Source { .. })));
        // synthesis never ran
        assert_eq!(generator.prompts().len(), 1);
        assert!(fixture.config.collection_dir(Partition::Documentation).exists());
    }

    #[tokio::test]
    async fn missing_index_is_built_on_first_search() {
        let fixture = Fixture::new(Some(DEVELOPER));
        let pipeline = fixture.pipeline(Arc::new(ScriptedGenerator::new(Vec::new())));
        assert!(!pipeline.indexes().documentation.exists().await.unwrap());

        let passages = pipeline
            .retrieve(Partition::Documentation, "How do I connect via SSO?")
            .await
            .unwrap();
        assert!(!passages.is_empty());
        assert!(passages
            .iter()
            .all(|passage| passage.source_url.starts_with("https://docs.example.com/")));
        assert!(pipeline.indexes().documentation.exists().await.unwrap());
    }

    #[tokio::test]
    async fn stalled_synthesis_times_out() {
        let fixture = Fixture::new(Some(DEVELOPER));
        let pipeline = fixture
            .pipeline(Arc::new(StalledSynthesis))
            .with_stage_timeout(Duration::from_millis(500));
        pipeline.builder().build_all().await;

        let failure = pipeline.run("How do I connect via SSO?").await.unwrap_err();
        assert!(matches!(
            failure,
            PipelineError::Timeout {
                stage: PipelineStage::Synthesizing,
                ..
            }
        ));
        assert_eq!(pipeline.answer("How do I connect via SSO?").await, None);
    }

    fn hidden_entries(dir: &std::path::Path) -> usize {
        fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.file_name().to_string_lossy().starts_with('.'))
                    .count()
            })
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn builds_may_outlast_the_stage_timeout() {
        let mut fixture = Fixture::new(Some(DEVELOPER));
        fixture.embedder = Arc::new(ScriptedEmbedder::slow(Duration::from_millis(300)));
        fixture.config.index.batch_size = 1;
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("documentation".to_string()),
            Ok("Upload the SAML metadata (https://docs.example.com/sso).".to_string()),
        ]));
        // two documentation batches take longer than one stage
        let pipeline = fixture
            .pipeline(generator)
            .with_stage_timeout(Duration::from_millis(500));

        let answer = pipeline.run("How do I connect via SSO?").await.unwrap();
        assert!(answer.contains("https://docs.example.com/sso"));
        assert!(pipeline.indexes().documentation.exists().await.unwrap());
    }

    #[tokio::test]
    async fn expired_builds_leave_no_staging_behind() {
        let mut fixture = Fixture::new(Some(DEVELOPER));
        fixture.embedder = Arc::new(ScriptedEmbedder::slow(Duration::from_millis(300)));
        fixture.config.index.batch_size = 1;
        let pipeline = fixture
            .pipeline(Arc::new(ScriptedGenerator::new(Vec::new())))
            .with_build_timeout(Duration::from_millis(100));

        for _ in 0..3 {
            let failure = pipeline.run("How do I connect via SSO?").await.unwrap_err();
            assert!(matches!(
                failure,
                PipelineError::Timeout {
                    stage: PipelineStage::Building,
                    ..
                }
            ));
            assert!(failure.to_string().contains("100ms"), "{failure}");
            assert_eq!(hidden_entries(&fixture.config.persist_dir), 0);
        }
    }
}
