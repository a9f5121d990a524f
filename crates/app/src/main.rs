use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use support_rag_core::{
    embedder_from_config, BuildOutcome, IndexBuilder, Partition, PartitionIndexes, RagConfig,
    SearchOptions, SupportPipeline, FALLBACK_MESSAGE,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "support-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML config file (defaults to ./rag.toml when present)
    #[arg(long, env = "RAG_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Override the index directory
    #[arg(long)]
    persist_dir: Option<PathBuf>,

    /// Override the per-stage timeout in seconds
    #[arg(long)]
    stage_timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Build every partition index that does not exist yet.
    Build,
    /// Show the manifest of each partition index.
    Status,
    /// Print the partition a query would be routed to.
    Classify {
        #[arg(long)]
        query: String,
    },
    /// Retrieve passages from one partition without calling the model.
    Search {
        #[arg(long)]
        query: String,
        /// developer or documentation
        #[arg(long, default_value = "documentation")]
        partition: Partition,
        /// Number of passages to return.
        #[arg(long)]
        k: Option<usize>,
    },
    /// Answer a query end to end.
    Ask {
        #[arg(long)]
        query: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = RagConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(persist_dir) = cli.persist_dir {
        config.persist_dir = persist_dir;
    }
    if let Some(seconds) = cli.stage_timeout_secs {
        config.stage_timeout_secs = seconds;
    }
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        persist_dir = %config.persist_dir.display(),
        "support-rag boot"
    );

    match cli.command {
        Command::Build => {
            let indexes = local_indexes(&config)?;
            let report = IndexBuilder::from_config(&config, indexes).build_all().await;
            for build in &report.partitions {
                match &build.result {
                    Ok(BuildOutcome::AlreadyBuilt) => {
                        println!("{}: already built", build.partition)
                    }
                    Ok(BuildOutcome::Built {
                        documents,
                        passages,
                    }) => println!(
                        "{}: indexed {passages} passages from {documents} documents",
                        build.partition
                    ),
                    Err(error) => println!("{}: failed: {error}", build.partition),
                }
            }
            if !report.is_success() {
                anyhow::bail!("one or more partitions failed to build");
            }
        }
        Command::Status => {
            let indexes = local_indexes(&config)?;
            for partition in Partition::ALL {
                let index = indexes.get(partition);
                match index.manifest().await? {
                    Some(manifest) => println!(
                        "{partition}: collection={} passages={} model={} dimensions={} built_at={}",
                        manifest.collection,
                        manifest.passage_count,
                        manifest.embedding_model,
                        manifest.dimensions,
                        manifest.built_at.to_rfc3339()
                    ),
                    None => println!("{partition}: collection={} not built", index.collection()),
                }
            }
        }
        Command::Classify { query } => {
            let pipeline = SupportPipeline::from_config(&config)?;
            let partition = pipeline.router().try_classify(&query).await?;
            println!("{partition}");
        }
        Command::Search {
            query,
            partition,
            k,
        } => {
            let indexes = local_indexes(&config)?;
            let mut options = SearchOptions::from(config.retrieval);
            if let Some(k) = k {
                options.k = k;
                options.fetch_k = options.fetch_k.max(k);
            }

            let hits = indexes.get(partition).search(&query, &options).await?;
            println!("query: {query}");
            for (rank, hit) in hits.iter().enumerate() {
                println!(
                    "[{}] similarity={:.4} source={}",
                    rank + 1,
                    hit.similarity,
                    hit.passage.source_url
                );
                println!("  {}", hit.passage.text);
            }
        }
        Command::Ask { query } => {
            let pipeline = SupportPipeline::from_config(&config)?;
            match pipeline.answer(&query).await {
                Some(answer) => {
                    if answer == FALLBACK_MESSAGE {
                        warn!("no grounded answer, ticket left for the support team");
                    }
                    println!("{answer}");
                }
                None => anyhow::bail!("no answer could be produced, see logs for the failed stage"),
            }
        }
    }

    Ok(())
}

fn local_indexes(config: &RagConfig) -> anyhow::Result<PartitionIndexes> {
    let embedder = embedder_from_config(&config.llm, &config.embedding)?;
    Ok(PartitionIndexes::local(config, embedder))
}
