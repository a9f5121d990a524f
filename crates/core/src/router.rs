use crate::error::LlmError;
use crate::llm::TextGenerator;
use crate::models::Partition;
use std::sync::Arc;
use tracing::{debug, warn};

fn routing_prompt(query: &str) -> String {
    format!(
        "Given the user query, decide whether it should be answered using the developer knowledge base \
(technical API / SDK / code-focused content) or the documentation knowledge base (user guides, best practices, feature overviews).
If the query involves implementation details, dev errors, or code usage, choose developer.
If it involves product usage, configuration, or administrative guidance, choose documentation.
Query: {query}
Answer with one word: developer, documentation."
    )
}

/// Lenient label normalization: anything mentioning "dev" is developer,
/// everything else falls back to the broader documentation partition.
pub fn normalize_label(raw: &str) -> Partition {
    if raw.trim().to_lowercase().contains("dev") {
        Partition::Developer
    } else {
        Partition::Documentation
    }
}

/// Picks the knowledge-base partition for a query with a single model call.
pub struct QueryRouter {
    generator: Arc<dyn TextGenerator>,
}

impl QueryRouter {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn try_classify(&self, query: &str) -> Result<Partition, LlmError> {
        let raw = self.generator.generate(&routing_prompt(query)).await?;
        let partition = normalize_label(&raw);
        debug!(raw = raw.trim(), partition = %partition, "classified query");
        Ok(partition)
    }

    /// Never fails: a model error routes to [`Partition::Documentation`].
    pub async fn classify(&self, query: &str) -> Partition {
        match self.try_classify(query).await {
            Ok(partition) => partition,
            Err(error) => {
                warn!(error = %error, "classification failed, defaulting to documentation");
                Partition::Documentation
            }
        }
    }
}
