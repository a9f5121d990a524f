use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Knowledge-base partition a query is routed to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Developer,
    Documentation,
}

impl Partition {
    pub const ALL: [Partition; 2] = [Partition::Developer, Partition::Documentation];

    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Developer => "developer",
            Partition::Documentation => "documentation",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partition {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "developer" => Ok(Partition::Developer),
            "documentation" => Ok(Partition::Documentation),
            other => Err(format!("unknown partition: {other}")),
        }
    }
}

/// One record of a knowledge-base source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceDocument {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl SourceDocument {
    pub fn new(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            content: Some(content.into()),
            text: None,
        }
    }

    /// `content` wins over `text`; empty strings fall through.
    pub fn body(&self) -> &str {
        self.content
            .as_deref()
            .filter(|content| !content.is_empty())
            .or(self.text.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Passage {
    pub id: String,
    pub text: String,
    pub source_url: String,
    pub partition: Partition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub similarity: f32,
}

/// What the synthesizer sees of a retrieved passage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrievedPassage {
    pub text: String,
    pub source_url: String,
}

impl From<ScoredPassage> for RetrievedPassage {
    fn from(value: ScoredPassage) -> Self {
        Self {
            text: value.passage.text,
            source_url: value.passage.source_url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    pub collection: String,
    pub partition: Partition,
    pub embedding_model: String,
    pub dimensions: usize,
    pub passage_count: usize,
    pub source_checksum: Option<String>,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    pub k: usize,
    pub fetch_k: usize,
    pub mmr_lambda: f32,
    pub min_similarity: Option<f32>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            k: 4,
            fetch_k: 75,
            mmr_lambda: 0.5,
            min_similarity: None,
        }
    }
}
