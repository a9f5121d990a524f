use crate::error::SynthesisError;
use crate::llm::TextGenerator;
use crate::models::RetrievedPassage;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Shown whenever the knowledge base cannot answer. Dashboards match on this
/// exact text, so it must not change.
pub const FALLBACK_MESSAGE: &str = "I don't have an answer to that right now. Your ticket is recorded and will be sent to the appropriate team.";

const FALLBACK_MARKER: &str = "ticket is recorded and will be sent to the appropriate team";

const URL_PATTERN: &str = r#"https?://[^\s<>()\[\]"'`]+"#;

pub fn build_context(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .map(|passage| format!("Source: {}\nContent: {}", passage.source_url, passage.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn synthesis_prompt(query: &str, context: &str) -> String {
    format!(
        "You are a customer support assistant. Answer the user's query using only the information below, \
but never mention context, documentation, or technical sources in the answer. No greetings: give the answer directly. \
ALWAYS include the relevant source URLs as citations.

Query: {query}

Context:
{context}

- If the information fully answers the query, give a concise, friendly response with citations.
- Only cite URLs that appear after \"Source:\" above.
- If it does not, reply with exactly: \"{FALLBACK_MESSAGE}\""
    )
}

/// Produces grounded, cited answers from retrieved passages.
pub struct AnswerSynthesizer {
    generator: Arc<dyn TextGenerator>,
    url_pattern: Regex,
}

impl AnswerSynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Result<Self, SynthesisError> {
        Ok(Self {
            generator,
            url_pattern: Regex::new(URL_PATTERN)?,
        })
    }

    pub async fn synthesize(
        &self,
        query: &str,
        passages: &[RetrievedPassage],
    ) -> Result<String, SynthesisError> {
        if passages.is_empty() {
            debug!("no passages retrieved, returning fallback");
            return Ok(FALLBACK_MESSAGE.to_string());
        }

        let context = build_context(passages);
        let raw = self
            .generator
            .generate(&synthesis_prompt(query, &context))
            .await?;
        self.enforce_citations(&raw, passages)
    }

    /// Drops citations to URLs outside `passages` and makes sure a real
    /// answer cites at least one of them.
    pub fn enforce_citations(
        &self,
        raw: &str,
        passages: &[RetrievedPassage],
    ) -> Result<String, SynthesisError> {
        let answer = raw.trim();
        if answer.is_empty() {
            return Err(SynthesisError::EmptyResponse);
        }
        if answer.to_lowercase().contains(FALLBACK_MARKER) {
            return Ok(FALLBACK_MESSAGE.to_string());
        }

        let mut allowed: Vec<&str> = Vec::new();
        for passage in passages {
            if !allowed.contains(&passage.source_url.as_str()) {
                allowed.push(&passage.source_url);
            }
        }

        let mut cleaned = String::with_capacity(answer.len());
        let mut cursor = 0usize;
        let mut cited = false;

        for found in self.url_pattern.find_iter(answer) {
            let url = found
                .as_str()
                .trim_end_matches(|c: char| {
                    matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | '*' | '_' | '~')
                });
            let url_end = found.start() + url.len();

            if allowed.iter().any(|candidate| same_url(candidate, url)) {
                cited = true;
                continue;
            }

            warn!(url, "dropping citation outside the retrieved passages");
            let (mut start, mut end) = (found.start(), url_end);
            // take the enclosing parens of "(url)" and "[label](url)" too
            if answer[..start].ends_with('(') && answer[end..].starts_with(')') {
                start -= 1;
                end += 1;
            }
            cleaned.push_str(&answer[cursor..start]);
            cursor = end;
        }
        cleaned.push_str(&answer[cursor..]);

        let mut cleaned = cleaned.trim().to_string();
        if cleaned.is_empty() {
            return Err(SynthesisError::EmptyResponse);
        }

        if !cited {
            cleaned.push_str("\n\nSources:");
            for url in &allowed {
                cleaned.push_str("\n- ");
                cleaned.push_str(url);
            }
        }

        Ok(cleaned)
    }
}

fn same_url(left: &str, right: &str) -> bool {
    left.trim_end_matches('/') == right.trim_end_matches('/')
}
