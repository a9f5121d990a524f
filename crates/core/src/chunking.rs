use crate::error::SourceDataError;
use crate::models::{Partition, Passage};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use uuid::Uuid;

/// Break points in order of preference: paragraph, line, sentence, word.
const BOUNDARY_TIERS: [&[&str]; 4] = [&["\n\n"], &["\n"], &[". ", "? ", "! "], &[" "]];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum window length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive windows.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), SourceDataError> {
        if self.chunk_size == 0 {
            return Err(SourceDataError::InvalidChunkConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(SourceDataError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk_size {}",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Splits `content` into overlapping byte ranges.
///
/// Windows hold at most `chunk_size` characters. Each window is cut at the
/// rightmost boundary of the most preferred tier found inside it, falling
/// back to a hard cut. A boundary only counts if it leaves more than
/// `overlap` characters in the window, so the next window always advances.
pub fn split_spans(
    content: &str,
    config: ChunkingConfig,
) -> Result<Vec<Range<usize>>, SourceDataError> {
    config.validate()?;

    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let offsets: Vec<usize> = content
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(content.len()))
        .collect();
    let total_chars = offsets.len() - 1;

    let mut spans = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + config.chunk_size).min(total_chars);
        if end == total_chars {
            spans.push(offsets[start]..offsets[end]);
            break;
        }

        let floor = start + config.overlap + 1;
        let cut = find_boundary(content, &offsets, start, floor, end).unwrap_or(end);
        spans.push(offsets[start]..offsets[cut]);
        start = cut - config.overlap;
    }

    Ok(spans)
}

fn find_boundary(
    content: &str,
    offsets: &[usize],
    start: usize,
    floor: usize,
    end: usize,
) -> Option<usize> {
    let base = offsets[start];
    let window = &content[base..offsets[end]];
    let min_byte = offsets[floor];

    for tier in BOUNDARY_TIERS {
        let best = tier
            .iter()
            .filter_map(|separator| {
                window
                    .rfind(separator)
                    .map(|position| base + position + separator.len())
            })
            .filter(|cut| *cut >= min_byte)
            .max();

        if let Some(cut_byte) = best {
            // separators are ASCII, so the cut always lands on a char boundary
            if let Ok(cut) = offsets.binary_search(&cut_byte) {
                return Some(cut);
            }
        }
    }

    None
}

/// Chunks one source document into passages of `partition`.
pub fn chunk_document(
    url: &str,
    content: &str,
    partition: Partition,
    config: ChunkingConfig,
) -> Result<Vec<Passage>, SourceDataError> {
    let passages = split_spans(content, config)?
        .into_iter()
        .filter_map(|span| {
            let text = content[span].trim();
            if text.is_empty() {
                return None;
            }

            Some(Passage {
                id: Uuid::new_v4().to_string(),
                text: text.to_string(),
                source_url: url.to_string(),
                partition,
            })
        })
        .collect();

    Ok(passages)
}
