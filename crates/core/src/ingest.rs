use crate::error::SourceDataError;
use crate::models::SourceDocument;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::warn;
use url::Url;

/// A source file holds either one record or an array of records.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<SourceDocument>),
    One(SourceDocument),
}

/// A parsed source file together with the SHA-256 of the exact bytes parsed.
#[derive(Debug)]
pub struct SourceFile {
    pub documents: Vec<SourceDocument>,
    pub checksum: String,
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn parse_source_documents(
    raw: &str,
    origin: &str,
) -> Result<Vec<SourceDocument>, SourceDataError> {
    parse_source_bytes(raw.as_bytes(), origin)
}

fn parse_source_bytes(raw: &[u8], origin: &str) -> Result<Vec<SourceDocument>, SourceDataError> {
    let parsed: OneOrMany = serde_json::from_slice(raw).map_err(|source| SourceDataError::Json {
        path: origin.to_string(),
        source,
    })?;

    Ok(match parsed {
        OneOrMany::Many(documents) => documents,
        OneOrMany::One(document) => vec![document],
    })
}

/// Reads `path` once, then parses and fingerprints the same buffer.
pub fn load_source_file(path: &Path) -> Result<SourceFile, SourceDataError> {
    let origin = path.display().to_string();
    let bytes = fs::read(path).map_err(|source| SourceDataError::Io {
        path: origin.clone(),
        source,
    })?;

    Ok(SourceFile {
        checksum: digest_bytes(&bytes),
        documents: parse_source_bytes(&bytes, &origin)?,
    })
}

pub fn load_source_documents(path: &Path) -> Result<Vec<SourceDocument>, SourceDataError> {
    Ok(load_source_file(path)?.documents)
}

/// Returns the record's url when it is an absolute http(s) url.
pub fn resolvable_url(document: &SourceDocument) -> Option<&str> {
    let Some(raw) = document.url.as_deref().map(str::trim) else {
        warn!("skipping record without a url");
        return None;
    };
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(raw),
        Ok(_) | Err(_) => {
            warn!(url = raw, "skipping record without a resolvable url");
            None
        }
    }
}
