use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use streamcheck_engine::{PlaylistDocument, playlist};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::error::{AppError, Result};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a playlist comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    Url(String),
    File(String),
}

impl InputSource {
    pub fn parse(input: &str) -> Self {
        let lowered = input.to_ascii_lowercase();
        if input == "-" {
            Self::Stdin
        } else if lowered.starts_with("http://") || lowered.starts_with("https://") {
            Self::Url(input.to_owned())
        } else {
            Self::File(input.to_owned())
        }
    }
}

/// Reads every input and merges them into one document.
///
/// Candidates keep their input order across files; the first non-empty
/// `#EXTM3U` header is kept.
pub async fn load_inputs(inputs: &[String], client: &Client) -> Result<PlaylistDocument> {
    let sources: Vec<InputSource> = inputs.iter().map(|i| InputSource::parse(i)).collect();
    if sources.iter().filter(|s| **s == InputSource::Stdin).count() > 1 {
        return Err(AppError::InvalidInput(
            "stdin (`-`) can only be read once".to_string(),
        ));
    }

    let mut merged = PlaylistDocument::default();
    for (input, source) in inputs.iter().zip(&sources) {
        let text = read_source(source, client).await?;
        let document = playlist::parse_document_at(&text, merged.candidates.len())
            .map_err(|e| AppError::InvalidInput(format!("{input}: {e}")))?;

        info!(input = %input, candidates = document.candidates.len(), "Loaded playlist");
        if document.candidates.is_empty() {
            warn!(input = %input, "Playlist has no entries");
        }
        if merged.header.attributes.is_empty() {
            merged.header = document.header;
        }
        merged.candidates.extend(document.candidates);
    }
    Ok(merged)
}

async fn read_source(source: &InputSource, client: &Client) -> Result<String> {
    match source {
        InputSource::Stdin => {
            let mut text = String::new();
            tokio::io::stdin().read_to_string(&mut text).await?;
            Ok(text)
        }
        InputSource::Url(url) => {
            let response = client
                .get(url)
                .timeout(FETCH_TIMEOUT)
                .send()
                .await?
                .error_for_status()?;
            Ok(response.text().await?)
        }
        InputSource::File(path) => read_file(Path::new(path)).await,
    }
}

async fn read_file(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| AppError::InvalidInput(format!("cannot read {}: {e}", path.display())))?;
    // Playlists in the wild are not always valid UTF-8.
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
