// Manifest resolver: follows HLS master/media playlists down to a media URL.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use m3u8_rs::{MasterPlaylist, MediaPlaylist, VariantStream, parse_playlist_res};
use reqwest::Client;
use reqwest::header::HeaderMap;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use super::sampler::starts_with_playlist_marker;
use crate::ProbeError;
use crate::config::ProbeConfig;
use crate::retry::{RetryPolicy, retry_with_backoff};

/// The media URL a candidate resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub url: Url,
    /// Manifests fetched on the way; 0 when the candidate URL is the media itself
    pub depth: u32,
}

enum Hop {
    /// A master playlist pointed at another playlist
    Variant(Url),
    /// A media playlist pointed at its first segment
    Segment(Url),
}

pub struct ManifestResolver {
    client: Client,
    config: Arc<ProbeConfig>,
    retry: RetryPolicy,
}

impl ManifestResolver {
    pub fn new(client: Client, config: Arc<ProbeConfig>) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            client,
            config,
            retry,
        }
    }

    /// Resolves `url`, fetching it only when its path names a playlist.
    pub async fn resolve(
        &self,
        url: &Url,
        headers: &HeaderMap,
        token: &CancellationToken,
    ) -> Result<ResolvedTarget, ProbeError> {
        self.resolve_from(url, headers, 0, false, token).await
    }

    /// Resolves `url` as a playlist regardless of what its path looks like.
    pub async fn resolve_manifest(
        &self,
        url: &Url,
        headers: &HeaderMap,
        token: &CancellationToken,
    ) -> Result<ResolvedTarget, ProbeError> {
        self.resolve_from(url, headers, 0, true, token).await
    }

    /// Walks the manifest chain starting at `depth`.
    ///
    /// Terminates on every input: each hop either raises the depth, which is
    /// bounded by `max_manifest_depth`, or returns. URLs already on the chain
    /// are rejected before they are fetched again.
    pub async fn resolve_from(
        &self,
        url: &Url,
        headers: &HeaderMap,
        depth: u32,
        force_manifest: bool,
        token: &CancellationToken,
    ) -> Result<ResolvedTarget, ProbeError> {
        let max_depth = self.config.max_manifest_depth;
        let mut chain: Vec<Url> = Vec::new();
        let mut current = url.clone();
        let mut depth = depth;
        let mut is_manifest = force_manifest || is_manifest_url(&current);

        loop {
            if depth > max_depth {
                return Err(ProbeError::DepthExceeded {
                    url: current.to_string(),
                    max_depth,
                });
            }
            if !is_manifest {
                return Ok(ResolvedTarget {
                    url: current,
                    depth,
                });
            }
            if chain.contains(&current) {
                return Err(ProbeError::ManifestCycle {
                    url: current.to_string(),
                });
            }
            chain.push(current.clone());

            let (base, body) = self.fetch_manifest(&current, headers, token).await?;
            match self.next_hop(&base, &body)? {
                Hop::Variant(next) => {
                    trace!(from = %current, to = %next, depth, "Following variant playlist");
                    current = next;
                    depth += 1;
                    // Whatever a master lists is a playlist, extension or not.
                    is_manifest = true;
                }
                Hop::Segment(segment) => {
                    trace!(from = %current, to = %segment, depth, "Resolved media segment");
                    return Ok(ResolvedTarget {
                        url: segment,
                        depth: depth + 1,
                    });
                }
            }
        }
    }

    async fn fetch_manifest(
        &self,
        url: &Url,
        headers: &HeaderMap,
        token: &CancellationToken,
    ) -> Result<(Url, Bytes), ProbeError> {
        retry_with_backoff(&self.retry, token, |_| self.fetch_manifest_once(url, headers)).await
    }

    /// Returns the final URL after redirects, which is the base for relative URIs.
    async fn fetch_manifest_once(
        &self,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<(Url, Bytes), ProbeError> {
        let deadline = Instant::now() + self.config.sample_timeout;
        let request = self.client.get(url.clone()).headers(headers.clone());
        let response = timeout_at(deadline, request.send())
            .await
            .map_err(|_| ProbeError::timeout(format!("manifest {url} got no response")))??;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::http_status(status, url.as_str(), "manifest fetch"));
        }

        let base = response.url().clone();
        let limit = self.config.manifest_max_bytes;
        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        loop {
            let chunk = match timeout_at(deadline, stream.next()).await {
                Err(_) => return Err(ProbeError::timeout(format!("manifest {url} body too slow"))),
                Ok(None) => break,
                Ok(Some(chunk)) => chunk?,
            };
            if body.len() + chunk.len() > limit {
                return Err(ProbeError::manifest(
                    url.as_str(),
                    format!("body exceeds {limit} bytes"),
                ));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url = %url, bytes = body.len(), "Fetched manifest");
        Ok((base, body.freeze()))
    }

    fn next_hop(&self, base: &Url, body: &[u8]) -> Result<Hop, ProbeError> {
        if !starts_with_playlist_marker(body) {
            return Err(ProbeError::manifest(base.as_str(), "missing #EXTM3U marker"));
        }
        let body = body.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(body);
        let start = body
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(body.len());

        match parse_playlist_res(&body[start..]) {
            Ok(m3u8_rs::Playlist::MasterPlaylist(master)) => {
                let uri = self.pick_variant(&master, base)?;
                join_uri(base, uri).map(Hop::Variant)
            }
            Ok(m3u8_rs::Playlist::MediaPlaylist(media)) => {
                let uri = first_segment(&media)
                    .ok_or_else(|| ProbeError::manifest(base.as_str(), "media playlist has no segments"))?;
                join_uri(base, uri).map(Hop::Segment)
            }
            Err(e) => Err(ProbeError::manifest(
                base.as_str(),
                format!("failed to parse playlist: {e}"),
            )),
        }
    }

    fn pick_variant<'a>(&self, master: &'a MasterPlaylist, base: &Url) -> Result<&'a str, ProbeError> {
        let playable: Vec<&VariantStream> = master
            .variants
            .iter()
            .filter(|v| !v.is_i_frame && !v.uri.trim().is_empty())
            .collect();

        let chosen = playable
            .iter()
            .find(|v| {
                meets_floor(
                    v,
                    self.config.min_variant_height,
                    self.config.min_variant_bandwidth,
                )
            })
            .or_else(|| playable.first())
            .copied()
            .ok_or_else(|| ProbeError::manifest(base.as_str(), "master playlist has no variants"))?;

        debug!(
            master = %base,
            variant = %chosen.uri,
            bandwidth = chosen.bandwidth,
            height = ?chosen.resolution.map(|r| r.height),
            "Selected variant"
        );
        Ok(chosen.uri.trim())
    }
}

/// A URL names a playlist when its path ends in `.m3u8` or `.m3u`.
pub(crate) fn is_manifest_url(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    path.ends_with(".m3u8") || path.ends_with(".m3u")
}

fn meets_floor(variant: &VariantStream, min_height: Option<u64>, min_bandwidth: Option<u64>) -> bool {
    let height_ok = min_height.is_none_or(|min| variant.resolution.is_some_and(|r| r.height >= min));
    let bandwidth_ok = min_bandwidth.is_none_or(|min| variant.bandwidth >= min);
    height_ok && bandwidth_ok
}

fn first_segment(media: &MediaPlaylist) -> Option<&str> {
    media
        .segments
        .iter()
        .map(|s| s.uri.trim())
        .find(|uri| !uri.is_empty())
}

fn join_uri(base: &Url, uri: &str) -> Result<Url, ProbeError> {
    base.join(uri)
        .map_err(|e| ProbeError::manifest(base.as_str(), format!("cannot join `{uri}`: {e}")))
}
