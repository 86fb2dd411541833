//! Probing a single candidate: manifest resolution followed by a throughput sample.

mod resolver;
mod sampler;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::client::candidate_headers;
use crate::config::ProbeConfig;
use crate::{Candidate, ProbeError};

pub use resolver::{ManifestResolver, ResolvedTarget};
pub use sampler::{SampleEnd, SampleReport, ThroughputSampler};

/// Final classification of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    /// Delivered bytes fast enough
    Live,
    /// Unreachable or not a stream
    Dead,
    /// Reachable, but below the latency or throughput bar
    TooSlow,
    /// Reachable, the body ended before throughput could be measured
    Unknown,
}

/// Why a candidate did not come back `Live`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Connection,
    Timeout,
    HttpStatus(u16),
    Manifest,
    DepthExceeded,
    ManifestCycle,
    EmptyBody,
    InvalidUrl,
    /// Skipped because an earlier candidate on the same host was dead
    HostGated,
    /// The batch deadline expired before the probe finished
    Deadline,
    /// Reachable, but slower than the configured thresholds
    BelowThreshold,
    Panicked,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => f.write_str("connection"),
            Self::Timeout => f.write_str("timeout"),
            Self::HttpStatus(code) => write!(f, "http_{code}"),
            Self::Manifest => f.write_str("manifest"),
            Self::DepthExceeded => f.write_str("depth_exceeded"),
            Self::ManifestCycle => f.write_str("manifest_cycle"),
            Self::EmptyBody => f.write_str("empty_body"),
            Self::InvalidUrl => f.write_str("invalid_url"),
            Self::HostGated => f.write_str("host_gated"),
            Self::Deadline => f.write_str("deadline"),
            Self::BelowThreshold => f.write_str("below_threshold"),
            Self::Panicked => f.write_str("panicked"),
        }
    }
}

impl Serialize for FailureKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Result of probing one candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeVerdict {
    pub outcome: Outcome,
    /// Time to first body byte; absent for dead candidates
    #[serde(with = "duration_millis", rename = "ttfb_ms")]
    pub ttfb: Option<Duration>,
    /// Measured throughput; absent unless a sample completed
    pub throughput_kbps: Option<f64>,
    /// Manifest hops followed before the sampled URL
    pub resolved_depth: u32,
    pub failure: Option<FailureKind>,
    /// URL that was actually sampled, when it differs from the candidate
    pub resolved_url: Option<String>,
}

impl ProbeVerdict {
    pub fn dead(failure: FailureKind) -> Self {
        Self {
            outcome: Outcome::Dead,
            ttfb: None,
            throughput_kbps: None,
            resolved_depth: 0,
            failure: Some(failure),
            resolved_url: None,
        }
    }

    pub fn live(ttfb: Duration, throughput_kbps: f64) -> Self {
        Self {
            outcome: Outcome::Live,
            ttfb: Some(ttfb),
            throughput_kbps: Some(throughput_kbps),
            resolved_depth: 0,
            failure: None,
            resolved_url: None,
        }
    }

    pub fn too_slow(ttfb: Duration, throughput_kbps: Option<f64>) -> Self {
        Self {
            outcome: Outcome::TooSlow,
            ttfb: Some(ttfb),
            throughput_kbps,
            resolved_depth: 0,
            failure: Some(FailureKind::BelowThreshold),
            resolved_url: None,
        }
    }

    pub fn unknown(ttfb: Duration) -> Self {
        Self {
            outcome: Outcome::Unknown,
            ttfb: Some(ttfb),
            throughput_kbps: None,
            resolved_depth: 0,
            failure: None,
            resolved_url: None,
        }
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.resolved_depth = depth;
        self
    }

    pub fn with_resolved_url(mut self, url: impl Into<String>) -> Self {
        self.resolved_url = Some(url.into());
        self
    }

    /// Anything other than `Dead` proves the host answers.
    pub fn is_reachable(&self) -> bool {
        self.outcome != Outcome::Dead
    }
}

/// A candidate paired with its verdict
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub candidate: Candidate,
    pub verdict: ProbeVerdict,
}

/// Anything able to judge a single candidate.
///
/// Implementations must never panic on bad input and must return promptly
/// once `token` is cancelled.
#[async_trait]
pub trait StreamProber: Send + Sync {
    async fn probe(&self, candidate: &Candidate, token: &CancellationToken) -> ProbeVerdict;
}

/// Probes over HTTP(S): resolve manifests, then sample the media URL
pub struct HttpProber {
    resolver: ManifestResolver,
    sampler: ThroughputSampler,
}

impl HttpProber {
    pub fn new(client: Client, config: Arc<ProbeConfig>) -> Self {
        Self {
            resolver: ManifestResolver::new(client.clone(), config.clone()),
            sampler: ThroughputSampler::new(client, config),
        }
    }

    async fn probe_url(
        &self,
        url: &Url,
        candidate: &Candidate,
        token: &CancellationToken,
    ) -> Result<ProbeVerdict, ProbeError> {
        let headers = candidate_headers(candidate);

        let mut target = self.resolver.resolve(url, &headers, token).await?;
        let mut report = self.sampler.measure(&target.url, &headers, token).await?;

        // The URL gave no hint, but the server answered with a playlist.
        if target.depth == 0 && report.looks_like_manifest() {
            debug!(url = %url, "Response is a playlist, resolving it");
            target = self.resolver.resolve_manifest(url, &headers, token).await?;
            report = self.sampler.measure(&target.url, &headers, token).await?;
        }

        let mut verdict = self.sampler.judge(&report).with_depth(target.depth);
        if target.url != *url {
            verdict = verdict.with_resolved_url(target.url.as_str());
        }
        Ok(verdict)
    }
}

#[async_trait]
impl StreamProber for HttpProber {
    async fn probe(&self, candidate: &Candidate, token: &CancellationToken) -> ProbeVerdict {
        let url = match parse_stream_url(&candidate.url) {
            Ok(url) => url,
            Err(e) => {
                debug!(url = %candidate.url, error = %e, "Skipping candidate with unusable URL");
                return ProbeVerdict::dead(FailureKind::InvalidUrl);
            }
        };

        match self.probe_url(&url, candidate, token).await {
            Ok(verdict) => verdict,
            Err(e) => {
                match &e {
                    ProbeError::DepthExceeded { .. } | ProbeError::ManifestCycle { .. } => {
                        debug!(url = %url, error = %e, "Manifest chain rejected")
                    }
                    _ => debug!(url = %url, error = %e, "Probe failed"),
                }
                ProbeVerdict::dead(e.failure_kind())
            }
        }
    }
}

/// Only absolute HTTP(S) URLs can be probed.
pub fn parse_stream_url(input: &str) -> Result<Url, ProbeError> {
    let url = Url::parse(input.trim()).map_err(|e| ProbeError::invalid_url(input, e.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        "http" | "https" => Err(ProbeError::invalid_url(input, "missing host")),
        other => Err(ProbeError::invalid_url(
            input,
            format!("unsupported scheme `{other}`"),
        )),
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_secs_f64() * 1000.0)),
            None => serializer.serialize_none(),
        }
    }
}
