use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{Client, StatusCode};
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use super::ProbeVerdict;
use crate::ProbeError;
use crate::config::ProbeConfig;
use crate::retry::{RetryPolicy, retry_with_backoff};

const SNIFF_LEN: usize = 32;

/// Why the sample stopped reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEnd {
    /// `sample_bytes` were read
    Complete,
    /// The server closed the body first
    Eof,
    /// `sample_timeout` expired mid-body
    Deadline,
}

/// Raw measurements of one bounded read
#[derive(Debug, Clone)]
pub struct SampleReport {
    pub ttfb: Duration,
    pub bytes: u64,
    /// `None` when the body ended before the warm-up window was passed
    pub throughput_kbps: Option<f64>,
    pub end: SampleEnd,
    pub content_type: Option<String>,
    /// Leading bytes of the body
    pub head: Vec<u8>,
}

impl SampleReport {
    /// Whether the body is a playlist even though the URL did not say so.
    pub fn looks_like_manifest(&self) -> bool {
        let by_type = self.content_type.as_deref().is_some_and(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("mpegurl") || ct.contains("x-mpegurl")
        });
        by_type || starts_with_playlist_marker(&self.head)
    }
}

pub(crate) fn starts_with_playlist_marker(body: &[u8]) -> bool {
    let body = body.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(body);
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    body[start..].starts_with(b"#EXTM3U")
}

/// Reads a bounded prefix of a media URL and judges its speed
pub struct ThroughputSampler {
    client: Client,
    config: Arc<ProbeConfig>,
    retry: RetryPolicy,
}

impl ThroughputSampler {
    pub fn new(client: Client, config: Arc<ProbeConfig>) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            client,
            config,
            retry,
        }
    }

    /// Samples `url` and returns the verdict the measurements earn.
    pub async fn sample(&self, url: &Url, headers: &HeaderMap) -> ProbeVerdict {
        match self.measure(url, headers, &CancellationToken::new()).await {
            Ok(report) => self.judge(&report),
            Err(e) => {
                debug!(url = %url, error = %e, "Sample failed");
                ProbeVerdict::dead(e.failure_kind())
            }
        }
    }

    /// Runs the optional HEAD check and the sampled GET, with retries.
    pub async fn measure(
        &self,
        url: &Url,
        headers: &HeaderMap,
        token: &CancellationToken,
    ) -> Result<SampleReport, ProbeError> {
        if self.config.head_precheck {
            retry_with_backoff(&self.retry, token, |_| self.head_check(url, headers)).await?;
        }
        retry_with_backoff(&self.retry, token, |attempt| async move {
            if attempt > 0 {
                debug!(url = %url, attempt, "Retrying sample");
            }
            self.read_sample(url, headers).await
        })
        .await
    }

    /// Turns measurements into a verdict using the configured thresholds.
    pub fn judge(&self, report: &SampleReport) -> ProbeVerdict {
        let slow_start = report.ttfb > self.config.max_ttfb;
        match report.throughput_kbps {
            None if slow_start => ProbeVerdict::too_slow(report.ttfb, None),
            None => ProbeVerdict::unknown(report.ttfb),
            Some(kbps) if slow_start || kbps < self.config.min_speed_kbps => {
                ProbeVerdict::too_slow(report.ttfb, Some(kbps))
            }
            Some(kbps) => ProbeVerdict::live(report.ttfb, kbps),
        }
    }

    async fn head_check(&self, url: &Url, headers: &HeaderMap) -> Result<(), ProbeError> {
        let request = self.client.head(url.clone()).headers(headers.clone());
        let response = tokio::time::timeout(self.config.sample_timeout, request.send())
            .await
            .map_err(|_| ProbeError::timeout(format!("HEAD {url} got no response")))??;

        let status = response.status();
        // Plenty of media servers refuse HEAD but serve GET fine.
        if matches!(status, StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED) {
            trace!(url = %url, %status, "HEAD not supported, continuing with GET");
            return Ok(());
        }
        if !status.is_success() {
            return Err(ProbeError::http_status(status, url.as_str(), "head check"));
        }
        Ok(())
    }

    async fn read_sample(&self, url: &Url, headers: &HeaderMap) -> Result<SampleReport, ProbeError> {
        let started = Instant::now();
        let deadline = started + self.config.sample_timeout;

        let request = self.client.get(url.clone()).headers(headers.clone());
        let response = timeout_at(deadline, request.send())
            .await
            .map_err(|_| {
                ProbeError::timeout(format!(
                    "no response from {url} within {:?}",
                    self.config.sample_timeout
                ))
            })??;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::http_status(status, url.as_str(), "sample"));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let mut stream = response.bytes_stream();
        let mut total: u64 = 0;
        let mut first_byte_at: Option<Instant> = None;
        let mut warmed_at: Option<(Instant, u64)> = None;
        let mut last_at = started;
        let mut head = Vec::with_capacity(SNIFF_LEN);

        let end = loop {
            let chunk = match timeout_at(deadline, stream.next()).await {
                Err(_) => break SampleEnd::Deadline,
                Ok(None) => break SampleEnd::Eof,
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(Some(Ok(chunk))) => chunk,
            };
            if chunk.is_empty() {
                continue;
            }

            let now = Instant::now();
            first_byte_at.get_or_insert(now);
            if head.len() < SNIFF_LEN {
                let take = (SNIFF_LEN - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..take]);
            }

            total += chunk.len() as u64;
            last_at = now;
            if warmed_at.is_none() && total >= self.config.warmup_bytes {
                warmed_at = Some((now, total));
            }
            if total >= self.config.sample_bytes {
                break SampleEnd::Complete;
            }
        };

        let Some(first_byte_at) = first_byte_at else {
            return Err(match end {
                SampleEnd::Deadline => ProbeError::timeout(format!(
                    "no body bytes from {url} within {:?}",
                    self.config.sample_timeout
                )),
                _ => ProbeError::EmptyBody {
                    url: url.to_string(),
                },
            });
        };

        // A stall up to the deadline counts against the rate.
        let stopped_at = match end {
            SampleEnd::Deadline => Instant::now(),
            SampleEnd::Complete | SampleEnd::Eof => last_at,
        };
        let throughput_kbps = match warmed_at {
            Some((at, bytes_at)) if total > bytes_at => Some(kbps(total - bytes_at, stopped_at - at)),
            Some(_) => Some(kbps(total, stopped_at - first_byte_at)),
            // Ran out of time before warming up: whatever arrived is the rate.
            None if end == SampleEnd::Deadline => Some(kbps(total, stopped_at - first_byte_at)),
            None => None,
        };

        let report = SampleReport {
            ttfb: first_byte_at - started,
            bytes: total,
            throughput_kbps,
            end,
            content_type,
            head,
        };
        trace!(
            url = %url,
            bytes = report.bytes,
            ttfb_ms = report.ttfb.as_millis() as u64,
            kbps = ?report.throughput_kbps,
            end = ?report.end,
            "Sample finished"
        );
        Ok(report)
    }
}

fn kbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64().max(0.001);
    bytes as f64 * 8.0 / 1000.0 / secs
}
