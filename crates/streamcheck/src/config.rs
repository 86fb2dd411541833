use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;

use crate::{ProbeError, proxy::ProxyConfig};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Options controlling how candidates are probed
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Number of concurrent probe workers
    pub concurrency: usize,

    /// Time allowed to establish a connection
    pub connect_timeout: Duration,

    /// Upper bound for a single sample read or manifest fetch
    pub sample_timeout: Duration,

    /// Minimum sustained throughput for a `Live` verdict (kilobits per second)
    pub min_speed_kbps: f64,

    /// Maximum time to first body byte for a `Live` verdict
    pub max_ttfb: Duration,

    /// Bytes to read before the sample is considered complete
    pub sample_bytes: u64,

    /// Bytes excluded from the throughput window to hide connection setup
    pub warmup_bytes: u64,

    /// Maximum manifest nesting before a candidate is declared dead
    pub max_manifest_depth: u32,

    /// Extra attempts after a retryable failure
    pub retries: u32,

    /// Pause between attempts
    pub retry_delay: Duration,

    /// Optional deadline for the whole batch. Probes still queued or running
    /// when it expires are reported dead.
    pub batch_deadline: Option<Duration>,

    /// Minimum variant height preferred when picking from a master playlist
    pub min_variant_height: Option<u64>,

    /// Minimum variant bandwidth (bits/s) preferred when picking from a master playlist
    pub min_variant_bandwidth: Option<u64>,

    /// Largest manifest body that will be read
    pub manifest_max_bytes: usize,

    /// Issue a HEAD request before sampling
    pub head_precheck: bool,

    /// Gate later candidates of a host on the first verdict for that host
    pub host_gate: bool,

    /// User agent used when a candidate does not carry its own
    pub user_agent: String,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// Proxy configuration (optional)
    pub proxy: Option<ProxyConfig>,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,

    pub danger_accept_invalid_certs: bool,

    /// Maximum idle connections to keep per host
    pub pool_max_idle_per_host: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            concurrency: 50,
            connect_timeout: Duration::from_secs(5),
            sample_timeout: Duration::from_secs(8),
            min_speed_kbps: 500.0,
            max_ttfb: Duration::from_secs(3),
            sample_bytes: 256 * 1024,
            warmup_bytes: 16 * 1024,
            max_manifest_depth: 3,
            retries: 0,
            retry_delay: Duration::from_millis(500),
            batch_deadline: None,
            min_variant_height: Some(1080),
            min_variant_bandwidth: None,
            manifest_max_bytes: 1024 * 1024,
            head_precheck: false,
            host_gate: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            follow_redirects: true,
            proxy: None,
            use_system_proxy: true,
            danger_accept_invalid_certs: false,
            pool_max_idle_per_host: 4,
        }
    }
}

impl ProbeConfig {
    /// Rejects combinations that would make every verdict meaningless.
    pub fn validate(&self) -> Result<(), ProbeError> {
        if self.concurrency == 0 {
            return Err(ProbeError::Configuration {
                reason: "concurrency must be at least 1".to_string(),
            });
        }
        if self.sample_bytes == 0 {
            return Err(ProbeError::Configuration {
                reason: "sample_bytes must be greater than zero".to_string(),
            });
        }
        if self.warmup_bytes >= self.sample_bytes {
            return Err(ProbeError::Configuration {
                reason: format!(
                    "warmup_bytes ({}) must be smaller than sample_bytes ({})",
                    self.warmup_bytes, self.sample_bytes
                ),
            });
        }
        if self.sample_timeout.is_zero() {
            return Err(ProbeError::Configuration {
                reason: "sample_timeout must be greater than zero".to_string(),
            });
        }
        if !self.min_speed_kbps.is_finite() || self.min_speed_kbps < 0.0 {
            return Err(ProbeError::Configuration {
                reason: format!("min_speed_kbps must be a non-negative number, got {}", self.min_speed_kbps),
            });
        }
        Ok(())
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        default_headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );

        // Compressed transfer would distort the throughput figure.
        default_headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("identity"),
        );
        default_headers
    }
}

/// Ordering of members inside a group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum SortOrder {
    /// Normalized title, then URL
    #[default]
    Title,
    /// Fastest time to first byte first
    Latency,
    /// Highest measured throughput first
    Throughput,
}

/// A title keyword and the group it maps to
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroupRule {
    pub keyword: String,
    pub group: String,
}

impl GroupRule {
    pub fn new(keyword: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            group: group.into(),
        }
    }
}

/// Options for grouping, filtering and ordering the surviving entries
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Keyword table, first match wins
    pub group_keywords: Vec<GroupRule>,

    /// Group for titles nothing else matched
    pub default_group: String,

    /// Use a leading `[Label]` in the title as group
    pub bracket_groups: bool,

    pub sort_order: SortOrder,

    /// Keep reachable entries that missed the speed/latency bar
    pub keep_too_slow: bool,

    /// Keep reachable entries whose throughput could not be measured
    pub keep_unknown: bool,

    /// Rewrite `tvg-chno` sequentially starting at this number
    pub number_channels: Option<u32>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            group_keywords: Vec::new(),
            default_group: "Live".to_owned(),
            bracket_groups: true,
            sort_order: SortOrder::default(),
            keep_too_slow: false,
            keep_unknown: false,
            number_channels: None,
        }
    }
}
