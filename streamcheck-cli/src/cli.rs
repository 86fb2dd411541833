use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use streamcheck_engine::{ProxyType, SortOrder};

use crate::config::{parse_duration, parse_size};

/// Verify the entries of M3U playlists and keep the ones that stream.
#[derive(Parser, Debug)]
#[command(name = "streamcheck", author, version, about, long_about = None)]
pub struct Args {
    /// Playlist files, `-` for stdin, or HTTP(S) URLs of playlists
    #[arg(required = true, value_name = "INPUT")]
    pub inputs: Vec<String>,

    /// Write the verified playlist here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Write a JSON report with every verdict
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long, env = "STREAMCHECK_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of concurrent probes
    #[arg(short = 'j', long, env = "STREAMCHECK_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Connection timeout (e.g. 5s, 500ms)
    #[arg(long, value_parser = parse_duration)]
    pub connect_timeout: Option<Duration>,

    /// Time limit for one sample or manifest fetch
    #[arg(long, value_parser = parse_duration)]
    pub sample_timeout: Option<Duration>,

    /// Minimum throughput for a live verdict, in kbps
    #[arg(long, value_name = "KBPS")]
    pub min_speed: Option<f64>,

    /// Maximum time to first byte for a live verdict
    #[arg(long, value_parser = parse_duration)]
    pub max_ttfb: Option<Duration>,

    /// Bytes to sample per stream (e.g. 256KB, 1MB)
    #[arg(long, value_parser = parse_size)]
    pub sample_size: Option<u64>,

    /// Bytes excluded from the throughput measurement
    #[arg(long, value_parser = parse_size)]
    pub warmup_size: Option<u64>,

    /// Maximum manifest nesting depth
    #[arg(long)]
    pub max_depth: Option<u32>,

    /// Retries after a transient failure
    #[arg(long)]
    pub retries: Option<u32>,

    /// Pause between retries
    #[arg(long, value_parser = parse_duration)]
    pub retry_delay: Option<Duration>,

    /// Give up on the whole batch after this long
    #[arg(long, value_parser = parse_duration)]
    pub deadline: Option<Duration>,

    /// Preferred minimum variant height in master playlists
    #[arg(long)]
    pub min_height: Option<u64>,

    /// Preferred minimum variant bandwidth (bits/s) in master playlists
    #[arg(long)]
    pub min_bandwidth: Option<u64>,

    /// Send a HEAD request before sampling
    #[arg(long)]
    pub head_precheck: bool,

    /// Probe every entry even when its host already failed
    #[arg(long)]
    pub no_host_gate: bool,

    /// Default User-Agent
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Proxy URL for all probe traffic
    #[arg(long, env = "STREAMCHECK_PROXY")]
    pub proxy: Option<String>,

    #[arg(long, value_enum, default_value_t = ProxyType::Http)]
    pub proxy_type: ProxyType,

    #[arg(long, requires = "proxy")]
    pub proxy_username: Option<String>,

    #[arg(long, requires = "proxy")]
    pub proxy_password: Option<String>,

    /// Ignore system proxy settings
    #[arg(long)]
    pub no_system_proxy: bool,

    /// Accept invalid TLS certificates
    #[arg(long)]
    pub insecure: bool,

    /// Title keyword to group mapping, `keyword=Group` (repeatable)
    #[arg(short = 'g', long = "group", value_name = "KEYWORD=GROUP")]
    pub groups: Vec<String>,

    /// Group for entries nothing else matched
    #[arg(long)]
    pub default_group: Option<String>,

    /// Do not derive groups from a leading `[Label]` in titles
    #[arg(long)]
    pub no_bracket_groups: bool,

    /// Order of entries inside each group
    #[arg(long, value_enum)]
    pub sort: Option<SortOrder>,

    /// Keep reachable entries below the speed bar
    #[arg(long)]
    pub keep_too_slow: bool,

    /// Keep reachable entries whose speed could not be measured
    #[arg(long)]
    pub keep_unknown: bool,

    /// Renumber channels (tvg-chno) from this number
    #[arg(long, value_name = "START")]
    pub number_from: Option<u32>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Verbose logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}
