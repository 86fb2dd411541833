use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use streamcheck_engine::{
    ClassifierConfig, GroupRule, ProbeConfig, ProxyAuth, ProxyConfig, SortOrder,
};
use tracing::debug;

use crate::cli::Args;
use crate::error::{AppError, Result};

/// Settings read from `config.toml`. Every key is optional; flags win.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub probe: ProbeSection,
    pub classify: ClassifySection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeSection {
    pub concurrency: Option<usize>,
    pub connect_timeout: Option<String>,
    pub sample_timeout: Option<String>,
    pub min_speed_kbps: Option<f64>,
    pub max_ttfb: Option<String>,
    pub sample_bytes: Option<u64>,
    pub warmup_bytes: Option<u64>,
    pub max_manifest_depth: Option<u32>,
    pub retries: Option<u32>,
    pub retry_delay: Option<String>,
    pub batch_deadline: Option<String>,
    pub min_variant_height: Option<u64>,
    pub min_variant_bandwidth: Option<u64>,
    pub manifest_max_bytes: Option<usize>,
    pub head_precheck: Option<bool>,
    pub host_gate: Option<bool>,
    pub user_agent: Option<String>,
    pub proxy: Option<ProxyConfig>,
    pub use_system_proxy: Option<bool>,
    pub danger_accept_invalid_certs: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifySection {
    pub groups: Vec<GroupRule>,
    pub default_group: Option<String>,
    pub bracket_groups: Option<bool>,
    pub sort_order: Option<SortOrder>,
    pub keep_too_slow: Option<bool>,
    pub keep_unknown: Option<bool>,
    pub number_channels: Option<u32>,
}

impl AppConfig {
    /// Loads the explicit file, or the default one when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) if path.is_file() => path,
                _ => return Ok(Self::default()),
            },
        };

        debug!(path = %path.display(), "Loading configuration");
        let text = std::fs::read_to_string(&path).map_err(|e| {
            AppError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Defaults, then the file, then flags.
    pub fn probe_config(&self, args: &Args) -> Result<ProbeConfig> {
        let file = &self.probe;
        let mut config = ProbeConfig::default();

        macro_rules! layer {
            ($field:ident, $file:expr, $flag:expr) => {
                if let Some(value) = $flag.or($file) {
                    config.$field = value;
                }
            };
        }

        layer!(concurrency, file.concurrency, args.concurrency);
        layer!(connect_timeout, duration(&file.connect_timeout)?, args.connect_timeout);
        layer!(sample_timeout, duration(&file.sample_timeout)?, args.sample_timeout);
        layer!(min_speed_kbps, file.min_speed_kbps, args.min_speed);
        layer!(max_ttfb, duration(&file.max_ttfb)?, args.max_ttfb);
        layer!(sample_bytes, file.sample_bytes, args.sample_size);
        layer!(warmup_bytes, file.warmup_bytes, args.warmup_size);
        layer!(max_manifest_depth, file.max_manifest_depth, args.max_depth);
        layer!(retries, file.retries, args.retries);
        layer!(retry_delay, duration(&file.retry_delay)?, args.retry_delay);
        layer!(manifest_max_bytes, file.manifest_max_bytes, None::<usize>);
        layer!(user_agent, file.user_agent.clone(), args.user_agent.clone());

        if let Some(deadline) = args.deadline.or(duration(&file.batch_deadline)?) {
            config.batch_deadline = Some(deadline);
        }
        if let Some(height) = args.min_height.or(file.min_variant_height) {
            config.min_variant_height = (height > 0).then_some(height);
        }
        if let Some(bandwidth) = args.min_bandwidth.or(file.min_variant_bandwidth) {
            config.min_variant_bandwidth = (bandwidth > 0).then_some(bandwidth);
        }

        config.head_precheck = args.head_precheck || file.head_precheck.unwrap_or(false);
        config.host_gate = !args.no_host_gate && file.host_gate.unwrap_or(true);
        config.use_system_proxy = !args.no_system_proxy && file.use_system_proxy.unwrap_or(true);
        config.danger_accept_invalid_certs =
            args.insecure || file.danger_accept_invalid_certs.unwrap_or(false);

        config.proxy = match &args.proxy {
            Some(url) => Some(ProxyConfig {
                url: url.clone(),
                proxy_type: args.proxy_type,
                auth: args.proxy_username.as_ref().map(|username| ProxyAuth {
                    username: username.clone(),
                    password: args.proxy_password.clone().unwrap_or_default(),
                }),
            }),
            None => file.proxy.clone(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn classifier_config(&self, args: &Args) -> Result<ClassifierConfig> {
        let file = &self.classify;
        let mut config = ClassifierConfig::default();

        // Flag rules are checked before file rules.
        let mut rules = args
            .groups
            .iter()
            .map(|rule| parse_group_rule(rule))
            .collect::<Result<Vec<_>>>()?;
        rules.extend(file.groups.iter().cloned());
        config.group_keywords = rules;

        if let Some(group) = args.default_group.clone().or(file.default_group.clone()) {
            if group.trim().is_empty() {
                return Err(AppError::Config("default group must not be empty".to_string()));
            }
            config.default_group = group;
        }
        config.bracket_groups = !args.no_bracket_groups && file.bracket_groups.unwrap_or(true);
        if let Some(order) = args.sort.or(file.sort_order) {
            config.sort_order = order;
        }
        config.keep_too_slow = args.keep_too_slow || file.keep_too_slow.unwrap_or(false);
        config.keep_unknown = args.keep_unknown || file.keep_unknown.unwrap_or(false);
        config.number_channels = args.number_from.or(file.number_channels);

        Ok(config)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("streamcheck").join("config.toml"))
}

fn duration(value: &Option<String>) -> Result<Option<Duration>> {
    value
        .as_deref()
        .map(|v| parse_duration(v).map_err(AppError::Config))
        .transpose()
}

fn parse_group_rule(rule: &str) -> Result<GroupRule> {
    match rule.split_once('=') {
        Some((keyword, group)) if !keyword.trim().is_empty() && !group.trim().is_empty() => {
            Ok(GroupRule::new(keyword.trim(), group.trim()))
        }
        _ => Err(AppError::InvalidInput(format!(
            "invalid group rule `{rule}`, expected KEYWORD=GROUP"
        ))),
    }
}

/// Parses `500ms`, `8s`, `2m` or a bare number of seconds.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration `{input}`"))?;
    let seconds = match unit.trim().to_ascii_lowercase().as_str() {
        "ms" => value / 1000.0,
        "" | "s" => value,
        "m" | "min" => value * 60.0,
        "h" => value * 3600.0,
        other => return Err(format!("unknown duration unit `{other}` in `{input}`")),
    };
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("invalid duration `{input}`: {e}"))
}

/// Parses byte sizes such as `16KB`, `1MB` or a bare byte count (binary units).
pub fn parse_size(input: &str) -> std::result::Result<u64, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid size `{input}`"))?;
    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1024,
        "m" | "mb" | "mib" => 1024 * 1024,
        other => return Err(format!("unknown size unit `{other}` in `{input}`")),
    };
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size `{input}` is too large"))
}
