use reqwest::Proxy;
use serde::Deserialize;

use crate::ProbeError;

/// Proxy protocol used for probe traffic
#[derive(Debug, Clone, PartialEq, Eq, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ProxyType {
    /// HTTP proxy
    #[default]
    Http,
    /// HTTPS proxy
    Https,
    /// SOCKS5 proxy
    Socks5,
}

/// Basic credentials for the proxy
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// Proxy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Proxy server URL (e.g., "http://proxy.example.com:8080")
    pub url: String,
    #[serde(default)]
    pub proxy_type: ProxyType,
    #[serde(default)]
    pub auth: Option<ProxyAuth>,
}

/// Build a reqwest Proxy from the probe proxy configuration.
///
/// HTTP and HTTPS proxies only intercept their own scheme; candidate lists mix
/// both, so they are applied to all traffic unless the type says otherwise.
pub fn build_proxy_from_config(config: &ProxyConfig) -> Result<Proxy, ProbeError> {
    let proxy_url = config.url.trim();
    if proxy_url.is_empty() {
        return Err(ProbeError::proxy_configuration("empty proxy URL"));
    }

    let mut proxy = match config.proxy_type {
        ProxyType::Http => Proxy::all(proxy_url).map_err(|e| {
            ProbeError::proxy_configuration(format!("invalid HTTP proxy URL: {e}"))
        })?,
        ProxyType::Https => Proxy::https(proxy_url).map_err(|e| {
            ProbeError::proxy_configuration(format!("invalid HTTPS proxy URL: {e}"))
        })?,
        ProxyType::Socks5 => {
            let url = if proxy_url.starts_with("socks5://") || proxy_url.starts_with("socks5h://") {
                proxy_url.to_string()
            } else {
                format!("socks5h://{proxy_url}")
            };

            Proxy::all(&url).map_err(|e| {
                ProbeError::proxy_configuration(format!("invalid SOCKS5 proxy URL: {e}"))
            })?
        }
    };

    if let Some(auth) = &config.auth {
        proxy = proxy.basic_auth(&auth.username, &auth.password);
    }

    Ok(proxy)
}
