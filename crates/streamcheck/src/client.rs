use std::sync::OnceLock;

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, info, warn};

use crate::config::ProbeConfig;
use crate::proxy::build_proxy_from_config;
use crate::{Candidate, ProbeError};

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate got there first; either provider is fine for probing.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Create the shared reqwest Client used for every probe in a run
pub fn create_client(config: &ProbeConfig) -> Result<Client, ProbeError> {
    install_rustls_provider();

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .user_agent(&config.user_agent)
        .default_headers(ProbeConfig::get_default_headers())
        .danger_accept_invalid_certs(config.danger_accept_invalid_certs)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        let proxy = build_proxy_from_config(proxy_config)?;
        client_builder = client_builder.proxy(proxy);
        info!(proxy_url = %proxy_config.url, "Using explicitly configured proxy for probes");
    } else if config.use_system_proxy {
        debug!("Using system proxy settings for probes");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for probes");
    }

    client_builder.build().map_err(ProbeError::from)
}

/// Converts a candidate's outbound headers into a `HeaderMap`.
///
/// Headers that are not valid HTTP are skipped rather than failing the probe.
pub fn candidate_headers(candidate: &Candidate) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(candidate.headers.len());
    for (name, value) in &candidate.headers {
        let parsed = HeaderName::from_bytes(name.as_bytes())
            .ok()
            .zip(HeaderValue::from_str(value).ok());
        match parsed {
            Some((name, value)) => {
                headers.insert(name, value);
            }
            None => warn!(
                header = %name,
                url = %candidate.url,
                "Skipping header that is not valid HTTP"
            ),
        }
    }
    headers
}
