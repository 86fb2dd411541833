use reqwest::StatusCode;

use crate::probe::FailureKind;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("invalid playlist: {reason}")]
    InvalidPlaylist { reason: String },

    #[error("proxy configuration error: {reason}")]
    ProxyConfiguration { reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("operation timed out: {reason}")]
    Timeout { reason: String },

    #[error("manifest error for {url}: {reason}")]
    Manifest { url: String, reason: String },

    #[error("manifest nesting exceeded depth {max_depth} at {url}")]
    DepthExceeded { url: String, max_depth: u32 },

    #[error("manifest chain revisits {url}")]
    ManifestCycle { url: String },

    #[error("no bytes received from {url}")]
    EmptyBody { url: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl ProbeError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_playlist(reason: impl Into<String>) -> Self {
        Self::InvalidPlaylist {
            reason: reason.into(),
        }
    }

    pub fn proxy_configuration(reason: impl Into<String>) -> Self {
        Self::ProxyConfiguration {
            reason: reason.into(),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::Timeout {
            reason: reason.into(),
        }
    }

    pub fn manifest(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Manifest {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled => false,
            Self::InvalidUrl { .. }
            | Self::InvalidPlaylist { .. }
            | Self::ProxyConfiguration { .. }
            | Self::Manifest { .. }
            | Self::DepthExceeded { .. }
            | Self::ManifestCycle { .. }
            | Self::Configuration { .. } => false,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Network { source } => {
                source.is_connect() || source.is_timeout() || source.is_request() || source.is_body()
            }
            Self::Timeout { .. } | Self::EmptyBody { .. } => true,
        }
    }

    /// Maps the error onto the verdict-level failure reason.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Cancelled => FailureKind::Deadline,
            Self::InvalidUrl { .. } => FailureKind::InvalidUrl,
            Self::HttpStatus { status, .. } => FailureKind::HttpStatus(status.as_u16()),
            Self::Network { source } if source.is_timeout() => FailureKind::Timeout,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Manifest { .. } | Self::InvalidPlaylist { .. } => FailureKind::Manifest,
            Self::DepthExceeded { .. } => FailureKind::DepthExceeded,
            Self::ManifestCycle { .. } => FailureKind::ManifestCycle,
            Self::EmptyBody { .. } => FailureKind::EmptyBody,
            Self::Network { .. } | Self::ProxyConfiguration { .. } | Self::Configuration { .. } => {
                FailureKind::Connection
            }
        }
    }
}
