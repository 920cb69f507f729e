//! Provider error classification.

use thiserror::Error;

/// Broad category of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Connection failure or timeout.
    Network,
    /// 429 from the provider.
    RateLimited,
    /// 5xx from the provider.
    ServerError,
    /// Other 4xx: bad request, unknown task, bad API key.
    ClientError,
    /// Response body did not have the expected shape.
    Parse,
}

impl ProviderErrorKind {
    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            500..=599 => Self::ServerError,
            _ => Self::ClientError,
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
            Self::Parse => "parse",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
#[error("{kind} error: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Network,
            status: None,
            message: message.into(),
        }
    }

    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::from_status(status),
            status: Some(status),
            message: body.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Parse,
            status: None,
            message: message.into(),
        }
    }

    /// Whether the next poll tick has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::Network
                | ProviderErrorKind::RateLimited
                | ProviderErrorKind::ServerError
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::network(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            Self::network(format!("Connection failed: {}", e))
        } else if e.is_decode() {
            Self::parse(e.to_string())
        } else {
            Self::network(format!("Request failed: {}", e))
        }
    }
}
