//! Error types shared by the debrid adapters and the resolution pipeline.

use thiserror::Error;

pub type Result<T, E = DebridError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DebridError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{provider}: authentication failed (check API key)")]
    Authentication { provider: String },

    #[error("{provider}: request failed: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider}: failed to decode response: {message}")]
    Decode { provider: String, message: String },

    #[error("{provider}: {message}")]
    Provider { provider: String, message: String },

    /// The provider accepted the request but the link is still being generated.
    #[error("{provider}: link is being processed, try again in {seconds} seconds")]
    Delayed { provider: String, seconds: u64 },

    /// The release does not contain the content that was asked for.
    #[error("{0}")]
    Rejection(String),

    /// The candidate carries nothing a provider can be given.
    #[error("{0}")]
    InvalidCandidate(String),

    #[error("release not cached (status: {status})")]
    NotCached { status: String },

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("verification cancelled")]
    Cancelled,
}

impl DebridError {
    pub fn transport(provider: &str, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn decode(provider: &str, message: impl Into<String>) -> Self {
        Self::Decode {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn provider(provider: &str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Delayed { .. })
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejection(_))
    }

    pub fn is_not_cached(&self) -> bool {
        matches!(self, Self::NotCached { .. })
    }
}
