//! Error taxonomy for the S2S provider core.
//!
//! One enum, not one type per kind — keeps `?`-propagation ergonomic across
//! config, registry, session, and manager boundaries while still giving the
//! provider manager a variant to pattern-match for failover classification.

use std::time::Duration;

/// Errors produced anywhere in the S2S provider core.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Missing or invalid required field in config/extras (e.g. absent
    /// `api_key` where required). Raised from `Engine::start` or a factory;
    /// never retryable.
    #[error("invalid config: {0}")]
    Config(String),

    /// Misuse of the provider registry (empty id, duplicate id). A
    /// programming-time error, not a runtime one.
    #[error("registration error: {0}")]
    Registration(String),

    /// `Registry::new` was called with an id that was never registered.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// Wraps an underlying dial/handshake/setup failure. Non-retryable at
    /// the engine level; the manager may still classify the wrapped cause
    /// as retryable and fail over.
    #[error("failed to start {provider} session: {source}")]
    Start {
        /// Provider id that failed to start.
        provider: String,
        /// Underlying cause.
        #[source]
        source: Box<ProviderError>,
    },

    /// Socket read/write failure, surfaced either as a `Send*` return or as
    /// a terminal `SessionEvent::Error`.
    #[error("transport error: {0}")]
    Transport(String),

    /// Network-level error below the transport (connection reset, DNS
    /// failure). Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// The provider rate-limited the request. Retryable.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimit {
        /// Suggested retry delay, if the provider supplied one.
        retry_after: Option<Duration>,
    },

    /// The provider's service is temporarily unavailable (5xx-equivalent).
    /// Retryable.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The operation timed out. Retryable.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Authentication/authorization failure. Never retryable.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Server-reported error inside a decoded envelope. Surfaced as a
    /// `SessionEvent::Error`; does not by itself terminate the session.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The cancellation token was triggered. Never emitted as an `Error`
    /// event — callers observe it as a returned `Err` or a quiet close.
    #[error("cancelled")]
    Cancelled,

    /// Operation attempted after `Close`. Returned synchronously.
    #[error("session is closed")]
    Closed,
}

impl ProviderError {
    /// Whether the provider manager should try the next engine in its
    /// fallback list after this error, rather than surfacing it directly.
    ///
    /// Retries on network errors, timeouts, 5xx-equivalent service errors,
    /// and rate limiting; does not retry on authentication or
    /// malformed-input (config/protocol) errors, since another engine would
    /// fail the same way.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_)
            | Self::RateLimit { .. }
            | Self::ServiceUnavailable(_)
            | Self::Timeout(_) => true,
            Self::Start { source, .. } => source.is_retryable(),
            Self::Transport(_) => true,
            Self::Config(_)
            | Self::Registration(_)
            | Self::UnknownProvider(_)
            | Self::Authentication(_)
            | Self::Protocol(_)
            | Self::Cancelled
            | Self::Closed => false,
        }
    }

    /// Build a `Start` error wrapping `source` with the provider id that
    /// failed to dial/configure.
    pub fn start(provider: impl Into<String>, source: ProviderError) -> Self {
        Self::Start {
            provider: provider.into(),
            source: Box::new(source),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(ProviderError::RateLimit { retry_after: None }.is_retryable());
        assert!(ProviderError::ServiceUnavailable("503".into()).is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(ProviderError::Transport("reset by peer".into()).is_retryable());

        assert!(!ProviderError::Authentication("bad key".into()).is_retryable());
        assert!(!ProviderError::Config("missing api_key".into()).is_retryable());
        assert!(!ProviderError::Protocol("bad envelope".into()).is_retryable());
        assert!(!ProviderError::Cancelled.is_retryable());
        assert!(!ProviderError::Closed.is_retryable());
    }

    #[test]
    fn start_error_inherits_source_retryability() {
        let retryable = ProviderError::start("openai_realtime", ProviderError::Network("dns".into()));
        assert!(retryable.is_retryable());

        let non_retryable =
            ProviderError::start("openai_realtime", ProviderError::Authentication("bad key".into()));
        assert!(!non_retryable.is_retryable());
    }
}
