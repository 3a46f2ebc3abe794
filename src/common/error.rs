//! Common Error Types
//!
//! Root error taxonomy for the daemon. Failures local to one swap never
//! propagate past its engine; only dispatcher-level transport failures
//! are process-fatal.

use thiserror::Error;

/// Root error type for farcasterd
#[derive(Debug, Error)]
pub enum FarcasterError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),

    /// Bus transport errors
    #[error("bus error: {0}")]
    Bus(#[from] crate::bus::BusError),

    /// Registry errors
    #[error("registry error: {0}")]
    Registry(#[from] crate::registry::RegistryError),

    /// Offer book errors
    #[error("offer error: {0}")]
    Offer(#[from] crate::offerbook::OfferBookError),

    /// Swap engine errors
    #[error("engine error: {0}")]
    Engine(#[from] crate::swap::EngineError),

    /// Wallet errors
    #[error("wallet error: {0}")]
    Wallet(#[from] crate::wallet::WalletError),

    /// Chain watcher errors
    #[error("watcher error: {0}")]
    Watcher(#[from] crate::watcher::WatcherError),

    /// Counterparty or local data failed cryptographic/consistency
    /// verification; fatal to the affected swap only
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A bounded request exceeded its deadline
    #[error("timeout: {0}")]
    Timeout(String),

    /// Event for an ended swap or an already-processed sequence number
    #[error("stale event: {0}")]
    StaleEvent(String),

    /// Underlying chain daemon or wallet unreachable
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FarcasterError {
    /// Create a protocol violation error
    pub fn protocol_violation(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a stale event error
    pub fn stale(msg: impl Into<String>) -> Self {
        Self::StaleEvent(msg.into())
    }

    /// Create a resource unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::ResourceUnavailable(msg.into())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FarcasterError::Timeout(_)
                | FarcasterError::ResourceUnavailable(_)
                | FarcasterError::Wallet(_)
                | FarcasterError::Watcher(_)
                | FarcasterError::Io(_)
        )
    }

    /// Get error code for control API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            FarcasterError::Config(_) => "CONFIG_ERROR",
            FarcasterError::Logging(_) => "LOGGING_ERROR",
            FarcasterError::Bus(_) => "BUS_ERROR",
            FarcasterError::Registry(_) => "REGISTRY_ERROR",
            FarcasterError::Offer(_) => "OFFER_ERROR",
            FarcasterError::Engine(_) => "ENGINE_ERROR",
            FarcasterError::Wallet(_) => "WALLET_ERROR",
            FarcasterError::Watcher(_) => "WATCHER_ERROR",
            FarcasterError::ProtocolViolation(_) => "PROTOCOL_VIOLATION",
            FarcasterError::Timeout(_) => "TIMEOUT",
            FarcasterError::StaleEvent(_) => "STALE_EVENT",
            FarcasterError::ResourceUnavailable(_) => "RESOURCE_UNAVAILABLE",
            FarcasterError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias using FarcasterError
pub type Result<T> = std::result::Result<T, FarcasterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = FarcasterError::protocol_violation("bad adaptor share");
        assert!(err.to_string().contains("bad adaptor share"));
        assert_eq!(err.error_code(), "PROTOCOL_VIOLATION");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(FarcasterError::timeout("watcher deadline").is_retryable());
        assert!(FarcasterError::unavailable("chain daemon down").is_retryable());
        assert!(!FarcasterError::protocol_violation("invalid sig").is_retryable());
        assert!(!FarcasterError::stale("old seq").is_retryable());
    }
}
