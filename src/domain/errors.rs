use thiserror::Error;

/// Exchange call failures, classified the way every call site needs them.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Exchange authentication failed: {0}")]
    Auth(String),

    #[error("Insufficient funds on exchange: {0}")]
    InsufficientFunds(String),

    #[error("Symbol filter violation: {0}")]
    SymbolFilter(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Exchange error {code}: {message}")]
    Other { code: i64, message: String },
}

impl ExchangeError {
    /// Timeouts are surfaced as network errors; call sites escalate them.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExchangeError::Network(msg) if msg.to_lowercase().contains("timed out")
            || msg.to_lowercase().contains("timeout"))
    }
}

/// Misuse of the pending-decision state machine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Pending decision {0} not found")]
    NotFound(i64),

    #[error("Pending decision {id} is '{status}', cannot {action}")]
    InvalidState {
        id: i64,
        status: String,
        action: &'static str,
    },

    #[error("A pending decision already exists for model {model_id} on {coin}")]
    DuplicatePending { model_id: i64, coin: String },
}

/// Input rejected before any side effect.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Unknown model: {0}")]
    UnknownModel(i64),

    #[error("Unknown risk profile: {0}")]
    UnknownProfile(i64),

    #[error("System profile '{0}' is immutable")]
    SystemProfileImmutable(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_detection() {
        assert!(ExchangeError::Network("operation timed out".to_string()).is_timeout());
        assert!(ExchangeError::Network("request timeout".to_string()).is_timeout());
        assert!(!ExchangeError::Network("connection refused".to_string()).is_timeout());
        assert!(!ExchangeError::RateLimit("429".to_string()).is_timeout());
    }

    #[test]
    fn test_queue_error_formatting() {
        let err = QueueError::InvalidState {
            id: 7,
            status: "executed".to_string(),
            action: "approve",
        };
        let msg = err.to_string();
        assert!(msg.contains("7"));
        assert!(msg.contains("executed"));
        assert!(msg.contains("approve"));
    }
}
