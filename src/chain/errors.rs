use alloy_primitives::TxHash;
use thiserror::Error;

/// JSON-RPC code some providers use for "limit exceeded".
const RPC_LIMIT_EXCEEDED: i64 = -32005;

/// EIP-1193 "user rejected request".
const USER_REJECTED: i64 = 4001;

/// Errors surfaced by a [`ChainClient`](super::ChainClient).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChainError {
    /// Transport-level errors (network, connection)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Timeout errors
    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Provider refused the request because of rate limiting
    #[error("Rate limit exceeded: {message}")]
    RateLimited { message: String },

    /// RPC response errors (from the RPC server)
    #[error("RPC response error: {message} (code: {code:?})")]
    RpcResponse { message: String, code: Option<i64> },

    /// The wallet refused to sign
    #[error("User rejected the request: {0}")]
    UserRejected(String),

    /// Transaction was mined but reverted
    #[error("Transaction {tx} reverted")]
    Reverted { tx: TxHash },

    /// Contract call failed or returned undecodable data
    #[error("Contract error: {0}")]
    Contract(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ChainError {
    /// Whether the provider signalled rate limiting (HTTP 429 or equivalent).
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ChainError::RateLimited { .. })
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            ChainError::Transport(_) => true,
            ChainError::Timeout { .. } => true,
            ChainError::RateLimited { .. } => true,
            ChainError::RpcResponse { code, .. } => {
                // Retry on server errors (5xx)
                matches!(code, Some(c) if (500..600).contains(c))
            }
            ChainError::UserRejected(_) => false,
            ChainError::Reverted { .. } => false,
            ChainError::Contract(_) => false,
            ChainError::Configuration(_) => false,
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        matches!(self, ChainError::UserRejected(_))
    }

    /// Classify a raw provider error message and optional error code.
    pub fn classify(message: &str, code: Option<i64>) -> Self {
        let lower = message.to_lowercase();

        if code == Some(429)
            || code == Some(RPC_LIMIT_EXCEEDED)
            || lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("too many requests")
        {
            ChainError::RateLimited {
                message: message.to_string(),
            }
        } else if code == Some(USER_REJECTED)
            || lower.contains("user rejected")
            || lower.contains("user denied")
        {
            ChainError::UserRejected(message.to_string())
        } else if lower.contains("timeout") || lower.contains("timed out") {
            ChainError::Timeout { timeout_ms: 0 }
        } else if lower.contains("connection")
            || lower.contains("error sending request")
            || lower.contains("dns")
        {
            ChainError::Transport(message.to_string())
        } else if lower.contains("execution reverted") || lower.contains("abi decode") {
            ChainError::Contract(message.to_string())
        } else {
            ChainError::RpcResponse {
                message: message.to_string(),
                code,
            }
        }
    }
}

pub type ChainResult<T> = Result<T, ChainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit_variants() {
        assert!(ChainError::classify("HTTP error 429 with body: slow down", None).is_rate_limited());
        assert!(ChainError::classify("Rate limit reached", None).is_rate_limited());
        assert!(ChainError::classify("Too Many Requests", None).is_rate_limited());
        assert!(ChainError::classify("limit exceeded", Some(-32005)).is_rate_limited());
        assert!(ChainError::classify("whatever", Some(429)).is_rate_limited());
    }

    #[test]
    fn test_classify_user_rejection() {
        let err = ChainError::classify("User rejected the request.", Some(4001));
        assert!(err.is_user_rejection());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_falls_back_to_rpc_response() {
        let err = ChainError::classify("header not found", Some(-32000));
        assert_eq!(
            err,
            ChainError::RpcResponse {
                message: "header not found".to_string(),
                code: Some(-32000),
            }
        );
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(ChainError::Transport("connection refused".to_string()).is_retryable());
        assert!(ChainError::Timeout { timeout_ms: 5000 }.is_retryable());
        assert!(ChainError::RpcResponse {
            message: "bad gateway".to_string(),
            code: Some(502),
        }
        .is_retryable());
        assert!(!ChainError::Reverted { tx: TxHash::ZERO }.is_retryable());
        assert!(!ChainError::Contract("execution reverted".to_string()).is_retryable());
    }
}
