use std::fmt;

use thiserror::Error;

/// Unified error type for the Rota scrape layer
#[derive(Error, Debug)]
pub enum RotaError {
    // Policy and pool structure errors
    #[error("Proxies are required but none are configured")]
    ProxiesRequired,

    #[error("No proxies configured")]
    NoProxiesConfigured,

    #[error("No healthy proxies available")]
    NoHealthyProxies,

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    // Transport errors
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("Proxy authentication rejected")]
    ProxyAuthRejected,

    #[error("Upstream returned HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Operation cancelled")]
    Cancelled,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Rota operations
pub type Result<T> = std::result::Result<T, RotaError>;

impl RotaError {
    /// Errors that retrying cannot fix: the pool is structurally empty or policy forbids going on.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            RotaError::ProxiesRequired | RotaError::NoProxiesConfigured | RotaError::NoHealthyProxies
        )
    }

    /// Check if this error comes from bad configuration input
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            RotaError::InvalidConfig(_) | RotaError::InvalidProxyAddress(_)
        )
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for RotaError {
    fn from(err: url::ParseError) -> Self {
        RotaError::InvalidProxyAddress(err.to_string())
    }
}

/// Failure of an operation driven by the retry executor.
///
/// `Exhausted` keeps the operation's own error so callers can still match on its type.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every allowed attempt failed; `source` is the error from the last one.
    Exhausted {
        operation: String,
        attempts: u32,
        source: E,
    },
    /// Structural or policy failure raised by the pool. Never retried.
    Pool(RotaError),
    /// The run was stopped by the operator before it could finish.
    Cancelled { operation: String, attempts: u32 },
}

impl<E> RetryError<E> {
    /// Number of attempts that actually invoked the operation
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
            RetryError::Pool(_) => 0,
        }
    }

    pub fn source_error(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Unwrap the original operation error, if there is one
    pub fn into_source(self) -> Option<E> {
        match self {
            RetryError::Exhausted { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, RetryError::Pool(e) if e.is_structural())
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted {
                operation,
                attempts,
                source,
            } => write!(
                f,
                "{} failed after {} attempt(s): {}",
                operation, attempts, source
            ),
            RetryError::Pool(e) => write!(f, "{}", e),
            RetryError::Cancelled {
                operation,
                attempts,
            } => write!(
                f,
                "{} cancelled after {} attempt(s)",
                operation, attempts
            ),
        }
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RetryError::Exhausted { source, .. } => Some(source),
            RetryError::Pool(e) => Some(e),
            RetryError::Cancelled { .. } => None,
        }
    }
}

impl<E> From<RotaError> for RetryError<E> {
    fn from(err: RotaError) -> Self {
        RetryError::Pool(err)
    }
}
