//! Failure classification
//!
//! Transport adapters translate their native errors into an [`ErrorCategory`]
//! through the [`Classify`] trait. Message matching is only the fallback for
//! errors nobody translated.

use std::fmt;
use std::io;

use serde::{Serialize, Serializer};

use crate::error::RotaError;

/// Closed set of failure categories the pool understands
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Timeout,
    Connection,
    Authentication,
    /// Anything else, tagged with a short name of the error type
    Other(String),
}

impl ErrorCategory {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::Authentication => "authentication",
            Self::Other(name) => name.as_str(),
        }
    }

    /// Map a category name (as used in logs and config) back to a category
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "timeout" => Self::Timeout,
            "connection" | "proxy" => Self::Connection,
            "authentication" | "auth" => Self::Authentication,
            other => Self::Other(other.to_string()),
        }
    }

    /// Last-resort classification from free text.
    ///
    /// `fallback` names the category used when nothing matches.
    pub fn from_message(message: &str, fallback: &str) -> Self {
        let message = message.to_lowercase();
        if message.contains("timeout") || message.contains("timed out") {
            Self::Timeout
        } else if message.contains("proxy") || message.contains("connection") {
            Self::Connection
        } else if message.contains("auth") {
            Self::Authentication
        } else {
            Self::Other(fallback.to_string())
        }
    }
}

impl Default for ErrorCategory {
    fn default() -> Self {
        Self::Other("unknown".to_string())
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Translation from an operation's error into pool-level semantics
pub trait Classify {
    /// Category used to penalise the proxy that was in use
    fn category(&self) -> ErrorCategory;

    /// True when the operator stopped the run; such failures are not retried
    /// and do not count against the proxy.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Short type name used for unclassified errors (`std::io::Error` -> `Error`)
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

impl Classify for RotaError {
    fn category(&self) -> ErrorCategory {
        match self {
            RotaError::Timeout => ErrorCategory::Timeout,
            RotaError::ProxyConnectionFailed(_) => ErrorCategory::Connection,
            RotaError::ProxyAuthRejected => ErrorCategory::Authentication,
            RotaError::HttpStatus { status: 407 } => ErrorCategory::Authentication,
            RotaError::HttpStatus { status } => ErrorCategory::Other(format!("http_{}", status)),
            RotaError::Io(e) => e.category(),
            RotaError::Http(msg) => ErrorCategory::from_message(msg, "http"),
            other => ErrorCategory::from_message(&other.to_string(), "RotaError"),
        }
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, RotaError::Cancelled)
    }
}

impl Classify for io::Error {
    fn category(&self) -> ErrorCategory {
        match self.kind() {
            io::ErrorKind::TimedOut => ErrorCategory::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::BrokenPipe => ErrorCategory::Connection,
            _ => ErrorCategory::from_message(&self.to_string(), short_type_name::<io::Error>()),
        }
    }
}

impl Classify for anyhow::Error {
    fn category(&self) -> ErrorCategory {
        if let Some(err) = self.downcast_ref::<RotaError>() {
            return err.category();
        }
        if let Some(err) = self.downcast_ref::<io::Error>() {
            return err.category();
        }
        ErrorCategory::from_message(&format!("{:#}", self), "anyhow")
    }

    fn is_cancelled(&self) -> bool {
        self.downcast_ref::<RotaError>()
            .map(|e| e.is_cancelled())
            .unwrap_or(false)
    }
}
