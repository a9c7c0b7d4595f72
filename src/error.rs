//! Call-level error type shared by the middleware chain and the retry engine.
//!
//! Transports are expected to report failures through the structured
//! variants so that retry classification never has to guess. `Other` exists
//! for opaque third-party errors and is classified heuristically.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::idgen::FlakeError;

/// Network-layer failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkKind {
    /// Host name could not be resolved.
    Dns,
    ConnectionReset,
    ConnectionRefused,
    BrokenPipe,
    /// Connection could not be established for another reason.
    Connect,
    Other,
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetworkKind::Dns => "dns resolution failed",
            NetworkKind::ConnectionReset => "connection reset",
            NetworkKind::ConnectionRefused => "connection refused",
            NetworkKind::BrokenPipe => "broken pipe",
            NetworkKind::Connect => "connect failed",
            NetworkKind::Other => "network error",
        };
        f.write_str(s)
    }
}

/// Error returned by handlers, middlewares and the chain.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// The provider answered with a non-success HTTP status.
    #[error("provider returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// The request never produced a response.
    #[error("{kind}: {message}")]
    Network { kind: NetworkKind, message: String },

    /// An attempt ran out of time.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The transport reported a transient condition.
    #[error("temporary failure: {0}")]
    Temporary(String),

    /// The call's cancellation token fired.
    #[error("call cancelled")]
    Cancelled,

    /// The call's deadline passed.
    #[error("call deadline exceeded")]
    DeadlineExceeded,

    /// Every allowed attempt failed with a retryable error.
    #[error("request failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<CallError>,
    },

    /// A request identifier could not be generated.
    #[error("request id generation failed: {0}")]
    Identity(#[from] FlakeError),

    /// Opaque error from a third-party transport.
    #[error("{0}")]
    Other(Arc<dyn StdError + Send + Sync>),
}

impl CallError {
    /// Build a status error.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        CallError::Status {
            status,
            message: message.into(),
        }
    }

    /// Build a network error.
    pub fn network(kind: NetworkKind, message: impl Into<String>) -> Self {
        CallError::Network {
            kind,
            message: message.into(),
        }
    }

    /// Wrap an arbitrary error.
    pub fn other<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        CallError::Other(Arc::new(err))
    }

    /// Wrap a plain message as an opaque error.
    pub fn message(msg: impl Into<String>) -> Self {
        CallError::Other(Arc::new(OpaqueMessage(msg.into())))
    }

    /// True for cancellation and deadline errors.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CallError::Cancelled | CallError::DeadlineExceeded)
    }

    /// HTTP status carried by this error, looking through exhaustion wrappers.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            CallError::Status { status, .. } => Some(*status),
            CallError::RetriesExhausted { source, .. } => source.status_code(),
            _ => None,
        }
    }

    /// The innermost error, unwrapping `RetriesExhausted`.
    pub fn root(&self) -> &CallError {
        match self {
            CallError::RetriesExhausted { source, .. } => source.root(),
            other => other,
        }
    }
}

#[derive(Debug)]
struct OpaqueMessage(String);

impl fmt::Display for OpaqueMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for OpaqueMessage {}

impl From<io::Error> for CallError {
    fn from(err: io::Error) -> Self {
        let message = err.to_string();
        match err.kind() {
            io::ErrorKind::TimedOut => CallError::Timeout(message),
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                CallError::network(NetworkKind::ConnectionReset, message)
            }
            io::ErrorKind::ConnectionRefused => {
                CallError::network(NetworkKind::ConnectionRefused, message)
            }
            io::ErrorKind::BrokenPipe => CallError::network(NetworkKind::BrokenPipe, message),
            io::ErrorKind::NotConnected | io::ErrorKind::AddrNotAvailable => {
                CallError::network(NetworkKind::Connect, message)
            }
            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => {
                CallError::Temporary(message)
            }
            _ => CallError::other(err),
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return CallError::Timeout(err.to_string());
        }
        if let Some(status) = err.status() {
            return CallError::status(status.as_u16(), err.to_string());
        }
        if err.is_connect() {
            let kind = network_kind_in_chain(&err).unwrap_or(NetworkKind::Connect);
            return CallError::network(kind, err.to_string());
        }
        CallError::other(err)
    }
}

/// Find a network failure category in an error's `source()` chain.
pub(crate) fn network_kind_in_chain(err: &(dyn StdError + 'static)) -> Option<NetworkKind> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                    return Some(NetworkKind::ConnectionReset)
                }
                io::ErrorKind::ConnectionRefused => return Some(NetworkKind::ConnectionRefused),
                io::ErrorKind::BrokenPipe => return Some(NetworkKind::BrokenPipe),
                _ => {}
            }
        }
        let text = e.to_string().to_ascii_lowercase();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return Some(NetworkKind::Dns);
        }
        current = e.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let err: CallError = io::Error::new(io::ErrorKind::ConnectionRefused, "nope").into();
        assert!(matches!(
            err,
            CallError::Network {
                kind: NetworkKind::ConnectionRefused,
                ..
            }
        ));

        let err: CallError = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert!(matches!(err, CallError::Timeout(_)));

        let err: CallError = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, CallError::Other(_)));
    }

    #[test]
    fn test_status_code_through_exhaustion() {
        let err = CallError::RetriesExhausted {
            attempts: 4,
            source: Box::new(CallError::status(503, "unavailable")),
        };
        assert_eq!(err.status_code(), Some(503));
        assert!(matches!(err.root(), CallError::Status { status: 503, .. }));
        assert_eq!(
            err.to_string(),
            "request failed after 4 attempts: provider returned status 503: unavailable"
        );
    }

    #[test]
    fn test_network_kind_in_chain() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        assert_eq!(network_kind_in_chain(&io_err), Some(NetworkKind::BrokenPipe));

        let io_err = io::Error::new(io::ErrorKind::Other, "dns error: failed to lookup address");
        assert_eq!(network_kind_in_chain(&io_err), Some(NetworkKind::Dns));
    }
}
