//! Retryability classification.
//!
//! Structured `CallError` variants are classified exactly. Opaque errors
//! (`CallError::Other`) fall back to inspecting their `source()` chain and,
//! last, their message text.

use std::error::Error as StdError;
use std::io;

use crate::error::{network_kind_in_chain, CallError};

/// Message fragments that mark a transient failure.
const TRANSIENT_PHRASES: &[&str] = &[
    "connection reset",
    "connection refused",
    "broken pipe",
    "no such host",
    "name or service not known",
    "temporary failure in name resolution",
    "dns error",
    "timeout",
    "timed out",
    "temporary",
    "temporarily unavailable",
];

/// Whether `status` is worth retrying: 408, 429 and 5xx except 501, 505 and 506.
pub fn is_retryable_status(status: u16) -> bool {
    match status {
        408 | 429 => true,
        501 | 505 | 506 => false,
        500..=599 => true,
        _ => false,
    }
}

/// Default retry predicate.
pub fn is_retryable(err: &CallError) -> bool {
    match err {
        CallError::Status { status, .. } => is_retryable_status(*status),
        CallError::Network { .. } | CallError::Timeout(_) | CallError::Temporary(_) => true,
        CallError::Cancelled
        | CallError::DeadlineExceeded
        | CallError::RetriesExhausted { .. }
        | CallError::Identity(_) => false,
        CallError::Other(inner) => is_retryable_opaque(inner.as_ref()),
    }
}

fn is_retryable_opaque(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
            ) {
                return true;
            }
        }
        current = e.source();
    }

    if network_kind_in_chain(err).is_some() {
        return true;
    }

    is_retryable_message(&chain_text(err))
}

/// Heuristic classification of a bare error message.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    if TRANSIENT_PHRASES.iter().any(|p| lower.contains(p)) {
        return true;
    }
    let retryable_code = embedded_status_codes(&lower).any(is_retryable_status);
    retryable_code
}

/// Standalone three-digit numbers in the HTTP status range.
fn embedded_status_codes(message: &str) -> impl Iterator<Item = u16> + '_ {
    message
        .split(|c: char| !c.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse::<u16>().ok())
        .filter(|code| (100..=599).contains(code))
}

fn chain_text(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut current = err.source();
    while let Some(e) = current {
        parts.push(e.to_string());
        current = e.source();
    }
    parts.join(": ")
}
