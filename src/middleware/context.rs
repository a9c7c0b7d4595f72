//! Per-call context threaded explicitly through the chain.
//!
//! A `CallContext` is created once per logical call and passed by `&mut`
//! to every middleware and to the terminal handler. It is never shared
//! between concurrent calls.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::CallError;

/// Mutable record describing one logical call, including all of its retries.
#[derive(Debug, Clone, Serialize)]
pub struct RequestInfo {
    pub provider: String,
    pub model_type: String,
    pub model: String,
    pub method: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Cumulative wall time across every attempt and wait.
    pub duration: Duration,
    pub success: bool,
    pub last_error: Option<String>,
    pub request_id: String,
    pub user_id: Option<String>,
    /// Zero-based index of the current attempt.
    pub attempt: u32,
    /// Retries allowed after the first attempt.
    pub max_attempts: u32,
}

impl RequestInfo {
    pub fn new(
        provider: impl Into<String>,
        model_type: impl Into<String>,
        model: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model_type: model_type.into(),
            model: model.into(),
            method: method.into(),
            start_time: Utc::now(),
            end_time: None,
            duration: Duration::ZERO,
            success: false,
            last_error: None,
            request_id: String::new(),
            user_id: None,
            attempt: 0,
            max_attempts: 0,
        }
    }

    /// Record the outcome of the call.
    pub fn finish(&mut self, outcome: Result<(), &CallError>) {
        let now = Utc::now();
        self.end_time = Some(now);
        self.duration = (now - self.start_time).to_std().unwrap_or_default();
        match outcome {
            Ok(()) => self.success = true,
            Err(err) => {
                self.success = false;
                self.last_error = Some(err.to_string());
            }
        }
    }
}

/// Execution context for one call: request metadata plus its cancellation path.
#[derive(Debug)]
pub struct CallContext {
    pub info: RequestInfo,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn new(info: RequestInfo) -> Self {
        Self {
            info,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Attach an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Give the whole call (all attempts and waits) a deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.info.user_id = Some(user_id.into());
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check of the cancellation signal and deadline.
    pub fn done(&self) -> Option<CallError> {
        if self.cancel.is_cancelled() {
            return Some(CallError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CallError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves when the call is cancelled or its deadline passes.
    pub async fn cancelled(&self) -> CallError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => CallError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => CallError::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                CallError::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_records_outcome() {
        let mut info = RequestInfo::new("openai", "chat", "gpt-4o", "POST");
        info.finish(Err(&CallError::status(500, "boom")));
        assert!(!info.success);
        assert!(info.end_time.is_some());
        assert!(info.last_error.as_deref().unwrap().contains("500"));

        info.finish(Ok(()));
        assert!(info.success);
    }

    #[tokio::test]
    async fn test_cancelled_resolves_on_token() {
        let token = CancellationToken::new();
        let ctx = CallContext::new(RequestInfo::new("p", "chat", "m", "POST"))
            .with_cancellation(token.clone());
        assert!(ctx.done().is_none());

        token.cancel();
        assert!(matches!(ctx.cancelled().await, CallError::Cancelled));
        assert!(matches!(ctx.done(), Some(CallError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_resolves_on_deadline() {
        let ctx = CallContext::new(RequestInfo::new("p", "chat", "m", "POST"))
            .with_timeout(Duration::from_secs(5));
        assert!(matches!(ctx.cancelled().await, CallError::DeadlineExceeded));
    }
}
