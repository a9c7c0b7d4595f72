//! Retry engine behaviour through the middleware chain.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use provider_guard::error::CallError;
use provider_guard::idgen::{Flake, Settings};
use provider_guard::middleware::{Chain, Handler, LoggingMiddleware, RequestIdMiddleware};
use provider_guard::resilience::{
    BackoffStrategy, RetryCondition, RetryEvent, RetryMiddleware, RetryMiddlewareConfig,
    RetryNotifier, TimeoutMiddleware,
};

mod common;
use common::{ctx, FailingHandler, ScriptedHandler};

fn fast_retry(max_attempts: u32) -> RetryMiddlewareConfig {
    RetryMiddlewareConfig::default()
        .with_max_attempts(max_attempts)
        .with_strategy(BackoffStrategy::Fixed)
        .with_base_delay(Duration::from_millis(10))
}

fn retry_chain(config: RetryMiddlewareConfig) -> Chain<String, String> {
    Chain::builder().with(RetryMiddleware::new(config)).build()
}

#[tokio::test(start_paused = true)]
async fn test_never_condition_runs_once() {
    let handler = FailingHandler::new(CallError::status(503, "unavailable"));
    let chain = retry_chain(fast_retry(5).with_condition(RetryCondition::never()));

    let err = chain
        .execute(&mut ctx(), "req".into(), handler.clone())
        .await
        .unwrap_err();

    assert_eq!(handler.calls(), 1);
    assert!(matches!(err, CallError::Status { status: 503, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_always_condition_runs_max_plus_one() {
    let handler = FailingHandler::new(CallError::status(400, "bad request"));
    let chain = retry_chain(fast_retry(4).with_condition(RetryCondition::always()));

    let mut ctx = ctx();
    let err = chain
        .execute(&mut ctx, "req".into(), handler.clone())
        .await
        .unwrap_err();

    assert_eq!(handler.calls(), 5);
    match err {
        CallError::RetriesExhausted { attempts, source } => {
            assert_eq!(attempts, 5);
            assert!(matches!(*source, CallError::Status { status: 400, .. }));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(ctx.info.max_attempts, 4);
    assert_eq!(ctx.info.attempt, 4);
    assert!(!ctx.info.success);
    assert!(ctx.info.end_time.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_recovers_after_transient_failures() {
    let handler = ScriptedHandler::new(vec![
        Err(CallError::status(503, "unavailable")),
        Err(CallError::Timeout("slow".into())),
    ]);
    let chain = retry_chain(fast_retry(3));

    let mut ctx = ctx();
    let out = chain
        .execute(&mut ctx, "req".into(), handler.clone())
        .await
        .unwrap();

    assert_eq!(out, "ok");
    assert_eq!(handler.calls(), 3);
    assert_eq!(handler.seen_attempts(), vec![0, 1, 2]);
    assert!(ctx.info.success);
    assert_eq!(ctx.info.last_error.as_deref(), Some("request timed out: slow"));
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_error_returned_unwrapped() {
    let handler = ScriptedHandler::new(vec![Err(CallError::status(401, "unauthorized"))]);
    let chain = retry_chain(fast_retry(3));

    let err = chain
        .execute(&mut ctx(), "req".into(), handler.clone())
        .await
        .unwrap_err();

    assert_eq!(handler.calls(), 1);
    assert!(matches!(err, CallError::Status { status: 401, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_wait_returns_promptly() {
    let handler = FailingHandler::new(CallError::status(503, "unavailable"));
    let chain = retry_chain(
        RetryMiddlewareConfig::default()
            .with_max_attempts(3)
            .with_strategy(BackoffStrategy::Fixed)
            .with_base_delay(Duration::from_secs(30)),
    );

    let token = CancellationToken::new();
    let mut ctx = ctx().with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let started = tokio::time::Instant::now();
    let err = chain
        .execute(&mut ctx, "req".into(), handler.clone())
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, CallError::Cancelled));
    assert_eq!(handler.calls(), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_interrupts_wait() {
    let handler = FailingHandler::new(CallError::Temporary("busy".into()));
    let chain = retry_chain(
        RetryMiddlewareConfig::default()
            .with_strategy(BackoffStrategy::Fixed)
            .with_base_delay(Duration::from_secs(5)),
    );

    let mut ctx = ctx().with_timeout(Duration::from_secs(7));
    let err = chain
        .execute(&mut ctx, "req".into(), handler.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, CallError::DeadlineExceeded));
    assert_eq!(handler.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_on_retry_notified_before_each_retry_only() {
    let events: Arc<Mutex<Vec<(u32, Option<String>)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let (notifier, worker) = RetryNotifier::spawn(16, move |event: RetryEvent| {
        sink.lock()
            .unwrap()
            .push((event.info.attempt, event.info.last_error.clone()));
    });

    let handler = FailingHandler::new(CallError::status(502, "bad gateway"));
    let chain = retry_chain(fast_retry(2).with_on_retry(notifier));

    let _ = chain.execute(&mut ctx(), "req".into(), handler.clone()).await;
    drop(chain);
    worker.await.unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].0, 1);
    assert_eq!(events[1].0, 2);
    assert!(events[0]
        .1
        .as_deref()
        .unwrap()
        .contains("502"));
}

#[tokio::test(start_paused = true)]
async fn test_on_retry_reports_retry_interrupted_by_cancel() {
    let events: Arc<Mutex<Vec<(u32, Duration)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let (notifier, worker) = RetryNotifier::spawn(16, move |event: RetryEvent| {
        sink.lock().unwrap().push((event.info.attempt, event.delay));
    });

    let handler = FailingHandler::new(CallError::status(503, "unavailable"));
    let chain = retry_chain(
        RetryMiddlewareConfig::default()
            .with_max_attempts(3)
            .with_strategy(BackoffStrategy::Fixed)
            .with_base_delay(Duration::from_secs(5))
            .with_on_retry(notifier),
    );

    let token = CancellationToken::new();
    let mut ctx = ctx().with_cancellation(token.clone());
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let err = chain
        .execute(&mut ctx, "req".into(), handler.clone())
        .await
        .unwrap_err();
    canceller.await.unwrap();
    drop(chain);
    worker.await.unwrap();

    assert!(matches!(err, CallError::Cancelled));
    assert_eq!(handler.calls(), 1);
    assert_eq!(*events.lock().unwrap(), vec![(1, Duration::from_secs(5))]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_inside_retry_gets_fresh_budget_per_attempt() {
    let slow_then_fast = Arc::new(SlowOnce::default());
    let chain: Chain<String, String> = Chain::builder()
        .with(RetryMiddleware::new(fast_retry(2)))
        .with(TimeoutMiddleware::new(Duration::from_millis(50)))
        .build();

    let out = chain
        .execute(&mut ctx(), "req".into(), slow_then_fast.clone())
        .await
        .unwrap();
    assert_eq!(out, "fast");
}

#[tokio::test(start_paused = true)]
async fn test_full_chain_stamps_request_id() {
    let flake = Arc::new(Flake::new(Settings::default().with_machine_id(|| Ok(1))).unwrap());
    let handler = ScriptedHandler::new(vec![Err(CallError::status(500, "oops"))]);
    let chain: Chain<String, String> = Chain::builder()
        .with(RetryMiddleware::new(fast_retry(1)))
        .with(LoggingMiddleware::new())
        .with(RequestIdMiddleware::new(flake))
        .sort_by_priority()
        .build();

    assert_eq!(chain.names(), vec!["request_id", "logging", "retry"]);

    let mut ctx = ctx();
    chain
        .execute(&mut ctx, "req".into(), handler.clone())
        .await
        .unwrap();
    assert_eq!(ctx.info.request_id.len(), 34);
    assert_eq!(handler.calls(), 2);
}

#[derive(Default)]
struct SlowOnce {
    calls: Mutex<u32>,
}

#[async_trait::async_trait]
impl Handler<String, String> for SlowOnce {
    async fn call(
        &self,
        _ctx: &mut provider_guard::middleware::CallContext,
        _request: String,
    ) -> provider_guard::middleware::CallResult<String> {
        let first = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls == 1
        };
        if first {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok("slow".to_string())
        } else {
            Ok("fast".to_string())
        }
    }
}
