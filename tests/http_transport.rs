//! Chain + retry against a live mock backend through a reqwest handler.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use provider_guard::error::CallError;
use provider_guard::load_balancer::KeyBalancer;
use provider_guard::middleware::{CallContext, CallResult, Chain, Handler};
use provider_guard::resilience::{BackoffStrategy, RetryMiddleware, RetryMiddlewareConfig};

mod common;

struct ReqwestHandler {
    client: reqwest::Client,
    url: String,
    keys: Arc<KeyBalancer>,
}

#[async_trait]
impl Handler<(), String> for ReqwestHandler {
    async fn call(&self, _ctx: &mut CallContext, _request: ()) -> CallResult<String> {
        let key = self.keys.get_api_key().map_err(CallError::other)?;
        let response = self.client.get(&self.url).bearer_auth(key).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CallError::status(status.as_u16(), body));
        }
        Ok(body)
    }
}

fn chain(max_attempts: u32) -> Chain<(), String> {
    Chain::builder()
        .with(RetryMiddleware::new(
            RetryMiddlewareConfig::default()
                .with_max_attempts(max_attempts)
                .with_strategy(BackoffStrategy::Fixed)
                .with_base_delay(Duration::from_millis(20)),
        ))
        .build()
}

#[tokio::test]
async fn test_retry_on_503_then_success() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let addr = common::start_programmable_backend(move || {
        let cc = cc.clone();
        async move {
            let count = cc.fetch_add(1, Ordering::SeqCst);
            if count < 2 {
                (503, "Service Unavailable".into())
            } else {
                (200, "Success".into())
            }
        }
    })
    .await;

    let keys = Arc::new(KeyBalancer::new(["key-one", "key-two"]));
    let handler = Arc::new(ReqwestHandler {
        client: reqwest::Client::new(),
        url: format!("http://{}/v1/chat", addr),
        keys: keys.clone(),
    });

    let mut ctx = common::ctx();
    let body = chain(3).execute(&mut ctx, (), handler).await.unwrap();

    assert_eq!(body, "Success");
    assert_eq!(call_count.load(Ordering::SeqCst), 3);
    assert_eq!(keys.get_stats().total_requests, 3);
    assert!(ctx.info.success);
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let addr = common::start_programmable_backend(move || {
        let cc = cc.clone();
        async move {
            cc.fetch_add(1, Ordering::SeqCst);
            (401, "bad key".into())
        }
    })
    .await;

    let handler = Arc::new(ReqwestHandler {
        client: reqwest::Client::new(),
        url: format!("http://{}/", addr),
        keys: Arc::new(KeyBalancer::new(["k"])),
    });

    let err = chain(3)
        .execute(&mut common::ctx(), (), handler)
        .await
        .unwrap_err();

    assert!(matches!(err, CallError::Status { status: 401, .. }));
    assert_eq!(call_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connection_refused_is_retried_then_exhausted() {
    // Bind and drop to get a port with nothing listening.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let handler = Arc::new(ReqwestHandler {
        client: reqwest::Client::new(),
        url: format!("http://{}/", addr),
        keys: Arc::new(KeyBalancer::new(["k"])),
    });

    let err = chain(2)
        .execute(&mut common::ctx(), (), handler)
        .await
        .unwrap_err();

    match err {
        CallError::RetriesExhausted { attempts, source } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*source, CallError::Network { .. }));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}
