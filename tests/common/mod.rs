//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use provider_guard::error::CallError;
use provider_guard::middleware::{CallContext, CallResult, Handler, RequestInfo};

/// Fresh context for provider `p`.
pub fn ctx() -> CallContext {
    CallContext::new(RequestInfo::new("p", "chat", "model", "POST"))
}

/// Handler replaying scripted outcomes, then succeeding with "ok".
pub struct ScriptedHandler {
    script: Mutex<VecDeque<CallResult<String>>>,
    calls: AtomicU32,
    seen_attempts: Mutex<Vec<u32>>,
}

impl ScriptedHandler {
    pub fn new(script: Vec<CallResult<String>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            seen_attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// `RequestInfo::attempt` observed on each call.
    pub fn seen_attempts(&self) -> Vec<u32> {
        self.seen_attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Handler<String, String> for ScriptedHandler {
    async fn call(&self, ctx: &mut CallContext, _request: String) -> CallResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_attempts.lock().unwrap().push(ctx.info.attempt);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok("ok".to_string()))
    }
}

/// Handler failing with the same error forever.
pub struct FailingHandler {
    err: CallError,
    calls: AtomicU32,
}

impl FailingHandler {
    pub fn new(err: CallError) -> Arc<Self> {
        Arc::new(Self {
            err,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler<String, String> for FailingHandler {
    async fn call(&self, _ctx: &mut CallContext, _request: String) -> CallResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.err.clone())
    }
}

/// Start a programmable mock backend on an ephemeral port.
///
/// `f` produces the status and body of each response.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        read_request_head(&mut socket).await;
                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            401 => "401 Unauthorized",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn read_request_head(socket: &mut tokio::net::TcpStream) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
}
