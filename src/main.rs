//! provider-guard command line.
//!
//! Exercises the guard components against a config file:
//! ID generation, key selection, and guarded HTTP calls.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use provider_guard::config::{load_config, ConfigWatcher, GuardConfig};
use provider_guard::error::CallError;
use provider_guard::idgen::Flake;
use provider_guard::load_balancer::KeyPool;
use provider_guard::middleware::{
    CallContext, CallResult, Chain, Handler, LoggingMiddleware, RequestIdMiddleware, RequestInfo,
};
use provider_guard::observability::{logging, metrics};
use provider_guard::resilience::{RetryEvent, RetryMiddleware, RetryNotifier, TimeoutMiddleware};

/// Longest response body excerpt kept in a status error.
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Parser)]
#[command(name = "provider-guard")]
#[command(about = "Retry, key balancing and ID tooling for provider calls", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate IDs and show their fields
    Ids {
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },
    /// Show the fields of an ID
    Decompose { id: u64 },
    /// Generate a request identifier
    RequestId,
    /// Select keys for a provider and print usage stats as JSON
    Keys {
        #[arg(short, long)]
        provider: String,

        #[arg(long, default_value_t = 10)]
        picks: usize,
    },
    /// Perform a guarded GET against a provider endpoint
    Call {
        #[arg(short, long)]
        provider: String,

        #[arg(short, long)]
        url: String,

        #[arg(long, default_value = "chat")]
        model_type: String,

        #[arg(long, default_value = "default")]
        model: String,

        #[arg(long)]
        user: Option<String>,
    },
    /// Keep the key pool in sync with the config file until Ctrl+C
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::debug!(config = ?cli.config, "Configuration loaded");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to install metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    match cli.command {
        Commands::Ids { count } => {
            let flake = Flake::new(config.id_generator.to_settings())?;
            for _ in 0..count {
                let id = flake.id()?;
                print_id(&flake, id);
            }
        }
        Commands::Decompose { id } => {
            let flake = Flake::new(config.id_generator.to_settings())?;
            print_id(&flake, id);
        }
        Commands::RequestId => {
            let flake = Flake::new(config.id_generator.to_settings())?;
            println!("{}", flake.request_id()?);
        }
        Commands::Keys { provider, picks } => {
            let pool = KeyPool::from_config(&config.providers);
            let balancer = pool.get(&provider)?;
            for _ in 0..picks {
                pool.get_api_key(&provider)?;
            }
            println!("{}", serde_json::to_string_pretty(&balancer.get_stats())?);
        }
        Commands::Call {
            provider,
            url,
            model_type,
            model,
            user,
        } => {
            let body = guarded_call(&config, provider, url, model_type, model, user).await?;
            println!("{}", body);
        }
        Commands::Watch => {
            let path = cli.config.ok_or("watch requires --config")?;
            watch(&config, path).await?;
        }
    }

    Ok(())
}

fn print_id(flake: &Flake, id: u64) {
    let parts = flake.decompose(id);
    let at = flake
        .to_time(id)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{}\ttime={} sequence={} machine_id={} at={}",
        parts.id, parts.time, parts.sequence, parts.machine_id, at
    );
}

#[derive(Debug, Clone)]
struct ProviderRequest {
    url: String,
}

/// reqwest transport presenting a pooled key as a bearer token.
struct HttpTransport {
    client: reqwest::Client,
    pool: Arc<KeyPool>,
}

#[async_trait]
impl Handler<ProviderRequest, String> for HttpTransport {
    async fn call(&self, ctx: &mut CallContext, request: ProviderRequest) -> CallResult<String> {
        let key = self
            .pool
            .get_api_key(&ctx.info.provider)
            .map_err(CallError::other)?;

        let send = self
            .client
            .get(&request.url)
            .bearer_auth(&key)
            .header("x-request-id", &ctx.info.request_id)
            .send();

        let response = tokio::select! {
            biased;
            reason = ctx.cancelled() => return Err(reason),
            response = send => response?,
        };

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let excerpt: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            return Err(CallError::status(status.as_u16(), excerpt));
        }
        Ok(body)
    }
}

async fn guarded_call(
    config: &GuardConfig,
    provider: String,
    url: String,
    model_type: String,
    model: String,
    user: Option<String>,
) -> Result<String, Box<dyn std::error::Error>> {
    let pool = Arc::new(KeyPool::from_config(&config.providers));
    pool.get(&provider)?;
    let flake = Arc::new(Flake::new(config.id_generator.to_settings())?);

    let (notifier, notify_worker) =
        RetryNotifier::spawn(config.retry.notify_queue_capacity, |event: RetryEvent| {
            tracing::info!(
                provider = %event.info.provider,
                request_id = %event.info.request_id,
                attempt = event.info.attempt,
                max_attempts = event.info.max_attempts,
                delay_ms = event.delay.as_millis() as u64,
                last_error = ?event.info.last_error,
                "Retry scheduled"
            );
        });

    let retry =
        RetryMiddleware::new(config.retry.to_middleware_config().with_on_retry(notifier));

    let mut builder = Chain::builder()
        .with(RequestIdMiddleware::new(flake))
        .with(LoggingMiddleware::new())
        .with(retry);
    if let Some(timeout) = config.retry.attempt_timeout() {
        builder = builder.with(TimeoutMiddleware::new(timeout));
    }
    let chain: Chain<ProviderRequest, String> = builder.build();
    tracing::debug!(middlewares = ?chain.names(), "Chain built");

    let token = CancellationToken::new();
    let cancel = token.clone();
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    let mut info = RequestInfo::new(provider, model_type, model, "GET");
    info.user_id = user;
    let mut ctx = CallContext::new(info).with_cancellation(token);

    let transport: Arc<dyn Handler<ProviderRequest, String>> = Arc::new(HttpTransport {
        client: reqwest::Client::new(),
        pool,
    });
    let result = chain
        .execute(&mut ctx, ProviderRequest { url }, transport)
        .await;

    signal_task.abort();
    drop(chain);
    if let Err(e) = notify_worker.await {
        tracing::warn!(error = %e, "Retry notifier worker failed");
    }

    Ok(result?)
}

async fn watch(config: &GuardConfig, path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let pool = KeyPool::from_config(&config.providers);
    log_pool(&pool);

    let (watcher, mut updates) = ConfigWatcher::new(&path);
    let _watcher = watcher.run()?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(new_config) = updates.recv() => {
                pool.reconcile(&new_config.providers);
                log_pool(&pool);
            }
            _ = &mut shutdown => break,
        }
    }
    Ok(())
}

fn log_pool(pool: &KeyPool) {
    for (provider, stats) in pool.stats() {
        tracing::info!(
            provider = %provider,
            total_keys = stats.total_keys,
            available_keys = stats.available_keys,
            total_requests = stats.total_requests,
            "Key pool state"
        );
    }
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}
