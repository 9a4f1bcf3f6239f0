use anyhow::Result;
use clap::Parser;
use request_governor::config::Config;
use request_governor::{
    generate_smart_cache_key, Governed, OperationError, RateLimitHandler, ThrottlePreset, Throttler, TracingNotifier,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Drive simulated calls through the request governor.
#[derive(Debug, Parser)]
#[command(name = "governor-sim", version)]
struct Args {
    /// Throttle preset: analytics, dashboard, activities or realtime
    #[arg(long, default_value = "analytics")]
    preset: ThrottlePreset,

    /// Throttle key; defaults to the preset name
    #[arg(long)]
    key: Option<String>,

    /// Number of calls to issue
    #[arg(long, default_value_t = 5)]
    calls: u32,

    /// Fail this many underlying calls with HTTP 429 before succeeding
    #[arg(long, default_value_t = 0)]
    fail_with_429: u32,

    /// Issue all calls at once instead of one after another
    #[arg(long)]
    concurrent: bool,

    /// Simulated latency of each underlying call in milliseconds
    #[arg(long, default_value_t = 50)]
    latency_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("request_governor={},governor_sim={}", config.log_level, config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let key = args.key.clone().unwrap_or_else(|| args.preset.name().to_string());
    let throttle_config = args.preset.config();
    let retry_config = config.retry_config();
    retry_config.check()?;

    tracing::info!(%key, preset = %args.preset, calls = args.calls, "starting simulation");

    let throttler = Throttler::default();
    let handler = RateLimitHandler::from_config(&config, Arc::new(TracingNotifier));
    let underlying = Arc::new(AtomicU32::new(0));

    let make_op = {
        let underlying = underlying.clone();
        let fail_with_429 = args.fail_with_429;
        let latency = Duration::from_millis(args.latency_ms);
        move || {
            let underlying = underlying.clone();
            move || {
                let underlying = underlying.clone();
                async move {
                    tokio::time::sleep(latency).await;
                    let n = underlying.fetch_add(1, Ordering::SeqCst) + 1;
                    if n <= fail_with_429 {
                        Err(OperationError::from_response(Some(429), "Too Many Requests", Some("1")))
                    } else {
                        Ok(serde_json::json!({ "success": true, "call": n }))
                    }
                }
            }
        }
    };

    let run_one = |index: u32| {
        let throttler = throttler.clone();
        let handler = handler.clone();
        let key = key.clone();
        let op = make_op();
        let retry_op = make_op();
        async move {
            let outcome = match throttler.throttle_request(&key, op, throttle_config).await {
                Ok(value) => Ok(Governed::Fresh(value)),
                Err(request_governor::GovernorError::Operation(err)) if err.is_rate_limit() => {
                    handler.recover_or_fallback(err, &key, retry_op, &retry_config).await
                }
                Err(err) => Err(err),
            };
            match outcome {
                Ok(Governed::Fresh(value)) => println!("call {}: {}", index, value),
                Ok(Governed::Fallback(payload)) => println!("call {}: fallback {}", index, payload.to_value()),
                Err(err) => println!("call {}: error: {}", index, err),
            }
        }
    };

    if args.concurrent {
        futures::future::join_all((1..=args.calls).map(run_one)).await;
    } else {
        for index in 1..=args.calls {
            run_one(index).await;
        }
    }

    let cache_key = generate_smart_cache_key(&key, &serde_json::json!({ "calls": args.calls }), config.cache_window())?;
    let report = serde_json::json!({
        "cache_key": cache_key,
        "underlying_calls": underlying.load(Ordering::SeqCst),
        "status": throttler.status_with(&key, &throttle_config)?,
        "metrics": throttler.metrics().get_global_metrics().await,
        "rate_limit_stats": handler.stats()?,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
