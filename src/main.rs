use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tallygate::config::TallygateConfig;
use tallygate::ratelimit::{CallContext, Decision, LimiterError, RateLimiter};
use tallygate::store;

/// Probe a Tallygate rate limit from the command line.
#[derive(Debug, Parser)]
#[command(name = "tallygate", version, about)]
struct Cli {
    /// YAML configuration file; TALLYGATE__* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record requests for an identity and print each decision
    Check {
        identity: String,
        /// Number of requests to record
        #[arg(short = 'n', long, default_value_t = 1)]
        repeat: u32,
        /// Issue all requests at once instead of one after another
        #[arg(long)]
        concurrent: bool,
    },
    /// Print the time left in an identity's current window
    Ttl { identity: String },
    /// Print an identity's current count without recording a request
    Count { identity: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = TallygateConfig::load(cli.config.as_deref())?;
    info!(
        backend = ?config.store.backend,
        requests_per_unit = config.limiter.requests_per_unit,
        window = ?config.limiter.window(),
        "Configuration loaded"
    );

    let store = store::open(&config.store).await?;
    let limiter = RateLimiter::with_options(store, config.limiter.policy()?, config.limiter.options());

    let ctx = CallContext::background();
    tokio::spawn({
        let ctx = ctx.clone();
        async move {
            shutdown_signal().await;
            ctx.cancel();
        }
    });

    match cli.command {
        Command::Check {
            identity,
            repeat,
            concurrent,
        } => {
            let results = if concurrent {
                join_all((0..repeat).map(|_| limiter.check(&ctx, &identity))).await
            } else {
                let mut results = Vec::with_capacity(repeat as usize);
                for _ in 0..repeat {
                    results.push(limiter.check(&ctx, &identity).await);
                }
                results
            };

            let resets_in = limiter.time_until_reset(&ctx, &identity).await?;
            for result in results {
                println!("{}", render_check(&limiter, &identity, result, resets_in)?);
            }
        }
        Command::Ttl { identity } => {
            let resets_in = limiter.time_until_reset(&ctx, &identity).await?;
            println!(
                "{}",
                json!({
                    "identity": identity,
                    "resets_in_ms": resets_in.map(|d| d.as_millis() as u64),
                    "resets_at": resets_at(resets_in),
                })
            );
        }
        Command::Count { identity } => {
            let count = limiter.current_count(&ctx, &identity).await?;
            println!("{}", json!({ "identity": identity, "current_count": count }));
        }
    }

    Ok(())
}

fn render_check(
    limiter: &RateLimiter,
    identity: &str,
    result: Result<Decision, LimiterError>,
    resets_in: Option<Duration>,
) -> anyhow::Result<Value> {
    let threshold = limiter.policy().threshold();
    let (decision, warning) = match result {
        Ok(decision) => (decision, None),
        Err(err) => match err.decision() {
            Some(decision) => {
                warn!(error = %err, "Decision returned with an error");
                (decision, Some(err.to_string()))
            }
            None => return Err(err.into()),
        },
    };

    let report = CheckReport {
        identity,
        decision,
        remaining: decision.remaining(threshold),
        resets_at: resets_at(resets_in),
        warning,
    };
    Ok(serde_json::to_value(report)?)
}

/// One line of `check` output.
#[derive(Debug, Serialize)]
struct CheckReport<'a> {
    identity: &'a str,
    #[serde(flatten)]
    decision: Decision,
    remaining: u64,
    resets_at: Option<String>,
    warning: Option<String>,
}

fn resets_at(resets_in: Option<Duration>) -> Option<String> {
    let resets_in = chrono::Duration::from_std(resets_in?).ok()?;
    Some((chrono::Utc::now() + resets_in).to_rfc3339())
}

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling in-flight checks");
        }
        _ = terminate => {
            info!("Received SIGTERM, cancelling in-flight checks");
        }
    }
}
