//! droverd binary entry point.
//!
//! A worker that drains a commands stream and routes outcomes. Ships with
//! the sink handler, which marks every command all-done; deployments with
//! real business logic embed the library crates and provide their own
//! handler instead.

use std::sync::Arc;

use clap::Parser;
use drover::{CommandController, SinkHandler};
use drover_redis::{BrokerConfig, BrokerResult, RedisQueue};
use tracing::{error, info};

/// droverd: bounded-concurrency command worker over Redis Streams.
#[derive(Parser, Debug)]
#[command(name = "droverd")]
#[command(about = "Bounded-concurrency command worker over Redis Streams")]
struct Args {
    /// Redis connection URL.
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Key prefix for the commands, completion, and errors streams.
    #[arg(long, env = "DROVER_NAMESPACE", default_value = "drover")]
    namespace: String,

    /// Maximum number of commands dispatched concurrently.
    #[arg(long, env = "DROVER_MAX_CONCURRENCY", default_value = "4")]
    max_concurrency: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> BrokerResult<()> {
    let args = Args::parse();

    drover_redis::logging::init("droverd", &args.log_level);

    info!("droverd starting...");

    let config = BrokerConfig::new(args.redis_url, args.namespace);
    info!(
        redis_url = %config.redis_url,
        commands = %config.commands_stream(),
        completion = %config.completion_stream(),
        errors = %config.errors_stream(),
        consumer = %config.consumer,
        max_concurrency = args.max_concurrency,
        "configuration loaded"
    );

    let cmds = Arc::new(RedisQueue::connect(&config, config.commands_stream()).await?);
    let errors = Arc::new(RedisQueue::connect(&config, config.errors_stream()).await?);
    let completion = Arc::new(RedisQueue::connect(&config, config.completion_stream()).await?);

    let controller = CommandController::new(
        args.max_concurrency,
        cmds,
        errors,
        completion,
        Arc::new(SinkHandler),
    )
    .await?;

    let ctrl_c = tokio::signal::ctrl_c();

    tokio::select! {
        result = controller.start() => {
            if let Err(e) = result {
                error!(error = %e, "worker exited with error");
                return Err(e.into());
            }
        }
        _ = ctrl_c => {
            info!("received shutdown signal, exiting...");
        }
    }

    Ok(())
}
