//! ERP gateway (v1)
//!
//! # Architecture Overview
//!
//! ```text
//!   Client Request
//!   ──────────────▶ tower-http layers ─▶ metrics ─▶ authenticate ─▶ authorize ─▶ ownership ─▶ scope ─▶ handler
//!                   (request id, trace,              │                                 │
//!                    timeout, body limit)            ▼                                 ▼
//!                                             PermissionCache ──miss──▶ MySqlStore ◀───┘
//!                                                                         │
//!                                                        CircuitBreaker → QueryTimeout → sqlx pool
//!
//!   Background: cache sweeper, pool monitor, config watcher (policy hot reload)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use erp_gateway::config::loader::load_or_default;
use erp_gateway::config::watcher::ConfigWatcher;
use erp_gateway::lifecycle::signals::trigger_on_signal;
use erp_gateway::observability::logging::init_logging;
use erp_gateway::{HttpServer, Services, Shutdown};

#[derive(Parser)]
#[command(name = "erp-gateway", version, about = "ERP authorization gateway")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is fine; the process environment may already be set.
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let config = load_or_default(args.config.as_deref())?;
    init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        environment = %config.auth.environment,
        request_timeout_secs = config.timeouts.request_secs,
        "erp-gateway starting"
    );

    let services = Arc::new(Services::build(config)?);
    let shutdown = Shutdown::new();
    let mut tasks = services.spawn_background(&shutdown);

    // Hot reload of the authorization policy. The watcher handle must stay alive.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) =
                ConfigWatcher::new(path, services.config.authz.clone());
            let (handle, task) = watcher.run(shutdown.subscribe())?;
            tasks.push(task);

            let reload_target = services.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(updated) = updates.recv().await {
                    reload_target.reload_policy(&updated);
                }
            }));
            Some(handle)
        }
        None => None,
    };

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move { trigger_on_signal(&signal_shutdown).await });

    let server = HttpServer::new(services);
    server.run(shutdown.signalled()).await?;

    shutdown.trigger();
    for task in tasks {
        let _ = task.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
