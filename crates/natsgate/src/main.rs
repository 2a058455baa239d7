//! natsgate binary.
//!
//! # Environment variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `NATSGATE_CONFIG` | `config/natsgate.toml` | Route and server configuration |
//! | `NATSGATE_LISTEN` | `0.0.0.0:8080` | Listen address (overrides the file) |
//! | `NATSGATE_CONNECT_TIMEOUT_SECS` | `10` | Per-server connect timeout |
//! | `NATS_URL`, `NATS_CREDS`, `NATS_NKEY`, `NATS_USER`, `NATS_PASSWORD`, `NATS_TOKEN` | | `default` server when the file has none |
//! | `RUST_LOG` | `info` | Log filter (tracing-subscriber) |

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use natsgate::config::Config;
use natsgate::registry::connect_all;
use natsgate::server::{router, serve};
use natsgate::subscribe::ReverseBridge;
use natsgate_nats::SystemEnv;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "NATSGATE_CONFIG", default_value = "config/natsgate.toml")]
    config: String,

    /// Listen address (overrides config file)
    #[arg(long, env = "NATSGATE_LISTEN")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "natsgate=debug,natsgate_nats=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = if Path::new(&args.config).exists() {
        info!(path = %args.config, "Loading config from file");
        Config::from_file(&args.config)?
    } else {
        warn!(path = %args.config, "Config file not found, no routes configured");
        Config::default()
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let env = SystemEnv;
    for alias in config.unknown_aliases(&env) {
        warn!(alias = %alias, "Route refers to an unknown NATS server; its requests will fail");
    }

    let registry = connect_all(&config.nats_servers(&env), config.connect_timeout(&env))
        .await
        .context("Failed to connect to NATS")?;
    let registry = Arc::new(registry);

    let upstream = reqwest::Client::new();
    for route in &config.subscribe {
        let bridge = ReverseBridge::new(&registry, upstream.clone(), route.subscribe_config())
            .with_context(|| format!("Invalid subscribe route for '{}'", route.subject))?;
        let subject = route.subject.clone();
        tokio::spawn(async move {
            if let Err(e) = bridge.run().await {
                error!(subject = %subject, error = %e, "Reverse bridge stopped");
            }
        });
    }

    let addr: SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("Invalid listen address: {}", config.listen))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    serve(listener, router(registry, &config)).await?;
    info!("natsgate stopped");
    Ok(())
}
