use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use pelletd::mqtt::{MqttClient, RumqttcClient};
use pelletd::stove::ReqwestFetch;
use pelletd::{format_diagnostics, Config, Engine};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bridge Palazzetti pellet stoves to MQTT with Home Assistant discovery
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Defaults file
    #[arg(long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Local overrides, skipped when the file does not exist
    #[arg(long, default_value = "config/local.toml")]
    local: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match Config::load(&args.config, Some(args.local.as_path())) {
        Ok((config, diagnostics)) => {
            if !diagnostics.is_empty() {
                eprint!("{}", format_diagnostics(&diagnostics.0));
            }
            config
        }
        Err(diagnostics) => {
            eprint!("{}", format_diagnostics(&diagnostics.0));
            std::process::exit(1);
        }
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.targets())
        .init();

    tracing::info!("pelletd starting");
    tracing::info!(
        "Using MQTT broker {}:{} as '{}'",
        config.mqtt.host,
        config.mqtt.port,
        config.mqtt.client_name
    );

    let mut client = RumqttcClient::new(&config.mqtt);
    let messages = client
        .connect()
        .await
        .context("Failed to connect to MQTT broker")?;
    let client = Arc::new(client);

    let fetch = ReqwestFetch::new(config.polling.http_timeout, &config.polling.user_agent)
        .context("Failed to create HTTP client")?;
    let engine = Arc::new(Engine::new(&config, client, fetch));

    tokio::select! {
        _ = engine.clone().run(messages) => {}
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("Received shutdown signal"),
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        },
    }

    engine.shutdown(SHUTDOWN_TIMEOUT).await;

    tracing::info!("pelletd shutdown complete");

    Ok(())
}
