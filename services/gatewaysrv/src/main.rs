//! gatewaysrv entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use modbus_link::{ChannelPublisher, IndicatorSink, ModbusClient};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gatewaysrv::bridge::{self, LogIndicator, LogUplink};
use gatewaysrv::config::{GatewayConfig, DEFAULT_CONFIG_PATH};
use gatewaysrv::{logging, shutdown, SERVICE_NAME, SERVICE_VERSION};

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Args {
    /// Configuration file
    #[clap(short = 'c', long, default_value = DEFAULT_CONFIG_PATH, env = "GATEWAYSRV_CONFIG")]
    config: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[clap(short = 'l', long)]
    log_level: Option<String>,

    /// Only validate configuration without starting service
    #[clap(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = GatewayConfig::load(&args.config)?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    if args.validate {
        println!("Configuration OK: {}", args.config.display());
        println!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let _log_guard = logging::init(&config.logging)?;
    info!("Starting {} v{}", SERVICE_NAME, SERVICE_VERSION);

    let cancel = CancellationToken::new();
    let (publisher, publications) = ChannelPublisher::channel(config.publish_capacity);
    let (indicator, colors) = IndicatorSink::channel(config.indicator_capacity);

    let uplink_task =
        bridge::spawn_uplink_forwarder(publications, Arc::new(LogUplink), cancel.clone());
    let indicator_task = bridge::spawn_indicator_driver(
        colors,
        Arc::new(LogIndicator::default()),
        cancel.clone(),
    );

    let client = ModbusClient::init(config.modbus.clone())
        .context("Failed to create Modbus client")?
        .with_polling(config.polling.clone())
        .context("Invalid polling configuration")?
        .with_publish_sink(Arc::new(publisher))
        .with_indicator(indicator);

    // The polling loop keeps retrying in the background
    if let Err(e) = client.start().await {
        warn!("Initial connection to {}:{} failed: {}", config.modbus.host, config.modbus.port, e);
    }

    let signal = shutdown::wait_for_shutdown().await;
    info!("Received {}, shutting down", signal);

    client.destroy().await;
    cancel.cancel();

    match uplink_task.await {
        Ok(sent) => info!("Forwarded {} publications", sent),
        Err(e) => error!("Uplink forwarder failed: {}", e),
    }
    if let Err(e) = indicator_task.await {
        error!("Indicator driver failed: {}", e);
    }

    info!("{} stopped", SERVICE_NAME);
    Ok(())
}
