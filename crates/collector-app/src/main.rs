mod service;

use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ble_client::{default_adapter, BleLink};
use collector_app::CollectorConfig;
use daylight::{DaylightScheduler, SolarCalculator, SystemClock};
use discovery::BleScanner;
use mqtt_publisher::{LogPublisher, MqttPublisher, PublishTransport};
use poller::{DeviceSession, PollLoop};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = service::config_arg(env::args().skip(1));
    let config = CollectorConfig::load_with_path(config_path).context("load config failed")?;
    config.validate().context("config validation failed")?;

    if let Some(addr) = &config.metrics_addr {
        install_metrics_exporter(addr).context("metrics exporter init failed")?;
    }

    let adapter = default_adapter()
        .await
        .context("bluetooth adapter unavailable")?;
    let finder = BleScanner::new(adapter.clone(), config.discovery.clone());
    let link = BleLink::new(adapter, config.link.clone());

    let publisher: Box<dyn PublishTransport> = match config.mqtt_config() {
        Some(mqtt) => {
            info!(host = %mqtt.host, port = mqtt.port, "connecting to mqtt broker");
            Box::new(MqttPublisher::connect(mqtt).await)
        }
        None => {
            warn!("no mqtt host configured, records are only logged");
            Box::new(LogPublisher)
        }
    };

    let scheduler = DaylightScheduler::new(
        config.location().context("invalid location")?,
        Box::new(SolarCalculator),
        Box::new(SystemClock),
        config.location.sunrise_offset_days,
    );
    let session = DeviceSession::new(Box::new(link), config.session.clone());
    let poll_loop = PollLoop::new(
        config.poller.clone(),
        Box::new(finder),
        session,
        publisher,
        scheduler,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    service::notify_ready();
    let watchdog_handle = service::spawn_watchdog(shutdown_rx.clone());

    info!(device = %config.poller.device_name, "collector started");
    let poller = poll_loop.run(shutdown_rx);
    tokio::pin!(poller);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("user interrupted the collector"),
                Err(err) => warn!(error = %err, "signal handler failed"),
            }
            let _ = shutdown_tx.send(true);
            poller.await;
        }
        _ = &mut poller => {
            warn!("poller exited");
        }
    }

    service::notify_stopping();
    let _ = shutdown_tx.send(true);
    if let Some(handle) = watchdog_handle {
        let _ = handle.await;
    }
    Ok(())
}

fn install_metrics_exporter(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr.parse().context("parse metrics address")?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("install prometheus exporter")?;
    info!(addr = %addr, "prometheus exporter listening");
    Ok(())
}
