use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mqtt_blackbox::{
    api::{parse_listen_address, spawn_metrics_server},
    broker::mqtt::MqttConnector,
    config::read_config_file,
    metrics::ProbeMetrics,
    scheduler::Scheduler,
};
use prometheus::Registry;
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Blackbox prober for MQTT brokers")]
struct Args {
    /// Config file
    #[arg(long = "config.file", env = "MQTT_BLACKBOX_CONFIG", default_value = "config.yaml")]
    config_file: String,

    /// Address to serve the metrics on
    #[arg(
        long = "web.listen-address",
        env = "MQTT_BLACKBOX_LISTEN_ADDRESS",
        default_value = ":9214",
        value_parser = parse_listen_address
    )]
    listen_address: SocketAddr,

    /// Log MQTT protocol traffic
    #[arg(long = "trace.enable", env = "MQTT_BLACKBOX_TRACE")]
    trace: bool,
}

fn init(trace: bool) {
    let mqtt_level = if trace {
        LevelFilter::TRACE
    } else {
        LevelFilter::ERROR
    };

    let filter = filter::Targets::new().with_targets(vec![
        ("mqtt_blackbox", LevelFilter::INFO),
        ("mqtt_blackbox_exporter", LevelFilter::DEBUG),
        ("rumqttc", mqtt_level),
        ("tower_http", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    init(args.trace);
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.config_file)?;
    info!("loaded {} probes from {}", config.probes.len(), args.config_file);

    let registry = Registry::new();
    #[cfg(target_os = "linux")]
    {
        use prometheus::process_collector::ProcessCollector;
        registry
            .register(Box::new(ProcessCollector::for_self()))
            .context("failed to register process collector")?;
    }

    let metrics = ProbeMetrics::new(&registry).context("failed to register probe metrics")?;

    let scheduler = Scheduler::start(config.probes, Arc::new(MqttConnector::new()), &metrics);

    spawn_metrics_server(args.listen_address, metrics).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    scheduler.shutdown().await;

    Ok(())
}
