//! Helper functions for integration tests

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use mqtt_blackbox::{
    broker::{Connector, Session, memory::MemoryBroker},
    config::{ProbeConfig, ResolvedProbeConfig},
    error::{ProbeError, ProbeResult},
    metrics::ProbeMetrics,
};
use prometheus::Registry;
use tokio::time::Instant;

pub const MEMORY_BROKER: &str = "tcp://memory:1883";

pub fn create_probe_config(name: &str, messages: usize, interval: Duration) -> ProbeConfig {
    ProbeConfig {
        name: name.to_string(),
        broker_url: MEMORY_BROKER.to_string(),
        topic: format!("blackbox/{name}"),
        client_prefix: format!("blackbox-{name}"),
        username: None,
        password: None,
        client_cert: None,
        client_key: None,
        ca_chain: None,
        messages,
        interval: Some(interval),
        setup_timeout: Some(Duration::from_secs(5)),
        probe_timeout: Some(Duration::from_secs(5)),
    }
}

pub fn create_resolved_config(name: &str, messages: usize) -> ResolvedProbeConfig {
    create_probe_config(name, messages, Duration::from_secs(60)).resolve()
}

pub fn create_metrics() -> ProbeMetrics {
    ProbeMetrics::new(&Registry::new()).unwrap()
}

/// Connector that picks a memory broker by the target's broker URL
#[derive(Default)]
pub struct RoutedConnector {
    brokers: HashMap<String, MemoryBroker>,
}

impl RoutedConnector {
    pub fn with_broker(mut self, broker_url: &str, broker: MemoryBroker) -> Self {
        self.brokers.insert(broker_url.to_string(), broker);
        self
    }
}

#[async_trait]
impl Connector for RoutedConnector {
    async fn connect(
        &self,
        target: &ResolvedProbeConfig,
        client_id: &str,
        deadline: Instant,
    ) -> ProbeResult<Box<dyn Session>> {
        match self.brokers.get(&target.broker_url) {
            Some(broker) => broker.connect(target, client_id, deadline).await,
            None => Err(ProbeError::Connect(format!(
                "no route to {}",
                target.broker_url
            ))),
        }
    }
}
