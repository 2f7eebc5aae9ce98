//! Round trips through a real MQTT broker running in-process
//!
//! These tests verify that:
//! - The rumqttc sessions subscribe, publish and receive end to end
//! - Publish confirmations keep up with large batches
//! - Sessions unsubscribe and disconnect cleanly between cycles

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use mqtt_blackbox::{
    CycleOutcome, Prober,
    broker::{ClientRole, Connector, mqtt::MqttConnector},
    config::ResolvedProbeConfig,
};
use pretty_assertions::assert_eq;
use tokio::time::{Instant, sleep, timeout};

use crate::helpers::*;

fn broker_config(port: u16) -> rumqttd::Config {
    let config = format!(
        r#"
        id = 0

        [router]
        id = 0
        max_connections = 100
        max_outgoing_packet_count = 1000
        max_segment_size = 104857600
        max_segment_count = 10

        [v4.1]
        name = "v4-1"
        listen = "127.0.0.1:{port}"
        next_connection_delay_ms = 1

            [v4.1.connections]
            connection_timeout_ms = 5000
            max_payload_size = 20480
            max_inflight_count = 500
            dynamic_filters = true
        "#
    );
    toml::from_str(&config).unwrap()
}

/// Start a broker on a free port and wait until it accepts connections
async fn start_broker() -> u16 {
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let config = broker_config(port);
    std::thread::spawn(move || {
        let mut broker = rumqttd::Broker::new(config);
        let _ = broker.start();
    });

    let ready = Instant::now() + Duration::from_secs(10);
    while tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_err() {
        assert!(Instant::now() < ready, "broker did not come up");
        sleep(Duration::from_millis(20)).await;
    }

    port
}

fn target(name: &str, port: u16, messages: usize) -> ResolvedProbeConfig {
    let mut config = create_resolved_config(name, messages);
    config.broker_url = format!("tcp://127.0.0.1:{port}");
    config
}

#[tokio::test]
async fn test_cycle_through_real_broker() {
    let port = start_broker().await;
    let metrics = create_metrics();
    let prober = Prober::new(
        target("real", port, 5),
        Arc::new(MqttConnector::new()),
        &metrics,
    );

    for _ in 0..2 {
        let report = prober.run_cycle().await;
        assert_eq!(report.outcome, CycleOutcome::Success);
        assert_eq!(report.published, 5);
        assert_eq!(report.publish_timeouts, 0);
        assert_eq!(report.received, 5);
    }

    let target = prober.metrics();
    assert_eq!(target.completed.get(), 2);
    assert_eq!(target.received.get(), 10);
    assert_eq!(target.errors.get(), 0);
}

#[tokio::test]
async fn test_large_batch_is_confirmed() {
    let port = start_broker().await;
    let metrics = create_metrics();
    let prober = Prober::new(
        target("batch", port, 200),
        Arc::new(MqttConnector::new()),
        &metrics,
    );

    let report = prober.run_cycle().await;

    assert_eq!(report.outcome, CycleOutcome::Success);
    assert_eq!(report.published, 200);
    assert_eq!(report.publish_timeouts, 0);
    assert_eq!(report.received, 200);
}

#[tokio::test]
async fn test_session_lifecycle() {
    let port = start_broker().await;
    let config = target("session", port, 1);
    let connector = MqttConnector::new();
    let deadline = Instant::now() + Duration::from_secs(5);

    let mut publisher = connector
        .connect(&config, &ClientRole::Publisher.client_id(&config.client_prefix), deadline)
        .await
        .unwrap();
    let mut subscriber = connector
        .connect(&config, &ClientRole::Subscriber.client_id(&config.client_prefix), deadline)
        .await
        .unwrap();

    subscriber.subscribe(&config.topic).await.unwrap();
    let mut inbound = subscriber.take_inbound().unwrap();
    assert!(subscriber.take_inbound().is_none());

    publisher
        .publish(&config.topic, "hello".to_string())
        .await
        .unwrap();

    let message = timeout(Duration::from_secs(5), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.topic, config.topic);
    assert_eq!(message.payload, "hello");

    subscriber.unsubscribe(&config.topic).await.unwrap();
    subscriber.disconnect().await.unwrap();
    publisher.disconnect().await.unwrap();
}
