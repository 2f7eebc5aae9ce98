//! MQTT sessions backed by rumqttc
//!
//! ## Message Flow
//!
//! ```text
//! broker ⇄ EventLoop (driver task) ─┬─ PUBLISH ──────────────────→ inbound channel → engine
//!                                   └─ SUBACK / UNSUBACK / sent ─→ ack channel → MqttSession
//! ```
//!
//! The driver stops at the first connection error, so sessions never
//! reconnect on their own. A new cycle always starts with fresh sessions.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, SubscribeReasonCode, TlsConfiguration, Transport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, instrument, trace};

use crate::config::ResolvedProbeConfig;
use crate::error::{ProbeError, ProbeResult};

use super::{BrokerEndpoint, Connector, InboundMessage, InboundReceiver, Session, tls};

const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

const DEFAULT_REQUEST_CAPACITY: usize = 64;

/// Notifications from the driver task that a session waits on
#[derive(Debug)]
enum Ack {
    Subscribed { granted: bool },
    Unsubscribed,
    Published,
}

/// Connector for real MQTT brokers
#[derive(Debug, Clone)]
pub struct MqttConnector {
    keep_alive: Duration,
    request_capacity: usize,
}

impl MqttConnector {
    pub fn new() -> Self {
        Self {
            keep_alive: DEFAULT_KEEP_ALIVE,
            request_capacity: DEFAULT_REQUEST_CAPACITY,
        }
    }

    fn options(&self, target: &ResolvedProbeConfig, client_id: &str) -> ProbeResult<MqttOptions> {
        let endpoint = BrokerEndpoint::parse(&target.broker_url)?;

        // rumqttc panics on these
        if client_id.is_empty() || client_id.starts_with(' ') {
            return Err(ProbeError::Connect(format!("invalid client id '{client_id}'")));
        }

        let mut options = MqttOptions::new(client_id, endpoint.host, endpoint.port);
        options
            .set_keep_alive(self.keep_alive)
            .set_clean_session(true);

        if let Some(username) = &target.username {
            options.set_credentials(username, target.password.clone().unwrap_or_default());
        }

        if endpoint.tls {
            let config = tls::client_config(&target.tls);
            options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(config)));
        }

        Ok(options)
    }
}

impl Default for MqttConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MqttConnector {
    #[instrument(skip(self, target, deadline), fields(broker = %target.broker_url))]
    async fn connect(
        &self,
        target: &ResolvedProbeConfig,
        client_id: &str,
        deadline: Instant,
    ) -> ProbeResult<Box<dyn Session>> {
        let options = self.options(target, client_id)?;
        let (client, mut eventloop) = AsyncClient::new(options, self.request_capacity);

        timeout_at(deadline, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| ProbeError::Connect("reached connect timeout".to_string()))??;

        trace!("connected");

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(eventloop, client_id.to_string(), inbound_tx, ack_tx));

        Ok(Box::new(MqttSession {
            client,
            driver,
            inbound: Some(inbound_rx),
            acks: ack_rx,
            publishes_requested: 0,
            publishes_sent: 0,
        }))
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> ProbeResult<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(ProbeError::Connect(format!("broker refused connection: {code:?}"))),
                };
            }
            Ok(_) => continue,
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(ProbeError::Connect(format!("broker refused connection: {code:?}")));
            }
            Err(e) => return Err(ProbeError::Connect(e.to_string())),
        }
    }
}

/// Poll the event loop until the connection ends
async fn drive(
    mut eventloop: EventLoop,
    client_id: String,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    ack_tx: mpsc::UnboundedSender<Ack>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic,
                    payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                };
                // the engine may already have stopped collecting
                let _ = inbound_tx.send(message);
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let granted = !ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                let _ = ack_tx.send(Ack::Subscribed { granted });
            }
            Ok(Event::Incoming(Packet::UnsubAck(_))) => {
                let _ = ack_tx.send(Ack::Unsubscribed);
            }
            Ok(Event::Outgoing(Outgoing::Publish(_))) => {
                let _ = ack_tx.send(Ack::Published);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                trace!(client = %client_id, "disconnect sent");
                break;
            }
            Ok(event) => trace!(client = %client_id, "mqtt event: {event:?}"),
            Err(e) => {
                debug!(client = %client_id, "connection closed: {e}");
                break;
            }
        }
    }
}

/// A connected rumqttc client plus its driver task
pub struct MqttSession {
    client: AsyncClient,
    driver: JoinHandle<()>,
    inbound: Option<InboundReceiver>,
    acks: mpsc::UnboundedReceiver<Ack>,

    // QoS 0 publishes carry no packet id, so confirmations are matched by count
    publishes_requested: u64,
    publishes_sent: u64,
}

impl MqttSession {
    fn closed() -> String {
        "connection closed".to_string()
    }
}

#[async_trait]
impl Session for MqttSession {
    async fn subscribe(&mut self, topic: &str) -> ProbeResult<()> {
        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| ProbeError::Subscribe(e.to_string()))?;

        loop {
            match self.acks.recv().await {
                Some(Ack::Subscribed { granted: true }) => return Ok(()),
                Some(Ack::Subscribed { granted: false }) => {
                    return Err(ProbeError::Subscribe(format!(
                        "broker rejected subscription to '{topic}'"
                    )));
                }
                Some(Ack::Published) => self.publishes_sent += 1,
                Some(Ack::Unsubscribed) => continue,
                None => return Err(ProbeError::Subscribe(Self::closed())),
            }
        }
    }

    async fn publish(&mut self, topic: &str, payload: String) -> ProbeResult<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| ProbeError::Publish(e.to_string()))?;
        self.publishes_requested += 1;

        while self.publishes_sent < self.publishes_requested {
            match self.acks.recv().await {
                Some(Ack::Published) => self.publishes_sent += 1,
                Some(_) => continue,
                None => return Err(ProbeError::Publish(Self::closed())),
            }
        }

        Ok(())
    }

    fn take_inbound(&mut self) -> Option<InboundReceiver> {
        self.inbound.take()
    }

    async fn unsubscribe(&mut self, topic: &str) -> ProbeResult<()> {
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| ProbeError::Teardown(e.to_string()))?;

        loop {
            match self.acks.recv().await {
                Some(Ack::Unsubscribed) => return Ok(()),
                Some(Ack::Published) => self.publishes_sent += 1,
                Some(Ack::Subscribed { .. }) => continue,
                None => return Err(ProbeError::Teardown(Self::closed())),
            }
        }
    }

    async fn disconnect(mut self: Box<Self>) -> ProbeResult<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| ProbeError::Teardown(e.to_string()))?;

        (&mut self.driver)
            .await
            .map_err(|e| ProbeError::Teardown(e.to_string()))
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
