//! Broker connections used by the probe engine
//!
//! The engine never talks to a broker directly. It asks a [`Connector`] for
//! [`Session`]s, one per client identity, and drives them through
//! subscribe/publish/teardown.
//!
//! ## Implementations
//!
//! - **MQTT** ([`mqtt::MqttConnector`]): real brokers over TCP or TLS
//! - **In-memory** ([`memory::MemoryBroker`]): loopback broker with fault
//!   injection, for tests

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::{Host, Url};

use crate::config::ResolvedProbeConfig;
use crate::error::{ProbeError, ProbeResult};

pub mod memory;
pub mod mqtt;
pub mod tls;

/// A message delivered to a subscriber session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

/// Receiving end of a session's inbound hand-off channel
pub type InboundReceiver = mpsc::UnboundedReceiver<InboundMessage>;

/// Which side of the round trip a session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Publisher,
    Subscriber,
}

impl ClientRole {
    /// Client id derived from the probe's prefix (`<prefix>-p` / `<prefix>-s`)
    pub fn client_id(self, prefix: &str) -> String {
        match self {
            ClientRole::Publisher => format!("{prefix}-p"),
            ClientRole::Subscriber => format!("{prefix}-s"),
        }
    }
}

impl std::fmt::Display for ClientRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientRole::Publisher => write!(f, "publisher"),
            ClientRole::Subscriber => write!(f, "subscriber"),
        }
    }
}

/// Factory for broker sessions
///
/// Implementations must be `Send + Sync`: one connector is shared by every
/// probe actor.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a session for `client_id` against the target's broker
    ///
    /// Fails with [`ProbeError::Connect`] when the handshake is refused or
    /// has not completed by `deadline`. Never retries.
    async fn connect(
        &self,
        target: &ResolvedProbeConfig,
        client_id: &str,
        deadline: Instant,
    ) -> ProbeResult<Box<dyn Session>>;
}

/// A live connection owned by a single probe cycle
#[async_trait]
pub trait Session: Send {
    /// Subscribe at QoS 0 and wait for the broker's acknowledgement
    async fn subscribe(&mut self, topic: &str) -> ProbeResult<()>;

    /// Publish at QoS 0 and wait until the broker side has taken the message
    async fn publish(&mut self, topic: &str, payload: String) -> ProbeResult<()>;

    /// Take the inbound message channel (only the first call returns it)
    fn take_inbound(&mut self) -> Option<InboundReceiver>;

    async fn unsubscribe(&mut self, topic: &str) -> ProbeResult<()>;

    async fn disconnect(self: Box<Self>) -> ProbeResult<()>;
}

/// Host, port and transport parsed from a broker URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerEndpoint {
    pub fn parse(broker_url: &str) -> ProbeResult<Self> {
        let url = Url::parse(broker_url)
            .map_err(|e| ProbeError::Connect(format!("invalid broker url '{broker_url}': {e}")))?;

        let (tls, default_port) = match url.scheme() {
            "tcp" | "mqtt" => (false, 1883),
            "ssl" | "tls" | "tcps" | "mqtts" => (true, 8883),
            scheme => {
                return Err(ProbeError::Connect(format!(
                    "unsupported broker url scheme '{scheme}'"
                )));
            }
        };

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => {
                return Err(ProbeError::Connect(format!(
                    "broker url '{broker_url}' has no host"
                )));
            }
        };

        Ok(Self {
            host,
            port: url.port().unwrap_or(default_port),
            tls,
        })
    }
}
