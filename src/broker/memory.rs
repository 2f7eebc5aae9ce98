//! In-memory broker (no network)
//!
//! Routes publishes to matching subscriptions inside the process. It's useful
//! for:
//! - Testing the probe engine and scheduler without a running broker
//! - Injecting faults that are hard to provoke on a real broker
//!
//! ## Fault knobs
//!
//! - `set_online(false)`: connects are refused
//! - `set_stall_connects(true)`: connects hang until the deadline
//! - `set_reject_subscriptions(true)`: SUBSCRIBE is answered with a failure
//! - `set_deliver(false)`: publishes are accepted but never routed
//! - `set_stall_publishes(true)`: publishes are never confirmed
//! - `refuse_clients_ending_with("-s")`: only matching client ids are refused

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::trace;

use crate::config::ResolvedProbeConfig;
use crate::error::{ProbeError, ProbeResult};

use super::{Connector, InboundMessage, InboundReceiver, Session};

#[derive(Debug)]
struct Subscription {
    session: u64,
    filter: String,
    sender: mpsc::UnboundedSender<InboundMessage>,
}

#[derive(Debug)]
struct BrokerState {
    online: bool,
    stall_connects: bool,
    reject_subscriptions: bool,
    deliver: bool,
    stall_publishes: bool,
    refused_suffix: Option<String>,

    next_session: u64,
    /// Live sessions by id, with their client id
    sessions: HashMap<u64, String>,
    subscriptions: Vec<Subscription>,
    connection_history: Vec<String>,
    published: usize,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            online: true,
            stall_connects: false,
            reject_subscriptions: false,
            deliver: true,
            stall_publishes: false,
            refused_suffix: None,
            next_session: 0,
            sessions: HashMap::new(),
            subscriptions: Vec::new(),
            connection_history: Vec::new(),
            published: 0,
        }
    }
}

/// Loopback broker shared by all sessions it hands out
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_online(&self, online: bool) {
        self.state().online = online;
    }

    pub fn set_stall_connects(&self, stall: bool) {
        self.state().stall_connects = stall;
    }

    pub fn set_reject_subscriptions(&self, reject: bool) {
        self.state().reject_subscriptions = reject;
    }

    pub fn set_deliver(&self, deliver: bool) {
        self.state().deliver = deliver;
    }

    pub fn set_stall_publishes(&self, stall: bool) {
        self.state().stall_publishes = stall;
    }

    /// Refuse connects whose client id ends with `suffix`
    pub fn refuse_clients_ending_with(&self, suffix: impl Into<String>) {
        self.state().refused_suffix = Some(suffix.into());
    }

    /// Client ids of the sessions that are currently connected
    pub fn connected_clients(&self) -> Vec<String> {
        let mut clients: Vec<_> = self.state().sessions.values().cloned().collect();
        clients.sort();
        clients
    }

    /// Client ids of every connection ever accepted, in order
    pub fn connection_history(&self) -> Vec<String> {
        self.state().connection_history.clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.state().subscriptions.len()
    }

    /// Number of publishes the broker accepted
    pub fn published_count(&self) -> usize {
        self.state().published
    }

    fn release(&self, session: u64) {
        let mut state = self.state();
        state.subscriptions.retain(|sub| sub.session != session);
        state.sessions.remove(&session);
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(
        &self,
        _target: &ResolvedProbeConfig,
        client_id: &str,
        deadline: Instant,
    ) -> ProbeResult<Box<dyn Session>> {
        let (online, stall) = {
            let state = self.state();
            let refused = state
                .refused_suffix
                .as_deref()
                .is_some_and(|suffix| client_id.ends_with(suffix));
            (state.online && !refused, state.stall_connects)
        };

        if !online {
            return Err(ProbeError::Connect("connection refused".to_string()));
        }
        if stall {
            let _ = timeout_at(deadline, std::future::pending::<()>()).await;
            return Err(ProbeError::Connect("reached connect timeout".to_string()));
        }

        let mut state = self.state();
        let id = state.next_session;
        state.next_session += 1;
        state.sessions.insert(id, client_id.to_string());
        state.connection_history.push(client_id.to_string());
        drop(state);

        trace!(client = %client_id, "memory session opened");

        let (sender, receiver) = mpsc::unbounded_channel();
        Ok(Box::new(MemorySession {
            broker: self.clone(),
            id,
            sender,
            inbound: Some(receiver),
        }))
    }
}

/// Session on a [`MemoryBroker`]
pub struct MemorySession {
    broker: MemoryBroker,
    id: u64,
    sender: mpsc::UnboundedSender<InboundMessage>,
    inbound: Option<InboundReceiver>,
}

#[async_trait]
impl Session for MemorySession {
    async fn subscribe(&mut self, topic: &str) -> ProbeResult<()> {
        let mut state = self.broker.state();
        if state.reject_subscriptions {
            return Err(ProbeError::Subscribe(format!(
                "broker rejected subscription to '{topic}'"
            )));
        }

        state.subscriptions.push(Subscription {
            session: self.id,
            filter: topic.to_string(),
            sender: self.sender.clone(),
        });
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: String) -> ProbeResult<()> {
        let stall = {
            let mut state = self.broker.state();
            if !state.stall_publishes {
                state.published += 1;
                if state.deliver {
                    for sub in state
                        .subscriptions
                        .iter()
                        .filter(|sub| topic_matches(&sub.filter, topic))
                    {
                        let _ = sub.sender.send(InboundMessage {
                            topic: topic.to_string(),
                            payload: payload.clone(),
                        });
                    }
                }
            }
            state.stall_publishes
        };

        if stall {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn take_inbound(&mut self) -> Option<InboundReceiver> {
        self.inbound.take()
    }

    async fn unsubscribe(&mut self, topic: &str) -> ProbeResult<()> {
        let id = self.id;
        self.broker
            .state()
            .subscriptions
            .retain(|sub| !(sub.session == id && sub.filter == topic));
        Ok(())
    }

    async fn disconnect(self: Box<Self>) -> ProbeResult<()> {
        // released on drop
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.broker.release(self.id);
    }
}

/// MQTT topic filter matching with `+` and `#` wildcards
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(expected), Some(actual)) if expected == actual => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
