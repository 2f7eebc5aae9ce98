//! Probe execution engine
//!
//! One call to [`Prober::run_cycle`] performs a full round trip against a
//! broker:
//!
//! ```text
//! Idle → Connecting → Subscribing → Probing → TearingDown → Completed
//!             │             │                      ↑
//!             └──── Failed ─┴──────────────────────┘
//! ```
//!
//! Nothing that goes wrong inside a cycle escapes it. Connect and subscribe
//! failures are counted as errors, missed deadlines are counted as timeouts,
//! and teardown problems are only logged.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, sleep_until, timeout, timeout_at};
use tracing::{debug, error, instrument, trace, warn};

use crate::actors::messages::{CycleOutcome, CycleReport};
use crate::broker::{ClientRole, Connector, InboundReceiver, Session};
use crate::config::ResolvedProbeConfig;
use crate::error::{ProbeError, ProbeResult};
use crate::metrics::{ProbeMetrics, TargetMetrics};

/// Grace period for each unsubscribe/disconnect during teardown
pub const TEARDOWN_GRACE: Duration = Duration::from_secs(1);

/// States a cycle moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePhase {
    Idle,
    Connecting,
    Subscribing,
    Probing,
    TearingDown,
    Completed,
    Failed,
}

/// Sessions opened so far in a cycle
///
/// Every session that makes it in here is torn down, however the cycle ends.
#[derive(Default)]
struct Sessions {
    publisher: Option<Box<dyn Session>>,
    subscriber: Option<Box<dyn Session>>,
    subscribed: bool,
}

#[derive(Debug, Default)]
struct PublishTally {
    published: usize,
    timeouts: usize,
}

#[derive(Debug, Default)]
struct CollectTally {
    received: usize,
    timed_out: bool,
}

/// Runs probe cycles for one target
pub struct Prober {
    config: ResolvedProbeConfig,
    connector: Arc<dyn Connector>,
    metrics: TargetMetrics,
}

impl Prober {
    pub fn new(
        config: ResolvedProbeConfig,
        connector: Arc<dyn Connector>,
        metrics: &ProbeMetrics,
    ) -> Self {
        let metrics = metrics.target(&config.name, &config.broker_url);
        Self {
            config,
            connector,
            metrics,
        }
    }

    pub fn config(&self) -> &ResolvedProbeConfig {
        &self.config
    }

    pub fn metrics(&self) -> &TargetMetrics {
        &self.metrics
    }

    /// Run one complete probe cycle
    #[instrument(skip(self), fields(probe = %self.config.name, broker = %self.config.broker_url))]
    pub async fn run_cycle(&self) -> CycleReport {
        let timer = self.metrics.start_cycle();
        let mut report = CycleReport {
            probe: self.config.name.clone(),
            broker: self.config.broker_url.clone(),
            started_at: Utc::now(),
            outcome: CycleOutcome::Success,
            published: 0,
            publish_timeouts: 0,
            received: 0,
            duration: Duration::ZERO,
        };

        let mut sessions = Sessions::default();
        let mut phase = ProbePhase::Idle;

        if let Err(e) = self.execute(&mut sessions, &mut phase, &mut report).await {
            self.metrics.errors.inc();
            error!("probe {}: {}", self.config.name, e);
            report.outcome = CycleOutcome::Failed { phase, error: e };
            phase = ProbePhase::Failed;
        }

        trace!(from = ?phase, phase = ?ProbePhase::TearingDown);
        self.teardown(sessions).await;

        trace!(phase = ?ProbePhase::Completed);
        report.duration = timer.started().elapsed();
        report
    }

    async fn execute(
        &self,
        sessions: &mut Sessions,
        phase: &mut ProbePhase,
        report: &mut CycleReport,
    ) -> ProbeResult<()> {
        let setup_deadline = Instant::now() + self.config.setup_timeout;

        *phase = ProbePhase::Connecting;
        trace!(phase = ?phase);
        let publisher = sessions
            .publisher
            .insert(self.connect(ClientRole::Publisher, setup_deadline).await?);
        let subscriber = sessions
            .subscriber
            .insert(self.connect(ClientRole::Subscriber, setup_deadline).await?);

        *phase = ProbePhase::Subscribing;
        trace!(phase = ?phase);
        match timeout_at(setup_deadline, subscriber.subscribe(&self.config.topic)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ProbeError::Subscribe(
                    "timed out waiting for subscription acknowledgement".to_string(),
                ));
            }
        }
        sessions.subscribed = true;

        let inbound = subscriber
            .take_inbound()
            .ok_or_else(|| ProbeError::Subscribe("inbound channel already taken".to_string()))?;

        *phase = ProbePhase::Probing;
        trace!(phase = ?phase);
        let probe_deadline = Instant::now() + self.config.probe_timeout;
        let (publish, collect) = tokio::join!(
            self.publish_batch(&mut **publisher, probe_deadline),
            self.collect(inbound, probe_deadline),
        );

        report.published = publish.published;
        report.publish_timeouts = publish.timeouts;
        report.received = collect.received;
        if collect.timed_out {
            report.outcome = CycleOutcome::TimedOut;
        }

        Ok(())
    }

    async fn connect(&self, role: ClientRole, deadline: Instant) -> ProbeResult<Box<dyn Session>> {
        let client_id = role.client_id(&self.config.client_prefix);
        trace!("connecting {role} as {client_id}");

        self.connector
            .connect(&self.config, &client_id, deadline)
            .await
            .inspect(|_| debug!("{role} connected"))
    }

    /// Publish the whole batch; individual timeouts never stop it
    async fn publish_batch(&self, publisher: &mut dyn Session, deadline: Instant) -> PublishTally {
        let mut tally = PublishTally::default();

        for i in 0..self.config.messages {
            let text = format!("this is msg #{i}!");
            match timeout_at(deadline, publisher.publish(&self.config.topic, text)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("publishing message #{i} failed: {e}"),
                Err(_) => {
                    self.metrics.publish_timeouts.inc();
                    tally.timeouts += 1;
                }
            }
            self.metrics.published.inc();
            tally.published += 1;
        }

        tally
    }

    /// Count arrivals until the batch is complete or the deadline passes
    async fn collect(&self, mut inbound: InboundReceiver, deadline: Instant) -> CollectTally {
        let mut tally = CollectTally::default();
        let expired = sleep_until(deadline);
        tokio::pin!(expired);

        while tally.received < self.config.messages {
            tokio::select! {
                Some(message) = inbound.recv() => {
                    trace!(topic = %message.topic, "received: {}", message.payload);
                    self.metrics.received.inc();
                    tally.received += 1;
                }
                _ = &mut expired => {
                    self.metrics.timeouts.inc();
                    tally.timed_out = true;
                    debug!(
                        "probe timed out after receiving {} of {} messages",
                        tally.received, self.config.messages
                    );
                    break;
                }
            }
        }

        tally
    }

    async fn teardown(&self, sessions: Sessions) {
        let Sessions {
            publisher,
            subscriber,
            subscribed,
        } = sessions;

        if let Some(mut subscriber) = subscriber {
            if subscribed {
                match timeout(TEARDOWN_GRACE, subscriber.unsubscribe(&self.config.topic)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!("unsubscribe failed: {e}"),
                    Err(_) => debug!("unsubscribe timed out"),
                }
            }
            self.disconnect(ClientRole::Subscriber, subscriber).await;
        }

        if let Some(publisher) = publisher {
            self.disconnect(ClientRole::Publisher, publisher).await;
        }
    }

    async fn disconnect(&self, role: ClientRole, session: Box<dyn Session>) {
        match timeout(TEARDOWN_GRACE, session.disconnect()).await {
            Ok(Ok(())) => trace!("{role} disconnected"),
            Ok(Err(e)) => debug!("{role} disconnect failed: {e}"),
            Err(_) => debug!("{role} disconnect timed out"),
        }
    }
}
