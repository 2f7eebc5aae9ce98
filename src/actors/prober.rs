//! ProbeActor - Runs probe cycles for one target forever
//!
//! ## Message Flow
//!
//! ```text
//! Timer → run cycle → Publish CycleReport → [exporter logs, tests, ...]
//!   ↑                       │
//!   └── sleep interval ─────┘
//!   ↑
//!   └─── Commands (RunNow, Shutdown)
//! ```
//!
//! The interval is measured from the end of one cycle to the start of the
//! next, so slow cycles never overlap. Commands are only looked at between
//! cycles; a running cycle is never cancelled.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, instrument, trace, warn};

use crate::broker::Connector;
use crate::config::ResolvedProbeConfig;
use crate::metrics::ProbeMetrics;
use crate::probe::Prober;

use super::messages::{CycleOutcome, CycleReport, ProbeCommand};

/// Actor that probes a single target
pub struct ProbeActor {
    /// Cycle engine for this target
    prober: Prober,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<ProbeCommand>,

    /// Broadcast sender for publishing cycle reports
    report_tx: broadcast::Sender<CycleReport>,

    /// Pause between two cycles
    interval: Duration,
}

impl ProbeActor {
    pub fn new(
        prober: Prober,
        command_rx: mpsc::Receiver<ProbeCommand>,
        report_tx: broadcast::Sender<CycleReport>,
    ) -> Self {
        let interval = prober.config().interval;
        Self {
            prober,
            command_rx,
            report_tx,
            interval,
        }
    }

    /// Run the actor's main loop
    ///
    /// The first cycle starts immediately. The loop runs until:
    /// - A Shutdown command is received
    /// - The command channel is closed
    #[instrument(skip(self), fields(probe = %self.prober.config().name))]
    pub async fn run(mut self) {
        debug!("starting probe actor with interval {:?}", self.interval);

        let mut next_cycle = Instant::now();

        loop {
            tokio::select! {
                _ = sleep_until(next_cycle) => {
                    self.cycle().await;
                    next_cycle = Instant::now() + self.interval;
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ProbeCommand::RunNow { respond_to }) => {
                            debug!("received RunNow command");
                            let report = self.cycle().await;
                            let _ = respond_to.send(report);
                            next_cycle = Instant::now() + self.interval;
                        }

                        Some(ProbeCommand::Shutdown { respond_to }) => {
                            debug!("received shutdown command");
                            let _ = respond_to.send(());
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        debug!("probe actor stopped");
    }

    async fn cycle(&self) -> CycleReport {
        let report = self.prober.run_cycle().await;

        match &report.outcome {
            CycleOutcome::Success => debug!(
                "cycle succeeded: {}/{} messages in {:?}",
                report.received, report.published, report.duration
            ),
            CycleOutcome::TimedOut => info!(
                "cycle timed out: {}/{} messages received, {} publish timeouts",
                report.received, report.published, report.publish_timeouts
            ),
            CycleOutcome::Failed { phase, error } => {
                debug!("cycle failed while {phase:?}: {error}")
            }
        }

        // no subscribers is fine
        match self.report_tx.send(report.clone()) {
            Ok(receivers) => trace!("published cycle report to {receivers} receivers"),
            Err(_) => trace!("no receivers for cycle report"),
        }

        report
    }
}

/// Handle for controlling a ProbeActor
///
/// This handle provides a typed API for sending commands to the actor.
/// It can be cloned and shared across threads.
#[derive(Clone)]
pub struct ProbeHandle {
    /// Command sender
    sender: mpsc::Sender<ProbeCommand>,

    /// Probe name
    pub name: String,

    /// Broker URL
    pub broker: String,
}

impl ProbeHandle {
    /// Spawn a new probe actor
    ///
    /// This creates the actor, spawns it as a tokio task, and returns a handle.
    pub fn spawn(
        config: ResolvedProbeConfig,
        connector: Arc<dyn Connector>,
        metrics: &ProbeMetrics,
        report_tx: broadcast::Sender<CycleReport>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let name = config.name.clone();
        let broker = config.broker_url.clone();

        let prober = Prober::new(config, connector, metrics);
        let actor = ProbeActor::new(prober, cmd_rx, report_tx);

        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            name,
            broker,
        }
    }

    /// Run a cycle right away and wait for its report
    ///
    /// If a cycle is in progress, this one runs after it.
    pub async fn run_now(&self) -> Result<CycleReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ProbeCommand::RunNow { respond_to: tx })
            .await
            .context("failed to send RunNow command")?;

        rx.await.context("failed to receive cycle report")
    }

    /// Gracefully shut down the actor and wait until it has stopped
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ProbeCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await.context("failed to receive shutdown confirmation")
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
