//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to a probe actor via mpsc
//! 2. **Events**: Cycle reports broadcast to any number of subscribers
//! 3. **Immutability**: Reports are cloneable for multi-subscriber patterns

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::error::ProbeError;
use crate::probe::ProbePhase;

/// How a probe cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every published message came back before the deadline
    Success,

    /// The collection deadline fired before all messages arrived
    ///
    /// This is a degraded result, not an error.
    TimedOut,

    /// Connecting or subscribing failed; nothing was published
    Failed { phase: ProbePhase, error: ProbeError },
}

/// Summary of a single probe cycle
///
/// Broadcast after every cycle. The broadcast channel may lag or drop reports
/// for slow subscribers; the metrics remain the source of truth.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Probe name
    pub probe: String,

    /// Broker URL of the probe
    pub broker: String,

    /// When the cycle started
    pub started_at: DateTime<Utc>,

    pub outcome: CycleOutcome,

    /// Publish attempts
    pub published: usize,

    /// Publishes that were not confirmed before the probe deadline
    pub publish_timeouts: usize,

    /// Messages received by the subscriber
    pub received: usize,

    /// Wall-clock duration including teardown
    pub duration: Duration,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.outcome == CycleOutcome::Success
    }
}

/// Commands that can be sent to a ProbeActor
#[derive(Debug)]
pub enum ProbeCommand {
    /// Run a cycle immediately (bypassing the interval timer)
    ///
    /// The next scheduled cycle follows one interval after this one.
    RunNow {
        /// Channel to send the report back
        respond_to: oneshot::Sender<CycleReport>,
    },

    /// Gracefully shut down the actor
    ///
    /// A cycle that is already running finishes first.
    Shutdown {
        /// Signalled once the actor has left its loop
        respond_to: oneshot::Sender<()>,
    },
}
