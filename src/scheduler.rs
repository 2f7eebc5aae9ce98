//! One probe actor per configured target
//!
//! Targets are fixed for the lifetime of the process: the scheduler spawns
//! every actor once at startup and never recreates them. Actors share nothing
//! but the [`ProbeMetrics`], so a broken target cannot hold up the others.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::actors::messages::CycleReport;
use crate::actors::prober::ProbeHandle;
use crate::broker::Connector;
use crate::config::ProbeConfig;
use crate::metrics::ProbeMetrics;

const REPORT_CHANNEL_CAPACITY: usize = 256;

pub struct Scheduler {
    handles: Vec<ProbeHandle>,
    report_tx: broadcast::Sender<CycleReport>,
}

impl Scheduler {
    /// Spawn a probe actor for every target
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        probes: Vec<ProbeConfig>,
        connector: Arc<dyn Connector>,
        metrics: &ProbeMetrics,
    ) -> Self {
        let (report_tx, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        let mut seen = HashSet::new();
        let mut handles = Vec::with_capacity(probes.len());

        for probe in probes {
            let config = probe.resolve();
            if !seen.insert((config.name.clone(), config.broker_url.clone())) {
                warn!(
                    "probe {} ({}) is configured more than once, its metrics will be shared",
                    config.name, config.broker_url
                );
            }

            debug!(
                "starting probe {} against {} with interval {:?}",
                config.name, config.broker_url, config.interval
            );
            handles.push(ProbeHandle::spawn(
                config,
                connector.clone(),
                metrics,
                report_tx.clone(),
            ));
        }

        info!("scheduled {} probes", handles.len());

        Self { handles, report_tx }
    }

    pub fn handles(&self) -> &[ProbeHandle] {
        &self.handles
    }

    /// Handle of the first probe with the given name
    pub fn handle(&self, name: &str) -> Option<&ProbeHandle> {
        self.handles.iter().find(|handle| handle.name() == name)
    }

    /// Receive the report of every cycle from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CycleReport> {
        self.report_tx.subscribe()
    }

    /// Shut all actors down, waiting for in-flight cycles to finish
    pub async fn shutdown(self) {
        let results = join_all(self.handles.iter().map(|handle| handle.shutdown())).await;

        for (handle, result) in self.handles.iter().zip(results) {
            if let Err(e) = result {
                error!("probe {}: {e:#}", handle.name());
            }
        }

        info!("all probes stopped");
    }
}
