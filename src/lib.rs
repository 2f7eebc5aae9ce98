pub mod actors;
pub mod api;
pub mod broker;
pub mod config;
pub mod error;
pub mod metrics;
pub mod probe;
pub mod scheduler;

pub use actors::messages::{CycleOutcome, CycleReport};
pub use error::{ConfigError, ProbeError, ProbeResult};
pub use metrics::ProbeMetrics;
pub use probe::{ProbePhase, Prober};
pub use scheduler::Scheduler;
