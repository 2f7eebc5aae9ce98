//! Actor-based probe scheduling
//!
//! Each configured target gets its own [`prober::ProbeActor`], running as an
//! independent tokio task and controlled through a [`prober::ProbeHandle`].
//!
//! ## Architecture Overview
//!
//! ```text
//!                 ┌────────────────────┐
//!                 │ Scheduler (main)   │
//!                 └─────────┬──────────┘
//!                           │ spawns
//!              ┌────────────┼────────────┐
//!              │            │            │
//!       ┌──────▼──────┐     │     ┌──────▼──────┐
//!       │ ProbeActor  │     │     │ ProbeActor  │
//!       │ (target 1)  │    ...    │ (target N)  │
//!       └──────┬──────┘           └──────┬──────┘
//!              │  increments             │
//!              └──────────┬──────────────┘
//!                         │
//!               ┌─────────▼─────────┐        ┌──────────────────┐
//!               │   ProbeMetrics    │ ◄──────│ /metrics (axum)  │
//!               └───────────────────┘ gather └──────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Events**: Cycle reports go out on a broadcast channel for fan-out
//! 3. **Request/Response**: oneshot channels for RunNow and Shutdown

pub mod messages;
pub mod prober;
