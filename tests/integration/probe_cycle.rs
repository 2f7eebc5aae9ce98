//! Probe cycle tests against the in-memory broker
//!
//! These tests verify that:
//! - Healthy round trips are counted as successes
//! - Connect and subscribe failures are counted as errors
//! - Missing deliveries and unconfirmed publishes are counted as timeouts
//! - Every opened session is closed again, whatever the outcome

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use mqtt_blackbox::{
    CycleOutcome, ProbeError, ProbePhase, Prober, broker::memory::MemoryBroker,
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_healthy_broker_receives_every_message() {
    let broker = MemoryBroker::new();
    let metrics = create_metrics();
    let prober = Prober::new(
        create_resolved_config("t1", 5),
        Arc::new(broker.clone()),
        &metrics,
    );

    let report = prober.run_cycle().await;

    assert_eq!(report.outcome, CycleOutcome::Success);
    assert_eq!(report.published, 5);
    assert_eq!(report.received, 5);
    assert_eq!(report.publish_timeouts, 0);

    let target = metrics.target("t1", MEMORY_BROKER);
    assert_eq!(target.started.get(), 1);
    assert_eq!(target.completed.get(), 1);
    assert_eq!(target.published.get(), 5);
    assert_eq!(target.received.get(), 5);
    assert_eq!(target.errors.get(), 0);
    assert_eq!(target.timeouts.get(), 0);
    assert_eq!(target.duration.get_sample_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_broker_counts_error() {
    let broker = MemoryBroker::new();
    broker.set_online(false);
    let metrics = create_metrics();
    let prober = Prober::new(
        create_resolved_config("t2", 5),
        Arc::new(broker.clone()),
        &metrics,
    );

    let report = prober.run_cycle().await;

    assert_matches!(
        report.outcome,
        CycleOutcome::Failed {
            phase: ProbePhase::Connecting,
            error: ProbeError::Connect(_)
        }
    );
    assert_eq!(report.published, 0);

    let target = metrics.target("t2", MEMORY_BROKER);
    assert_eq!(target.started.get(), 1);
    assert_eq!(target.completed.get(), 1);
    assert_eq!(target.errors.get(), 1);
    assert_eq!(target.published.get(), 0);
    assert_eq!(target.timeouts.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_lost_messages_count_probe_timeout() {
    let broker = MemoryBroker::new();
    broker.set_deliver(false);
    let metrics = create_metrics();
    let config = create_resolved_config("t3", 10);
    let probe_timeout = config.probe_timeout;
    let prober = Prober::new(config, Arc::new(broker.clone()), &metrics);

    let report = prober.run_cycle().await;

    assert_eq!(report.outcome, CycleOutcome::TimedOut);
    assert_eq!(report.published, 10);
    assert_eq!(report.received, 0);
    assert!(report.duration >= probe_timeout);

    let target = metrics.target("t3", MEMORY_BROKER);
    assert_eq!(target.published.get(), 10);
    assert_eq!(target.received.get(), 0);
    assert_eq!(target.timeouts.get(), 1);
    assert_eq!(target.errors.get(), 0);
    assert_eq!(target.completed.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_subscription_counts_error() {
    let broker = MemoryBroker::new();
    broker.set_reject_subscriptions(true);
    let metrics = create_metrics();
    let prober = Prober::new(
        create_resolved_config("rejected", 3),
        Arc::new(broker.clone()),
        &metrics,
    );

    let report = prober.run_cycle().await;

    assert_matches!(
        report.outcome,
        CycleOutcome::Failed {
            phase: ProbePhase::Subscribing,
            error: ProbeError::Subscribe(_)
        }
    );
    assert_eq!(report.published, 0);
    assert_eq!(broker.published_count(), 0);

    // both sessions were opened, so both must be gone again
    assert_eq!(broker.connection_history().len(), 2);
    assert!(broker.connected_clients().is_empty());

    let target = metrics.target("rejected", MEMORY_BROKER);
    assert_eq!(target.errors.get(), 1);
    assert_eq!(target.completed.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_publishes_count_publish_timeouts() {
    let broker = MemoryBroker::new();
    broker.set_stall_publishes(true);
    let metrics = create_metrics();
    let prober = Prober::new(
        create_resolved_config("stalled", 4),
        Arc::new(broker.clone()),
        &metrics,
    );

    let report = prober.run_cycle().await;

    assert_eq!(report.outcome, CycleOutcome::TimedOut);
    assert_eq!(report.published, 4);
    assert_eq!(report.publish_timeouts, 4);
    assert_eq!(report.received, 0);

    let target = metrics.target("stalled", MEMORY_BROKER);
    assert_eq!(target.publish_timeouts.get(), 4);
    assert_eq!(target.published.get(), 4);
    assert_eq!(target.timeouts.get(), 1);
    assert_eq!(target.errors.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_refused_subscriber_closes_publisher() {
    let broker = MemoryBroker::new();
    broker.refuse_clients_ending_with("-s");
    let metrics = create_metrics();
    let prober = Prober::new(
        create_resolved_config("half", 3),
        Arc::new(broker.clone()),
        &metrics,
    );

    let report = prober.run_cycle().await;

    assert_matches!(
        report.outcome,
        CycleOutcome::Failed {
            phase: ProbePhase::Connecting,
            error: ProbeError::Connect(_)
        }
    );
    assert_eq!(report.published, 0);

    // only the publisher got through, and it must be gone again
    assert_eq!(broker.connection_history(), vec!["blackbox-half-p".to_string()]);
    assert!(broker.connected_clients().is_empty());
    assert_eq!(broker.published_count(), 0);

    let target = prober.metrics();
    assert_eq!(target.errors.get(), 1);
    assert_eq!(target.started.get(), 1);
    assert_eq!(target.completed.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_connect_fails_at_setup_deadline() {
    let broker = MemoryBroker::new();
    broker.set_stall_connects(true);
    let metrics = create_metrics();
    let config = create_resolved_config("slow", 1);
    let setup_timeout = config.setup_timeout;
    let prober = Prober::new(config, Arc::new(broker.clone()), &metrics);

    let report = prober.run_cycle().await;

    assert_matches!(
        report.outcome,
        CycleOutcome::Failed {
            phase: ProbePhase::Connecting,
            ..
        }
    );
    assert!(report.duration >= setup_timeout);
    assert!(broker.connection_history().is_empty());
    assert_eq!(metrics.target("slow", MEMORY_BROKER).errors.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sessions_use_prefixed_client_ids_and_are_closed() {
    let broker = MemoryBroker::new();
    let metrics = create_metrics();
    let prober = Prober::new(
        create_resolved_config("ids", 2),
        Arc::new(broker.clone()),
        &metrics,
    );

    let report = prober.run_cycle().await;
    assert!(report.is_success());

    assert_eq!(
        broker.connection_history(),
        vec!["blackbox-ids-p".to_string(), "blackbox-ids-s".to_string()]
    );
    assert!(broker.connected_clients().is_empty());
    assert_eq!(broker.subscription_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_messages_is_an_empty_success() {
    let broker = MemoryBroker::new();
    let metrics = create_metrics();
    let prober = Prober::new(
        create_resolved_config("empty", 0),
        Arc::new(broker.clone()),
        &metrics,
    );

    let report = prober.run_cycle().await;

    assert_eq!(report.outcome, CycleOutcome::Success);
    assert_eq!(report.published, 0);
    assert_eq!(report.received, 0);
    assert!(report.duration < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_counters_accumulate_across_cycles() {
    let broker = MemoryBroker::new();
    let metrics = create_metrics();
    let prober = Prober::new(
        create_resolved_config("repeat", 3),
        Arc::new(broker.clone()),
        &metrics,
    );

    prober.run_cycle().await;
    broker.set_online(false);
    prober.run_cycle().await;
    broker.set_online(true);
    prober.run_cycle().await;

    let target = metrics.target("repeat", MEMORY_BROKER);
    assert_eq!(target.started.get(), 3);
    assert_eq!(target.completed.get(), 3);
    assert_eq!(target.errors.get(), 1);
    assert_eq!(target.published.get(), 6);
    assert_eq!(target.received.get(), 6);
}
