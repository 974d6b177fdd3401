//! Dispatcher tests
//!
//! Runs notifications through [`ChannelTransport`] and [`Dispatcher`]:
//! - every delivery is settled exactly once with its terminal decision
//! - concurrency never exceeds the prefetch count
//! - shutdown stops intake but lets in-flight work finish
//! - retryable deliveries are redelivered until they settle or attempts run out
//! - a panicking task still settles its delivery

mod common;

use async_trait::async_trait;
use common::{pipeline, FailingResolver, FlakyResolver, PanickingResolver, StaticResolver, Watchfolder};
use sipin_common::Result;
use sipin_sip_creator::bag::BagConfig;
use sipin_sip_creator::events::MemoryPublisher;
use sipin_sip_creator::orchestrator::{DispatchSummary, Dispatcher, RedeliveryPolicy};
use sipin_sip_creator::org_api::LabelResolver;
use sipin_sip_creator::transport::{ChannelTransport, Decision, SettlementLog};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;

/// Records the highest number of lookups running at once
#[derive(Default)]
struct ConcurrencyTracker {
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl LabelResolver for ConcurrencyTracker {
    async fn resolve(&self, _cp_id: &str) -> Result<String> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok("ACME".to_string())
    }
}

// ============================================================================
// Settlement
// ============================================================================

#[tokio::test]
async fn test_every_delivery_is_settled_once() {
    let temp = TempDir::new().unwrap();
    // Same essence name in two watchfolders, bagged into one output directory
    let output = temp.path().join("out");
    std::fs::create_dir_all(&output).unwrap();
    let first = Watchfolder::new(&temp.path().join("a"), "F1", None);
    let second = Watchfolder::new(&temp.path().join("b"), "F2", None);

    let pipeline = Arc::new(pipeline(
        Arc::new(StaticResolver::new("ACME")),
        Arc::new(MemoryPublisher::new()),
        BagConfig {
            output_dir: Some(output.clone()),
            ..BagConfig::default()
        },
    ));
    let settlement = Arc::new(SettlementLog::new());
    let dispatcher = Dispatcher::new(pipeline, settlement.clone(), 2);

    let (transport, receiver) = ChannelTransport::new(8);
    let first_tag = transport.publish(first.notification()).await.unwrap();
    let malformed_tag = transport.publish(b"{\"flow_id\":".to_vec()).await.unwrap();
    let second_tag = transport.publish(second.notification()).await.unwrap();
    drop(transport);

    let summary = dispatcher.run(receiver, std::future::pending()).await;

    assert_eq!(
        summary,
        DispatchSummary {
            acknowledged: 2,
            rejected: 1,
            requeued: 0,
            failed: 0,
            redeliveries: 0,
        }
    );
    assert_eq!(summary.total(), 3);

    let decisions = settlement.decisions().await;
    assert_eq!(decisions.len(), 3);
    assert_eq!(settlement.decision(first_tag).await, Some(Decision::Ack));
    assert_eq!(settlement.decision(malformed_tag).await, Some(Decision::Reject));
    assert_eq!(settlement.decision(second_tag).await, Some(Decision::Ack));

    assert!(output.join("clip.mp4_F1.bag.zip").is_file());
    assert!(output.join("clip.mp4_F2.bag.zip").is_file());
}

#[tokio::test]
async fn test_feed_lines_drives_dispatcher() {
    let temp = TempDir::new().unwrap();
    let folder = Watchfolder::new(&temp.path().join("in"), "F1", None);
    let mut input = folder.notification();
    input.extend_from_slice(b"\n\n");

    let settlement = Arc::new(SettlementLog::new());
    let dispatcher = Dispatcher::new(
        Arc::new(pipeline(
            Arc::new(StaticResolver::new("ACME")),
            Arc::new(MemoryPublisher::new()),
            BagConfig::default(),
        )),
        settlement.clone(),
        4,
    );

    let (transport, receiver) = ChannelTransport::new(4);
    let feeder = tokio::spawn(transport.feed_lines(std::io::Cursor::new(input)));
    let summary = dispatcher.run(receiver, std::future::pending()).await;

    assert_eq!(feeder.await.unwrap().unwrap(), 1);
    assert_eq!(summary.acknowledged, 1);
    assert_eq!(settlement.counts().await.get(&Decision::Ack), Some(&1));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrency_is_bounded_by_prefetch() {
    let temp = TempDir::new().unwrap();
    let tracker = Arc::new(ConcurrencyTracker::default());
    let dispatcher = Dispatcher::new(
        Arc::new(pipeline(
            tracker.clone(),
            Arc::new(MemoryPublisher::new()),
            BagConfig::default(),
        )),
        Arc::new(SettlementLog::new()),
        2,
    );

    let (transport, receiver) = ChannelTransport::new(8);
    for i in 0..6 {
        let folder = Watchfolder::new(&temp.path().join(format!("in{}", i)), &format!("F{}", i), None);
        transport.publish(folder.notification()).await.unwrap();
    }
    drop(transport);

    let summary = dispatcher.run(receiver, std::future::pending()).await;

    assert_eq!(summary.acknowledged, 6);
    assert!(tracker.peak.load(Ordering::SeqCst) <= 2);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_drains_in_flight_work() {
    let temp = TempDir::new().unwrap();
    let folder = Watchfolder::new(&temp.path().join("in"), "F1", None);
    let settlement = Arc::new(SettlementLog::new());
    let dispatcher = Dispatcher::new(
        Arc::new(pipeline(
            Arc::new(StaticResolver::slow("ACME", Duration::from_millis(200))),
            Arc::new(MemoryPublisher::new()),
            BagConfig::default(),
        )),
        settlement.clone(),
        2,
    );

    // The transport stays open; only the shutdown signal ends the run
    let (transport, receiver) = ChannelTransport::new(4);
    let tag = transport.publish(folder.notification()).await.unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = stop.send(());
    });

    let summary = dispatcher
        .run(receiver, async {
            let _ = stopped.await;
        })
        .await;

    assert_eq!(summary.acknowledged, 1);
    assert_eq!(settlement.decision(tag).await, Some(Decision::Ack));
    assert!(folder.dir.join("clip.mp4_F1.bag.zip").is_file());

    // Deliveries arriving after shutdown stay with the transport
    transport.publish(folder.notification()).await.unwrap_err();
}

#[tokio::test]
async fn test_shutdown_interrupts_redelivery_wait() {
    let temp = TempDir::new().unwrap();
    let folder = Watchfolder::new(&temp.path().join("in"), "F1", None);
    let settlement = Arc::new(SettlementLog::new());
    let dispatcher = Dispatcher::new(
        Arc::new(pipeline(
            Arc::new(FailingResolver { transient: true }),
            Arc::new(MemoryPublisher::new()),
            BagConfig::default(),
        )),
        settlement.clone(),
        1,
    )
    .with_redelivery(RedeliveryPolicy {
        max_attempts: 5,
        delay: Duration::from_secs(3600),
    });

    let (transport, receiver) = ChannelTransport::new(4);
    let tag = transport.publish(folder.notification()).await.unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = stop.send(());
    });

    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        dispatcher.run(receiver, async {
            let _ = stopped.await;
        }),
    )
    .await
    .unwrap();

    assert_eq!(summary.requeued, 1);
    assert_eq!(summary.unfinished(), 1);
    assert_eq!(settlement.decision(tag).await, Some(Decision::Requeue));
    assert!(folder.essence().is_file());
}

// ============================================================================
// Redelivery
// ============================================================================

fn quick_redelivery(max_attempts: u32) -> RedeliveryPolicy {
    RedeliveryPolicy {
        max_attempts,
        delay: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn test_transient_failure_is_redelivered_until_acked() {
    let temp = TempDir::new().unwrap();
    let folder = Watchfolder::new(&temp.path().join("in"), "F1", None);
    let resolver = Arc::new(FlakyResolver::new(1));
    let settlement = Arc::new(SettlementLog::new());
    let dispatcher = Dispatcher::new(
        Arc::new(pipeline(
            resolver.clone(),
            Arc::new(MemoryPublisher::new()),
            BagConfig::default(),
        )),
        settlement.clone(),
        2,
    )
    .with_redelivery(quick_redelivery(3));

    let (transport, receiver) = ChannelTransport::new(4);
    let tag = transport.publish(folder.notification()).await.unwrap();
    drop(transport);

    let summary = dispatcher.run(receiver, std::future::pending()).await;

    assert_eq!(
        summary,
        DispatchSummary {
            acknowledged: 1,
            rejected: 0,
            requeued: 0,
            failed: 0,
            redeliveries: 1,
        }
    );
    assert_eq!(summary.unfinished(), 0);
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    assert_eq!(settlement.decision(tag).await, Some(Decision::Ack));
    assert_eq!(settlement.decisions().await.len(), 1);
    assert!(folder.dir.join("clip.mp4_F1.bag.zip").is_file());
}

#[tokio::test]
async fn test_exhausted_redelivery_is_requeued() {
    let temp = TempDir::new().unwrap();
    let folder = Watchfolder::new(&temp.path().join("in"), "F1", None);
    let resolver = Arc::new(FlakyResolver::new(usize::MAX));
    let settlement = Arc::new(SettlementLog::new());
    let dispatcher = Dispatcher::new(
        Arc::new(pipeline(
            resolver.clone(),
            Arc::new(MemoryPublisher::new()),
            BagConfig::default(),
        )),
        settlement.clone(),
        2,
    )
    .with_redelivery(quick_redelivery(3));

    let (transport, receiver) = ChannelTransport::new(4);
    let tag = transport.publish(folder.notification()).await.unwrap();
    drop(transport);

    let summary = dispatcher.run(receiver, std::future::pending()).await;

    assert_eq!(summary.requeued, 1);
    assert_eq!(summary.redeliveries, 2);
    assert_eq!(summary.unfinished(), 1);
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
    assert_eq!(settlement.decision(tag).await, Some(Decision::Requeue));
    // Nothing was consumed, so the requeued delivery can be handled later
    assert!(folder.essence().is_file());
    assert!(folder.sidecar().is_file());
}

#[tokio::test]
async fn test_single_attempt_hands_requeue_to_transport() {
    let temp = TempDir::new().unwrap();
    let folder = Watchfolder::new(&temp.path().join("in"), "F1", None);
    let resolver = Arc::new(FlakyResolver::new(1));
    let settlement = Arc::new(SettlementLog::new());
    let dispatcher = Dispatcher::new(
        Arc::new(pipeline(
            resolver.clone(),
            Arc::new(MemoryPublisher::new()),
            BagConfig::default(),
        )),
        settlement.clone(),
        2,
    )
    .with_redelivery(quick_redelivery(1));

    let (transport, receiver) = ChannelTransport::new(4);
    let tag = transport.publish(folder.notification()).await.unwrap();
    drop(transport);

    let summary = dispatcher.run(receiver, std::future::pending()).await;

    assert_eq!(summary.requeued, 1);
    assert_eq!(summary.redeliveries, 0);
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    assert_eq!(settlement.decision(tag).await, Some(Decision::Requeue));
}

// ============================================================================
// Panics
// ============================================================================

#[tokio::test]
async fn test_panicking_task_is_rejected() {
    let temp = TempDir::new().unwrap();
    let broken = Watchfolder::new(&temp.path().join("broken"), "F1", None);
    let settlement = Arc::new(SettlementLog::new());
    let dispatcher = Dispatcher::new(
        Arc::new(pipeline(
            Arc::new(PanickingResolver),
            Arc::new(MemoryPublisher::new()),
            BagConfig::default(),
        )),
        settlement.clone(),
        2,
    )
    .with_redelivery(quick_redelivery(3));

    let (transport, receiver) = ChannelTransport::new(4);
    let tag = transport.publish(broken.notification()).await.unwrap();
    drop(transport);

    let summary = dispatcher.run(receiver, std::future::pending()).await;

    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.total(), 1);
    assert_eq!(settlement.decision(tag).await, Some(Decision::Reject));
}
