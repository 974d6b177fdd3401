//! Ingestion orchestration
//!
//! [`IngestionPipeline::handle`] runs one notification through
//!
//! ```text
//! Received -> Validating -> Packaging -> Verifying -> Acknowledged
//!                 |             |
//!                 v             +--> Retryable (transient failure)
//!              Rejected <-------+
//! ```
//!
//! and [`Dispatcher`] runs many of those concurrently, bounded by the
//! prefetch count, settling each delivery with the decision of its terminal
//! state. A `Retryable` delivery is handled again after a backoff, up to
//! [`RedeliveryPolicy::max_attempts`], before it is settled as a requeue.

use crate::bag::{AssembledBag, BagAssembler};
use crate::events::{CompletionEvent, EventData, EventPublisher, EventSettings, Outcome};
use crate::notification::FilePair;
use crate::org_api::LabelResolver;
use crate::sidecar::Sidecar;
use crate::sip::{EssenceInfo, SipBuilder, SipInputs};
use crate::transport::{Decision, Delivery, Settlement};
use sipin_common::checksum::md5_matches;
use sipin_common::{Result, SipError};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Processing state of one notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Received,
    Validating,
    Packaging,
    Verifying,
    Acknowledged,
    Rejected,
    Retryable,
}

impl IngestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IngestState::Acknowledged | IngestState::Rejected | IngestState::Retryable
        )
    }

    pub fn can_advance_to(self, next: IngestState) -> bool {
        use IngestState::*;
        matches!(
            (self, next),
            (Received, Validating)
                | (Validating, Packaging)
                | (Validating, Rejected)
                | (Packaging, Verifying)
                | (Packaging, Rejected)
                | (Packaging, Retryable)
                | (Verifying, Acknowledged)
        )
    }

    /// Settlement for a terminal state
    pub fn decision(self) -> Option<Decision> {
        match self {
            IngestState::Acknowledged => Some(Decision::Ack),
            IngestState::Rejected => Some(Decision::Reject),
            IngestState::Retryable => Some(Decision::Requeue),
            _ => None,
        }
    }
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct StateMachine {
    state: IngestState,
}

impl StateMachine {
    fn new() -> Self {
        Self {
            state: IngestState::Received,
        }
    }

    fn advance(&mut self, next: IngestState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
    }
}

/// What happened to one delivery
#[derive(Debug, Clone)]
pub struct HandledDelivery {
    pub tag: u64,
    pub state: IngestState,
    pub decision: Decision,
    pub outcome: Option<Outcome>,
    pub event: Option<CompletionEvent>,
}

/// Result of the packaging stage
struct Packaged {
    sidecar: Sidecar,
    bag: AssembledBag,
}

/// Drives one notification from parse to settlement decision
///
/// Holds no per-notification state; one pipeline serves every in-flight task.
pub struct IngestionPipeline {
    resolver: Arc<dyn LabelResolver>,
    publisher: Arc<dyn EventPublisher>,
    assembler: Arc<BagAssembler>,
    builder: SipBuilder,
    events: EventSettings,
    host: String,
}

impl IngestionPipeline {
    pub fn new(
        resolver: Arc<dyn LabelResolver>,
        publisher: Arc<dyn EventPublisher>,
        assembler: BagAssembler,
        events: EventSettings,
        host: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            publisher,
            assembler: Arc::new(assembler),
            builder: SipBuilder::default(),
            events,
            host: host.into(),
        }
    }

    pub fn with_builder(mut self, builder: SipBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub async fn handle(&self, delivery: &Delivery) -> HandledDelivery {
        let span = info_span!(
            "notification",
            tag = delivery.tag,
            flow_id = tracing::field::Empty
        );
        self.process(delivery).instrument(span).await
    }

    async fn process(&self, delivery: &Delivery) -> HandledDelivery {
        let mut machine = StateMachine::new();
        machine.advance(IngestState::Validating);

        let pair = match FilePair::parse(&delivery.body) {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "Rejecting malformed notification");
                machine.advance(IngestState::Rejected);
                return self.finish(delivery, machine, None, None);
            },
        };
        Span::current().record("flow_id", pair.flow_id.as_str());

        if let Err(e) = pair.ensure_files_exist() {
            error!(
                flow_id = %pair.flow_id,
                essence = %pair.essence_path().display(),
                error = %e,
                "Rejecting notification with missing files"
            );
            machine.advance(IngestState::Rejected);
            let event = self.failure_event(&pair, &e).await;
            return self.finish(delivery, machine, Some(Outcome::ValidationFailure), event);
        }

        machine.advance(IngestState::Packaging);
        let packaged = match self.package(&pair).await {
            Ok(packaged) => packaged,
            Err(e) if e.is_transient() => {
                warn!(
                    flow_id = %pair.flow_id,
                    essence = %pair.essence_path().display(),
                    error = %e,
                    "Transient failure, requeueing"
                );
                machine.advance(IngestState::Retryable);
                return self.finish(delivery, machine, Some(Outcome::TransientFailure), None);
            },
            Err(e) => {
                error!(
                    flow_id = %pair.flow_id,
                    essence = %pair.essence_path().display(),
                    error = %e,
                    "Packaging failed"
                );
                machine.advance(IngestState::Rejected);
                let event = self.failure_event(&pair, &e).await;
                return self.finish(delivery, machine, Some(Outcome::ValidationFailure), event);
            },
        };

        machine.advance(IngestState::Verifying);
        let declared = packaged.sidecar.md5.as_deref();
        let computed = packaged.bag.essence_md5.as_str();
        let outcome = match declared {
            Some(declared) if md5_matches(declared, computed) => Outcome::Success,
            _ => Outcome::IntegrityMismatch,
        };

        let archive = packaged.bag.archive_path.display().to_string();
        let message = match outcome {
            Outcome::Success => {
                info!(
                    flow_id = %pair.flow_id,
                    archive = %archive,
                    md5 = computed,
                    "SIP created"
                );
                format!("SIP created: '{}'", archive)
            },
            _ => {
                warn!(
                    flow_id = %pair.flow_id,
                    essence = %pair.essence_path().display(),
                    declared = declared.unwrap_or("<none>"),
                    computed,
                    "SIP created with checksum mismatch"
                );
                format!(
                    "SIP created but checksum mismatch: declared '{}', computed '{}'",
                    declared.unwrap_or_default(),
                    computed
                )
            },
        };

        let data = EventData {
            path: archive,
            message,
            md5_sum_essence: Some(computed.to_string()),
            cp_id: Some(packaged.sidecar.cp_id.clone()),
            essence_filesize: Some(packaged.bag.essence_size),
            bag_filesize: Some(packaged.bag.archive_size),
            md5_declared: packaged.sidecar.md5.clone(),
            ..self.event_data(&pair)
        };
        let event = self.publish(&pair, outcome, data).await;

        machine.advance(IngestState::Acknowledged);
        self.finish(delivery, machine, Some(outcome), event)
    }

    /// Parse the sidecar, resolve the label, build the SIP and bag it
    async fn package(&self, pair: &FilePair) -> Result<Packaged> {
        let sidecar_path = pair.sidecar_path();
        let sidecar_xml = tokio::fs::read_to_string(&sidecar_path)
            .await
            .map_err(|e| SipError::filesystem(&sidecar_path, e))?;
        let sidecar = Sidecar::parse(&sidecar_xml)?;

        let cp_label = self.resolver.resolve(&sidecar.cp_id).await?;

        if sidecar.md5.is_none() {
            warn!(flow_id = %pair.flow_id, "Sidecar declares no md5");
        }
        let essence = {
            let file_name = pair.essence.file_name.clone();
            let path = pair.essence_path();
            let declared = sidecar.md5.clone();
            tokio::task::spawn_blocking(move || {
                EssenceInfo::from_file(file_name, path, declared.as_deref())
            })
            .await
            .map_err(join_error)??
        };

        let built = self.builder.build(&SipInputs {
            pair,
            sidecar: &sidecar,
            sidecar_xml: &sidecar_xml,
            cp_label: &cp_label,
            essence,
        })?;
        debug!(entity = %built.entity, "SIP documents built");

        let assembler = Arc::clone(&self.assembler);
        let layout = built.layout;
        let bag = tokio::task::spawn_blocking(move || assembler.assemble(&layout))
            .await
            .map_err(join_error)??;

        Ok(Packaged { sidecar, bag })
    }

    fn event_data(&self, pair: &FilePair) -> EventData {
        EventData {
            host: self.host.clone(),
            essence_filename: Some(pair.essence.file_name.clone()),
            flow_id: Some(pair.flow_id.clone()),
            ..EventData::default()
        }
    }

    async fn failure_event(&self, pair: &FilePair, error: &SipError) -> Option<CompletionEvent> {
        let data = EventData {
            message: error.to_string(),
            ..self.event_data(pair)
        };
        self.publish(pair, Outcome::ValidationFailure, data).await
    }

    /// Publish failures are logged; settlement goes ahead regardless
    async fn publish(
        &self,
        pair: &FilePair,
        outcome: Outcome,
        data: EventData,
    ) -> Option<CompletionEvent> {
        let event =
            CompletionEvent::new(&self.events, pair.essence_stem(), &pair.flow_id, outcome, data);
        match self.publisher.publish(&event).await {
            Ok(()) => {
                debug!(event_id = %event.id, outcome = %outcome, "Completion event published");
                Some(event)
            },
            Err(e) => {
                error!(error = %e, outcome = %outcome, "Failed to publish completion event");
                None
            },
        }
    }

    fn finish(
        &self,
        delivery: &Delivery,
        machine: StateMachine,
        outcome: Option<Outcome>,
        event: Option<CompletionEvent>,
    ) -> HandledDelivery {
        let decision = machine.state.decision().unwrap_or(Decision::Reject);
        HandledDelivery {
            tag: delivery.tag,
            state: machine.state,
            decision,
            outcome,
            event,
        }
    }
}

fn join_error(e: tokio::task::JoinError) -> SipError {
    SipError::Invariant(format!("Packaging task failed: {}", e))
}

/// Default number of times one delivery is handled before a requeue is
/// handed back to the transport
pub const DEFAULT_REDELIVERY_ATTEMPTS: u32 = 3;

/// Base delay before a redelivery; the actual delay is this times the attempt number
pub const DEFAULT_REDELIVERY_DELAY_MS: u64 = 5000;

/// How often a delivery that ends `Retryable` is handled again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// Total attempts, the first delivery included; 1 disables redelivery
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_REDELIVERY_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_REDELIVERY_DELAY_MS),
        }
    }
}

/// Final decision for one delivery and how many times it was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Settled {
    decision: Decision,
    attempts: u32,
}

/// Counts of settled deliveries after a dispatcher run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub acknowledged: usize,
    pub rejected: usize,
    pub requeued: usize,
    /// Tasks that failed to report a decision
    pub failed: usize,
    /// Extra attempts spent on deliveries that first ended retryable
    pub redeliveries: usize,
}

impl DispatchSummary {
    fn record(&mut self, result: std::result::Result<Settled, tokio::task::JoinError>) {
        match result {
            Ok(settled) => {
                match settled.decision {
                    Decision::Ack => self.acknowledged += 1,
                    Decision::Reject => self.rejected += 1,
                    Decision::Requeue => self.requeued += 1,
                }
                self.redeliveries += settled.attempts.saturating_sub(1) as usize;
            },
            Err(e) => {
                error!(error = %e, "Notification task failed");
                self.failed += 1;
            },
        }
    }

    pub fn total(&self) -> usize {
        self.acknowledged + self.rejected + self.requeued + self.failed
    }

    /// Deliveries that still need attention: requeued ones and failed tasks
    pub fn unfinished(&self) -> usize {
        self.requeued + self.failed
    }
}

/// Runs one task per delivery, at most `prefetch` at a time
pub struct Dispatcher {
    pipeline: Arc<IngestionPipeline>,
    settlement: Arc<dyn Settlement>,
    prefetch: usize,
    redelivery: RedeliveryPolicy,
}

impl Dispatcher {
    pub fn new(
        pipeline: Arc<IngestionPipeline>,
        settlement: Arc<dyn Settlement>,
        prefetch: usize,
    ) -> Self {
        Self {
            pipeline,
            settlement,
            prefetch: prefetch.max(1),
            redelivery: RedeliveryPolicy::default(),
        }
    }

    pub fn with_redelivery(mut self, redelivery: RedeliveryPolicy) -> Self {
        self.redelivery = redelivery;
        self
    }

    /// Dispatch until the channel closes or `shutdown` resolves, then wait for
    /// every in-flight task to settle
    ///
    /// Tasks waiting to redeliver stop waiting on shutdown and settle `Requeue`.
    pub async fn run<F>(&self, mut deliveries: mpsc::Receiver<Delivery>, shutdown: F) -> DispatchSummary
    where
        F: Future<Output = ()>,
    {
        let permits = Arc::new(Semaphore::new(self.prefetch));
        let (stop, stopping) = watch::channel(false);
        let mut tasks = JoinSet::new();
        let mut summary = DispatchSummary::default();
        tokio::pin!(shutdown);

        info!(prefetch = self.prefetch, "Dispatcher started");
        loop {
            while let Some(result) = tasks.try_join_next() {
                summary.record(result);
            }

            let permit = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting notifications");
                    stop.send_replace(true);
                    break;
                },
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let delivery = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting notifications");
                    stop.send_replace(true);
                    break;
                },
                delivery = deliveries.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => {
                        debug!("Delivery channel closed");
                        break;
                    },
                },
            };

            let pipeline = Arc::clone(&self.pipeline);
            let settlement = Arc::clone(&self.settlement);
            let redelivery = self.redelivery;
            let stopping = stopping.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let delivery = Arc::new(delivery);
                let settled = deliver(pipeline, Arc::clone(&delivery), redelivery, stopping).await;
                if let Err(e) = settlement.settle(&delivery, settled.decision).await {
                    error!(tag = delivery.tag, error = %e, "Failed to settle delivery");
                }
                settled
            });
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Waiting for in-flight notifications");
        }
        while let Some(result) = tasks.join_next().await {
            summary.record(result);
        }

        info!(
            acknowledged = summary.acknowledged,
            rejected = summary.rejected,
            requeued = summary.requeued,
            failed = summary.failed,
            redeliveries = summary.redeliveries,
            "Dispatcher stopped"
        );
        summary
    }
}

/// Handle one delivery, redelivering it while it ends retryable
///
/// Each attempt runs in its own task so a panic is contained; the delivery is
/// then rejected.
async fn deliver(
    pipeline: Arc<IngestionPipeline>,
    delivery: Arc<Delivery>,
    policy: RedeliveryPolicy,
    mut stopping: watch::Receiver<bool>,
) -> Settled {
    let tag = delivery.tag;
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let handling = {
            let pipeline = Arc::clone(&pipeline);
            let delivery = Arc::clone(&delivery);
            tokio::spawn(async move { pipeline.handle(&delivery).await })
        };
        let decision = match handling.await {
            Ok(handled) => handled.decision,
            Err(e) => {
                error!(tag, error = %e, "Notification handling failed, rejecting delivery");
                Decision::Reject
            },
        };

        if decision != Decision::Requeue || attempt >= max_attempts {
            if decision == Decision::Requeue && max_attempts > 1 {
                warn!(tag, attempts = attempt, "Redelivery attempts exhausted");
            }
            return Settled {
                decision,
                attempts: attempt,
            };
        }

        let delay = policy.delay * attempt;
        info!(tag, attempt, ?delay, "Redelivering after transient failure");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {},
            _ = stopping.wait_for(|stop| *stop) => {
                info!(tag, "Shutdown requested, handing delivery back for requeue");
                return Settled {
                    decision,
                    attempts: attempt,
                };
            },
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use IngestState::*;
        assert!(Received.can_advance_to(Validating));
        assert!(Validating.can_advance_to(Rejected));
        assert!(Packaging.can_advance_to(Retryable));
        assert!(Verifying.can_advance_to(Acknowledged));
        assert!(!Verifying.can_advance_to(Rejected));
        assert!(!Validating.can_advance_to(Retryable));
        assert!(!Acknowledged.can_advance_to(Validating));
    }

    #[test]
    fn test_terminal_decisions() {
        assert_eq!(IngestState::Acknowledged.decision(), Some(Decision::Ack));
        assert_eq!(IngestState::Rejected.decision(), Some(Decision::Reject));
        assert_eq!(IngestState::Retryable.decision(), Some(Decision::Requeue));
        assert_eq!(IngestState::Packaging.decision(), None);
        assert!(IngestState::Retryable.is_terminal());
        assert!(!IngestState::Verifying.is_terminal());
    }
}
