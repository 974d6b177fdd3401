//! Delivery transport seam
//!
//! Notifications arrive as [`Delivery`] values on a bounded channel and every
//! delivery is settled exactly once through a [`Settlement`]. A broker client
//! plugs in by feeding the channel and settling on its own connection;
//! [`ChannelTransport`] feeds it from JSON lines for local runs.

use async_trait::async_trait;
use sipin_common::{Result, SipError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// One inbound notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
}

/// How a delivery is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Decision {
    /// Consumed
    Ack,
    /// Consumed without requeue
    Reject,
    /// Handed back for a later delivery
    Requeue,
}

#[async_trait]
pub trait Settlement: Send + Sync {
    async fn settle(&self, delivery: &Delivery, decision: Decision) -> Result<()>;
}

/// Feeds deliveries into a bounded channel
pub struct ChannelTransport {
    sender: mpsc::Sender<Delivery>,
    next_tag: AtomicU64,
}

impl ChannelTransport {
    /// A transport and the receiving end for the dispatcher
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let transport = Self {
            sender,
            next_tag: AtomicU64::new(1),
        };
        (transport, receiver)
    }

    /// Queue one notification body, returning its delivery tag
    pub async fn publish(&self, body: impl Into<Vec<u8>>) -> Result<u64> {
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        self.sender
            .send(Delivery {
                tag,
                body: body.into(),
            })
            .await
            .map_err(|_| SipError::DependencyUnavailable("delivery channel closed".to_string()))?;
        Ok(tag)
    }

    /// Publish every non-blank line until EOF, returning how many were queued
    ///
    /// The transport is consumed, so the channel closes once input ends.
    pub async fn feed_lines<R>(self, reader: R) -> Result<usize>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut count = 0;
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.publish(line).await?;
            count += 1;
        }
        debug!("Input exhausted after {} notifications", count);
        Ok(count)
    }
}

/// Logs every settlement and keeps the decisions
#[derive(Debug, Default)]
pub struct SettlementLog {
    decisions: Mutex<Vec<(u64, Decision)>>,
}

impl SettlementLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn decisions(&self) -> Vec<(u64, Decision)> {
        self.decisions.lock().await.clone()
    }

    pub async fn decision(&self, tag: u64) -> Option<Decision> {
        self.decisions
            .lock()
            .await
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, decision)| *decision)
    }

    pub async fn counts(&self) -> BTreeMap<Decision, usize> {
        let mut counts = BTreeMap::new();
        for (_, decision) in self.decisions.lock().await.iter() {
            *counts.entry(*decision).or_insert(0) += 1;
        }
        counts
    }
}

#[async_trait]
impl Settlement for SettlementLog {
    async fn settle(&self, delivery: &Delivery, decision: Decision) -> Result<()> {
        let mut decisions = self.decisions.lock().await;
        if decisions.iter().any(|(tag, _)| *tag == delivery.tag) {
            error!(tag = delivery.tag, "Delivery settled twice");
            return Err(SipError::Invariant(format!(
                "delivery {} was already settled",
                delivery.tag
            )));
        }
        match decision {
            Decision::Ack => info!(tag = delivery.tag, "Delivery acknowledged"),
            Decision::Reject => warn!(tag = delivery.tag, "Delivery rejected"),
            Decision::Requeue => warn!(tag = delivery.tag, "Delivery requeued"),
        }
        decisions.push((delivery.tag, decision));
        Ok(())
    }
}
