//! Internal Message Bus
//!
//! Addressable, topic-routed transport connecting the swap engines to the
//! wallet, the per-chain watchers, and the Control API. Services register
//! under a stable topic; `publish` fans out to all current subscribers
//! at-least-once, `request` is a correlated round-trip with a
//! caller-supplied timeout. Messages are not persisted: a subscriber that
//! registers after a publish never sees it.

pub mod ctl;
pub mod dispatcher;
pub mod sync;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::types::{Blockchain, SwapEvent, SwapEventKind, SwapId};

pub use ctl::{CtlReply, CtlRequest, NodeInfo, OfferSummary};
pub use dispatcher::{BusError, MessageBus};
pub use sync::{SyncerReply, SyncerTask, WalletReply, WalletRequest};

/// Stable identity of a service on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceId {
    /// The daemon runtime itself
    Daemon,
    /// Control API service
    Control,
    /// HTTP/WS face of the control bus
    Rpc,
    /// Wallet service (key, signature and adaptor-share capability)
    Wallet,
    /// Chain syncer/watcher for one chain
    Syncer(Blockchain),
    /// One swap engine instance
    Swap(SwapId),
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daemon => write!(f, "daemon"),
            Self::Control => write!(f, "control"),
            Self::Rpc => write!(f, "rpc"),
            Self::Wallet => write!(f, "wallet"),
            Self::Syncer(chain) => write!(f, "syncer<{}>", chain),
            Self::Swap(id) => write!(f, "swap<{}>", id),
        }
    }
}

/// Routing key a service registers under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Control,
    Wallet,
    Syncer(Blockchain),
    Swap(SwapId),
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Control => write!(f, "control"),
            Self::Wallet => write!(f, "wallet"),
            Self::Syncer(chain) => write!(f, "syncer<{}>", chain),
            Self::Swap(id) => write!(f, "swap<{}>", id),
        }
    }
}

/// Typed payload carried by a bus message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusPayload {
    /// Control API request
    Ctl(CtlRequest),
    /// Control API reply
    CtlReply(CtlReply),
    /// Event driving a swap state machine
    Event(SwapEvent),
    /// Request to the wallet service
    Wallet(WalletRequest),
    /// Reply from the wallet service
    WalletReply(WalletReply),
    /// Task for a chain syncer
    Syncer(SyncerTask),
    /// Reply from a chain syncer
    SyncerReply(SyncerReply),
}

/// A message in flight on the bus. Transient: not persisted beyond
/// delivery.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: Topic,
    pub source: ServiceId,
    /// Set on request/response round-trips
    pub correlation: Option<Uuid>,
    pub payload: BusPayload,
}

/// Producer-side helper that stamps per-swap sequence numbers onto swap
/// events before publishing them. Each producing service owns one; the
/// engine dedupes on (source, seq), so independent producers never
/// collide.
#[derive(Clone)]
pub struct EventSender {
    bus: MessageBus,
    source: ServiceId,
    seqs: Arc<Mutex<HashMap<SwapId, u64>>>,
}

impl EventSender {
    pub fn new(bus: MessageBus, source: ServiceId) -> Self {
        Self {
            bus,
            source,
            seqs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn next_seq(&self, swap_id: SwapId) -> u64 {
        let mut seqs = self.seqs.lock().await;
        let seq = seqs.entry(swap_id).or_insert(0);
        *seq += 1;
        *seq
    }

    /// Publish an event into a swap's engine (fire-and-forget).
    pub async fn publish(&self, swap_id: SwapId, kind: SwapEventKind) -> Result<u64, BusError> {
        let seq = self.next_seq(swap_id).await;
        self.bus
            .publish(
                self.source.clone(),
                Topic::Swap(swap_id),
                BusPayload::Event(SwapEvent { seq, kind }),
            )
            .await?;
        Ok(seq)
    }

    /// Send an event as a correlated request and wait for the engine's
    /// reply. Used for operations the caller must see accepted or
    /// rejected, such as user aborts.
    pub async fn request(
        &self,
        swap_id: SwapId,
        kind: SwapEventKind,
        timeout: std::time::Duration,
    ) -> Result<BusMessage, BusError> {
        let seq = self.next_seq(swap_id).await;
        self.bus
            .request(
                self.source.clone(),
                Topic::Swap(swap_id),
                BusPayload::Event(SwapEvent { seq, kind }),
                timeout,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_id_display() {
        assert_eq!(ServiceId::Wallet.to_string(), "wallet");
        assert_eq!(
            ServiceId::Syncer(Blockchain::Accordant).to_string(),
            "syncer<accordant>"
        );
    }

    #[tokio::test]
    async fn test_event_sender_sequences_per_swap() {
        let bus = MessageBus::new();
        let sender = EventSender::new(bus.clone(), ServiceId::Daemon);
        let a = SwapId::random();
        let b = SwapId::random();

        let mut rx_a = bus.register(ServiceId::Swap(a), Topic::Swap(a)).await;
        let mut rx_b = bus.register(ServiceId::Swap(b), Topic::Swap(b)).await;

        sender.publish(a, SwapEventKind::UserAbort).await.unwrap();
        sender.publish(a, SwapEventKind::UserAbort).await.unwrap();
        sender.publish(b, SwapEventKind::UserAbort).await.unwrap();

        let seq_of = |msg: BusMessage| match msg.payload {
            BusPayload::Event(ev) => ev.seq,
            other => panic!("unexpected payload: {:?}", other),
        };

        assert_eq!(seq_of(rx_a.recv().await.unwrap()), 1);
        assert_eq!(seq_of(rx_a.recv().await.unwrap()), 2);
        // Independent counter per swap
        assert_eq!(seq_of(rx_b.recv().await.unwrap()), 1);
    }
}
