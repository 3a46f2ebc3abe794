//! Chain Watcher Interface
//!
//! Abstract capability for observing one chain: confirmations, timelock
//! expiry, and transaction broadcast. One watcher per chain, reachable
//! through the syncer topic for that chain.
//!
//! Watch tasks are armed over request/response; detections flow back as
//! swap events. Implementations hold an [`EventSender`] and publish
//! `FundingDetected`/`TimelockExpired` into the affected swap's topic
//! when their chain backend reports the fact. Heights and confirmations
//! always come from the chain, never from a local clock.
//!
//! [`EventSender`]: crate::bus::EventSender

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bus::{BusPayload, MessageBus, ServiceId, SyncerReply, SyncerTask, Topic};
use crate::types::{Blockchain, SwapId};

/// Watcher errors
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("chain backend unreachable: {0}")]
    Unreachable(String),

    #[error("broadcast rejected: {0}")]
    BroadcastRejected(String),

    #[error("unknown transaction: {0}")]
    UnknownTransaction(String),
}

/// Observation and broadcast capability for one chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainWatcher: Send + Sync {
    /// Watch for a transaction funding the swap with exactly `amount`.
    async fn watch_funding(&self, swap_id: SwapId, amount: u64) -> Result<u64, WatcherError>;

    /// Watch a known transaction until it confirms.
    async fn watch_transaction(&self, swap_id: SwapId, txid: String) -> Result<u64, WatcherError>;

    /// Report when the chain passes the refund timelock, `blocks` after
    /// the lock confirmation.
    async fn watch_timelock(&self, swap_id: SwapId, blocks: u32) -> Result<u64, WatcherError>;

    /// Broadcast a signed transaction, returning its txid.
    async fn broadcast(&self, swap_id: SwapId, tx_hex: String) -> Result<String, WatcherError>;

    /// Drop all watch tasks for a swap.
    async fn abort_tasks(&self, swap_id: SwapId) -> Result<(), WatcherError>;

    /// Current chain tip height.
    async fn height(&self) -> Result<u64, WatcherError>;
}

/// Bus adapter: answers syncer tasks for one chain with a trait
/// implementation.
pub struct WatcherService<C> {
    bus: MessageBus,
    chain: Blockchain,
    watcher: C,
}

impl<C: ChainWatcher + 'static> WatcherService<C> {
    pub fn new(bus: MessageBus, chain: Blockchain, watcher: C) -> Self {
        Self { bus, chain, watcher }
    }

    pub fn spawn(self) {
        tokio::spawn(self.run());
    }

    pub async fn run(self) {
        let service = ServiceId::Syncer(self.chain);
        let mut rx = self
            .bus
            .register(service.clone(), Topic::Syncer(self.chain))
            .await;
        info!(chain = %self.chain, "chain watcher attached to bus");
        while let Some(msg) = rx.recv().await {
            let Some(correlation) = msg.correlation else {
                debug!(chain = %self.chain, "watcher ignores uncorrelated messages");
                continue;
            };
            let reply = match msg.payload {
                BusPayload::Syncer(task) => self.handle(task).await,
                other => {
                    debug!(?other, "unsupported payload on syncer topic");
                    SyncerReply::Failure {
                        message: "syncer accepts syncer tasks only".to_string(),
                    }
                }
            };
            if let Err(e) = self
                .bus
                .respond(service.clone(), correlation, BusPayload::SyncerReply(reply))
                .await
            {
                warn!(chain = %self.chain, error = %e, "syncer reply undeliverable");
            }
        }
    }

    async fn handle(&self, task: SyncerTask) -> SyncerReply {
        match task {
            SyncerTask::WatchFunding { swap_id, amount } => {
                match self.watcher.watch_funding(swap_id, amount).await {
                    Ok(task_id) => SyncerReply::TaskAccepted { task_id },
                    Err(e) => SyncerReply::Failure {
                        message: e.to_string(),
                    },
                }
            }
            SyncerTask::WatchTransaction { swap_id, txid } => {
                match self.watcher.watch_transaction(swap_id, txid).await {
                    Ok(task_id) => SyncerReply::TaskAccepted { task_id },
                    Err(e) => SyncerReply::Failure {
                        message: e.to_string(),
                    },
                }
            }
            SyncerTask::WatchTimelock { swap_id, blocks } => {
                match self.watcher.watch_timelock(swap_id, blocks).await {
                    Ok(task_id) => SyncerReply::TaskAccepted { task_id },
                    Err(e) => SyncerReply::Failure {
                        message: e.to_string(),
                    },
                }
            }
            SyncerTask::Broadcast { swap_id, tx_hex, .. } => {
                match self.watcher.broadcast(swap_id, tx_hex).await {
                    Ok(txid) => SyncerReply::Broadcasted { txid },
                    Err(e) => SyncerReply::Failure {
                        message: e.to_string(),
                    },
                }
            }
            SyncerTask::AbortTasks { swap_id } => {
                match self.watcher.abort_tasks(swap_id).await {
                    Ok(()) => SyncerReply::TasksAborted { swap_id },
                    Err(e) => SyncerReply::Failure {
                        message: e.to_string(),
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_watcher_service_arms_tasks() {
        let bus = MessageBus::new();

        let mut watcher = MockChainWatcher::new();
        watcher.expect_watch_funding().returning(|_, _| Ok(7));
        watcher
            .expect_broadcast()
            .returning(|_, tx_hex| Ok(format!("txid_of_{}", tx_hex)));
        WatcherService::new(bus.clone(), Blockchain::Arbitrating, watcher).spawn();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let swap_id = SwapId::random();
        let reply = bus
            .request(
                ServiceId::Swap(swap_id),
                Topic::Syncer(Blockchain::Arbitrating),
                BusPayload::Syncer(SyncerTask::WatchFunding {
                    swap_id,
                    amount: 100_000,
                }),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert!(matches!(
            reply.payload,
            BusPayload::SyncerReply(SyncerReply::TaskAccepted { task_id: 7 })
        ));

        let reply = bus
            .request(
                ServiceId::Swap(swap_id),
                Topic::Syncer(Blockchain::Arbitrating),
                BusPayload::Syncer(SyncerTask::Broadcast {
                    swap_id,
                    chain: Blockchain::Arbitrating,
                    tx_hex: "cafe".to_string(),
                }),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        match reply.payload {
            BusPayload::SyncerReply(SyncerReply::Broadcasted { txid }) => {
                assert_eq!(txid, "txid_of_cafe");
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backend_failure_propagates_as_reply() {
        let bus = MessageBus::new();

        let mut watcher = MockChainWatcher::new();
        watcher.expect_watch_timelock().returning(|_, _| {
            Err(WatcherError::Unreachable("connection refused".to_string()))
        });
        WatcherService::new(bus.clone(), Blockchain::Accordant, watcher).spawn();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let swap_id = SwapId::random();
        let reply = bus
            .request(
                ServiceId::Swap(swap_id),
                Topic::Syncer(Blockchain::Accordant),
                BusPayload::Syncer(SyncerTask::WatchTimelock { swap_id, blocks: 144 }),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        match reply.payload {
            BusPayload::SyncerReply(SyncerReply::Failure { message }) => {
                assert!(message.contains("connection refused"));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }
}
