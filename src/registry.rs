//! Swap Registry
//!
//! Process-wide table of active swaps plus the immutable history log of
//! terminal ones. Insertion happens only on offer acceptance, removal
//! only on terminal transition. Lookups and listings are concurrent;
//! structural mutation is serialized by the registry locks. Per-swap
//! state mutation is not the registry's business: each engine task owns
//! its SwapState and the registry only ever sees read snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::types::{ProgressEvent, SwapId, SwapInfo, SwapRecord};

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("swap {0} already registered")]
    Duplicate(SwapId),

    #[error("swap {0} not found")]
    NotFound(SwapId),
}

/// Handle to a live swap: the shared snapshot and the transition log,
/// both written by the owning engine task only.
#[derive(Clone)]
pub struct SwapHandle {
    pub info: Arc<RwLock<SwapInfo>>,
    pub log: Arc<RwLock<Vec<ProgressEvent>>>,
}

impl SwapHandle {
    pub fn new(info: SwapInfo) -> Self {
        Self {
            info: Arc::new(RwLock::new(info)),
            log: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

struct RegistryInner {
    active: RwLock<HashMap<SwapId, SwapHandle>>,
    history: RwLock<HashMap<SwapId, SwapRecord>>,
    progress: broadcast::Sender<ProgressEvent>,
}

/// Shared registry. Cheap to clone; all clones see the same tables.
#[derive(Clone)]
pub struct SwapRegistry {
    inner: Arc<RegistryInner>,
}

impl SwapRegistry {
    pub fn new() -> Self {
        let (progress, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(RegistryInner {
                active: RwLock::new(HashMap::new()),
                history: RwLock::new(HashMap::new()),
                progress,
            }),
        }
    }

    /// Register a new live swap. A SwapId maps to at most one live
    /// SwapState, ever; ids of retired swaps are not reusable either.
    pub async fn insert(&self, swap_id: SwapId, handle: SwapHandle) -> Result<(), RegistryError> {
        if self.inner.history.read().await.contains_key(&swap_id) {
            return Err(RegistryError::Duplicate(swap_id));
        }
        let mut active = self.inner.active.write().await;
        if active.contains_key(&swap_id) {
            return Err(RegistryError::Duplicate(swap_id));
        }
        active.insert(swap_id, handle);
        debug!(%swap_id, "swap registered");
        Ok(())
    }

    pub async fn get(&self, swap_id: SwapId) -> Option<SwapHandle> {
        self.inner.active.read().await.get(&swap_id).cloned()
    }

    pub async fn is_active(&self, swap_id: SwapId) -> bool {
        self.inner.active.read().await.contains_key(&swap_id)
    }

    /// Move a terminal swap from the live table to the history log.
    pub async fn retire(&self, swap_id: SwapId, record: SwapRecord) -> Result<(), RegistryError> {
        let removed = self.inner.active.write().await.remove(&swap_id);
        if removed.is_none() {
            return Err(RegistryError::NotFound(swap_id));
        }
        self.inner.history.write().await.insert(swap_id, record);
        debug!(%swap_id, "swap retired to history");
        Ok(())
    }

    /// Snapshot of all live swaps.
    pub async fn list_active(&self) -> Vec<SwapInfo> {
        let handles: Vec<SwapHandle> =
            self.inner.active.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(handles.len());
        for handle in handles {
            infos.push(handle.info.read().await.clone());
        }
        infos
    }

    /// Snapshot of all terminal swaps.
    pub async fn list_history(&self) -> Vec<SwapInfo> {
        self.inner
            .history
            .read()
            .await
            .values()
            .map(|r| r.info.clone())
            .collect()
    }

    /// Full record of a terminal swap.
    pub async fn record(&self, swap_id: SwapId) -> Option<SwapRecord> {
        self.inner.history.read().await.get(&swap_id).cloned()
    }

    pub async fn counts(&self) -> (usize, usize) {
        let live = self.inner.active.read().await.len();
        let history = self.inner.history.read().await.len();
        (live, history)
    }

    /// Follow state transitions across all swaps. Receivers filter by
    /// swap id; nothing is replayed to late subscribers.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.progress.subscribe()
    }

    pub fn publish_progress(&self, event: ProgressEvent) {
        // No subscribers is fine
        let _ = self.inner.progress.send(event);
    }
}

impl Default for SwapRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;
    use crate::types::{Offer, SwapRole, TradeRole};

    fn sample_info(swap_id: SwapId) -> SwapInfo {
        let offer = Offer {
            network: Network::Testnet,
            arbitrating_amount: 1,
            accordant_amount: 2,
            cancel_timelock: 10,
            maker_role: SwapRole::Alice,
        };
        SwapInfo::new(swap_id, offer.id(), SwapRole::Bob, TradeRole::Taker)
    }

    #[tokio::test]
    async fn test_insert_and_duplicate() {
        let registry = SwapRegistry::new();
        let swap_id = SwapId::random();

        registry
            .insert(swap_id, SwapHandle::new(sample_info(swap_id)))
            .await
            .unwrap();
        let err = registry
            .insert(swap_id, SwapHandle::new(sample_info(swap_id)))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_retire_moves_to_history() {
        let registry = SwapRegistry::new();
        let swap_id = SwapId::random();
        let info = sample_info(swap_id);

        registry
            .insert(swap_id, SwapHandle::new(info.clone()))
            .await
            .unwrap();
        assert_eq!(registry.counts().await, (1, 0));

        registry
            .retire(
                swap_id,
                SwapRecord {
                    info,
                    transitions: Vec::new(),
                },
            )
            .await
            .unwrap();
        assert_eq!(registry.counts().await, (0, 1));
        assert!(!registry.is_active(swap_id).await);
        assert!(registry.record(swap_id).await.is_some());

        // A retired id cannot come back to life
        let err = registry
            .insert(swap_id, SwapHandle::new(sample_info(swap_id)))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_retire_unknown_swap() {
        let registry = SwapRegistry::new();
        let swap_id = SwapId::random();
        let err = registry
            .retire(
                swap_id,
                SwapRecord {
                    info: sample_info(swap_id),
                    transitions: Vec::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }
}
