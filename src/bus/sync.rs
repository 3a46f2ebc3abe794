//! Wallet and Syncer Bus Messages
//!
//! Tasks the swap engines issue to the chain watchers and the wallet,
//! and the corresponding replies. All round-trips are bounded by the
//! caller's timeout; nothing here blocks indefinitely.

use serde::{Deserialize, Serialize};

use crate::types::{Artifact, Blockchain, SwapId, SwapRole, TxLabel};

/// Tasks for a chain syncer/watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "task")]
pub enum SyncerTask {
    /// Watch for a lock transaction funding this swap with the exact
    /// expected amount
    WatchFunding { swap_id: SwapId, amount: u64 },
    /// Watch a known transaction until it confirms
    WatchTransaction { swap_id: SwapId, txid: String },
    /// Report when the chain passes the refund timelock, measured in
    /// blocks from the lock confirmation
    WatchTimelock { swap_id: SwapId, blocks: u32 },
    /// Broadcast a signed transaction
    Broadcast {
        swap_id: SwapId,
        chain: Blockchain,
        tx_hex: String,
    },
    /// Drop all watch tasks for a swap
    AbortTasks { swap_id: SwapId },
}

/// Replies from a chain syncer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reply")]
pub enum SyncerReply {
    TaskAccepted { task_id: u64 },
    Broadcasted { txid: String },
    TasksAborted { swap_id: SwapId },
    Height { height: u64 },
    Failure { message: String },
}

/// Requests to the wallet service. The adaptor signature scheme itself is
/// opaque: the wallet produces and verifies artifacts, the engine only
/// sequences them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "request")]
pub enum WalletRequest {
    /// Derive this side's protocol parameters for a new swap
    DeriveParams { swap_id: SwapId, role: SwapRole },
    /// Verify a counterparty artifact
    VerifyShare { swap_id: SwapId, artifact: Artifact },
    /// Produce a signed transaction for broadcast
    SignTransaction { swap_id: SwapId, label: TxLabel },
}

/// Replies from the wallet service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reply")]
pub enum WalletReply {
    Params { artifact: Artifact },
    ShareVerified { valid: bool },
    SignedTx {
        label: TxLabel,
        txid: String,
        tx_hex: String,
    },
    Failure { message: String },
}
