//! Control Bus Messages
//!
//! Request/reply surface the CLI drives: node info, offer management,
//! swap creation and inspection.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Network;
use crate::types::{Offer, OfferId, ProgressEvent, SwapId, SwapInfo, SwapPhase};

/// Requests the Control API answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtlRequest {
    /// Node identity, swap count, uptime
    Info,
    /// Publish an offer for discovery
    MakeOffer { offer: Offer },
    /// Withdraw an open offer
    RevokeOffer { offer_id: OfferId },
    /// Open offers
    ListOffers,
    /// Accept an offer, starting the swap in the Taker role
    TakeOffer { offer_id: OfferId },
    /// Live and historical swaps
    ListSwaps,
    /// Snapshot of one swap
    SwapStatus { swap_id: SwapId },
    /// Recorded state transitions of one swap
    Progress { swap_id: SwapId },
    /// Abort a swap; honored only before any value is locked
    AbortSwap { swap_id: SwapId },
}

/// Replies from the Control API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtlReply {
    Info(NodeInfo),
    OfferCreated { offer_id: OfferId },
    OfferRevoked { offer_id: OfferId },
    Offers(Vec<OfferSummary>),
    SwapStarted { swap_id: SwapId },
    Swaps(Vec<SwapInfo>),
    Swap(SwapInfo),
    Progress {
        events: Vec<ProgressEvent>,
        /// True when the swap has ended; the stream will grow no further
        terminal: bool,
    },
    AbortAccepted { swap_id: SwapId },
    /// Explicit error classification, never a raw internal fault
    Failure {
        code: String,
        message: String,
        swap_id: Option<SwapId>,
        phase: Option<SwapPhase>,
    },
}

impl CtlReply {
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failure {
            code: code.into(),
            message: message.into(),
            swap_id: None,
            phase: None,
        }
    }

    pub fn swap_failure(
        code: impl Into<String>,
        message: impl Into<String>,
        swap_id: SwapId,
        phase: Option<SwapPhase>,
    ) -> Self {
        Self::Failure {
            code: code.into(),
            message: message.into(),
            swap_id: Some(swap_id),
            phase,
        }
    }
}

/// Node identity and counters reported by `info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: Uuid,
    pub version: String,
    pub network: Network,
    pub uptime_secs: u64,
    pub open_offers: usize,
    pub swaps_live: usize,
    pub swaps_history: usize,
    pub peer_port: u16,
    pub ctl_port: u16,
}

/// One entry of `list-offers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferSummary {
    pub offer_id: OfferId,
    pub offer: Offer,
    pub created_at: u64,
}
