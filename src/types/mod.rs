//! Shared domain types: offers, swap identifiers, phases, events,
//! artifacts, and the snapshots exposed to the Control API.

pub mod offer;
pub mod swap;

pub use offer::{Offer, OfferId, TradeRole};
pub use swap::{
    Artifact, ArtifactKind, Blockchain, Outcome, ProgressEvent, SwapEvent, SwapEventKind, SwapId,
    SwapInfo, SwapPhase, SwapRecord, SwapRole, TxLabel,
};
