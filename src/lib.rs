//! farcasterd - Cross-Chain Atomic Swap Daemon
//!
//! Negotiates and executes trust-minimized atomic swaps between a
//! Bitcoin-like (arbitrating) chain and a Monero-like (accordant)
//! chain. One state machine per active swap, driven by events from
//! per-chain watchers and an opaque wallet capability, all connected
//! through an internal message bus the Control API is also served over.
//!
//! ## Components
//!
//! 1. **Message Bus** - topic-routed publish and correlated
//!    request/response between every service in the process
//! 2. **Swap Engine** - one task per swap owning its SwapState,
//!    executing the pure transition function's commands
//! 3. **Swap Registry** - live swap table plus the immutable history log
//! 4. **Offer Book** - published offers and their open/taken lifecycle
//! 5. **Control API** - info / make-offer / take-offer / list-swaps /
//!    progress, over the bus and as HTTP/WS on the control port
//!
//! The wallet RPC and the per-chain syncers are external collaborators:
//! implement [`wallet::WalletInterface`] and [`watcher::ChainWatcher`]
//! and attach them with the provided bus adapters.

pub mod bus;
pub mod common;
pub mod config;
pub mod control;
pub mod logging;
pub mod offerbook;
pub mod registry;
pub mod swap;
pub mod types;
pub mod wallet;
pub mod watcher;

// Re-exports: bus
pub use bus::{BusError, BusMessage, BusPayload, EventSender, MessageBus, ServiceId, Topic};

// Re-exports: errors
pub use common::{FarcasterError, Result};

// Re-exports: configuration
pub use config::{ConfigError, FarcasterConfig, Network};

// Re-exports: swap engine
pub use swap::{EngineConfig, SwapEngine, SwapState};

// Re-exports: registry and offers
pub use offerbook::{OfferBook, OfferBookError};
pub use registry::{SwapHandle, SwapRegistry};

// Re-exports: control surface
pub use control::{AppState, ControlService, SharedAppState};

// Re-exports: external collaborator seams
pub use wallet::{SignedTx, WalletError, WalletInterface, WalletService};
pub use watcher::{ChainWatcher, WatcherError, WatcherService};

// Re-exports: domain types
pub use types::{
    Artifact, ArtifactKind, Blockchain, Offer, OfferId, Outcome, ProgressEvent, SwapEvent,
    SwapEventKind, SwapId, SwapInfo, SwapPhase, SwapRecord, SwapRole, TradeRole, TxLabel,
};
