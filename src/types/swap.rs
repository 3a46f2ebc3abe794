//! Swap Types
//!
//! Identifiers, roles, phases, events and artifacts for a swap moving
//! through its lifecycle:
//! initialized → funding_negotiated → funding_locked → arbitrating_locked
//! → buy_procedure_signature → completed, with the refund branch
//! refund_broadcast → refunded and the pre-funding abort.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::offer::{OfferId, TradeRole};

/// Unique swap identifier, generated at offer acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwapId(Uuid);

impl SwapId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SwapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl std::str::FromStr for SwapId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| format!("invalid swap id: {}", e))
    }
}

/// Cryptographic role in the swap protocol, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapRole {
    Alice,
    Bob,
}

impl SwapRole {
    pub fn other(&self) -> Self {
        match self {
            Self::Alice => Self::Bob,
            Self::Bob => Self::Alice,
        }
    }

    /// Chain this role funds with its own lock transaction.
    pub fn lock_chain(&self) -> Blockchain {
        match self {
            // Bob locks the arbitrating side first; Alice follows on the
            // accordant side once she has seen his lock.
            Self::Bob => Blockchain::Arbitrating,
            Self::Alice => Blockchain::Accordant,
        }
    }
}

impl std::fmt::Display for SwapRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alice => write!(f, "alice"),
            Self::Bob => write!(f, "bob"),
        }
    }
}

impl std::str::FromStr for SwapRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "alice" => Ok(Self::Alice),
            "bob" => Ok(Self::Bob),
            _ => Err(format!("unknown swap role: {}", s)),
        }
    }
}

/// The two chains of a swap. Concrete chain daemons live behind the
/// watcher interface; the core only distinguishes the timelocked
/// (arbitrating) side from the other (accordant) side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Blockchain {
    Arbitrating,
    Accordant,
}

impl Blockchain {
    pub fn other(&self) -> Self {
        match self {
            Self::Arbitrating => Self::Accordant,
            Self::Accordant => Self::Arbitrating,
        }
    }
}

impl std::fmt::Display for Blockchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Arbitrating => write!(f, "arbitrating"),
            Self::Accordant => write!(f, "accordant"),
        }
    }
}

/// State-machine node a swap currently occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapPhase {
    /// Swap registered, watchers being armed, local keys requested
    Initialized,
    /// Counterparty parameters verified, watch tasks armed on both chains
    FundingNegotiated,
    /// Lock transaction seen on the arbitrating chain with the exact amount
    FundingLocked,
    /// Accordant-chain lock also seen; both sides funded
    ArbitratingLocked,
    /// Counterparty buy signature share verified, buy broadcast issued
    BuyProcedureSignature,
    /// Buy transaction observed on-chain
    Completed,
    /// Refund transaction broadcast after confirmed timelock expiry
    RefundBroadcast,
    /// Refund transaction observed on-chain
    Refunded,
    /// Swap ended before any value was locked
    Aborted,
}

impl SwapPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Refunded | Self::Aborted)
    }

    /// True once an on-chain lock makes immediate abort unsafe; from here
    /// the refund-timelock path is the only legal exit.
    pub fn value_locked(&self) -> bool {
        matches!(
            self,
            Self::FundingLocked
                | Self::ArbitratingLocked
                | Self::BuyProcedureSignature
                | Self::RefundBroadcast
        )
    }
}

impl std::fmt::Display for SwapPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initialized => "initialized",
            Self::FundingNegotiated => "funding_negotiated",
            Self::FundingLocked => "funding_locked",
            Self::ArbitratingLocked => "arbitrating_locked",
            Self::BuyProcedureSignature => "buy_procedure_signature",
            Self::Completed => "completed",
            Self::RefundBroadcast => "refund_broadcast",
            Self::Refunded => "refunded",
            Self::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for SwapPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialized" => Ok(Self::Initialized),
            "funding_negotiated" => Ok(Self::FundingNegotiated),
            "funding_locked" => Ok(Self::FundingLocked),
            "arbitrating_locked" => Ok(Self::ArbitratingLocked),
            "buy_procedure_signature" => Ok(Self::BuyProcedureSignature),
            "completed" => Ok(Self::Completed),
            "refund_broadcast" => Ok(Self::RefundBroadcast),
            "refunded" => Ok(Self::Refunded),
            "aborted" => Ok(Self::Aborted),
            _ => Err(format!("unknown swap phase: {}", s)),
        }
    }
}

/// How a swap ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Buy transaction confirmed; both parties received the traded funds
    Success,
    /// Refund path taken after timelock expiry
    Refund,
    /// Ended before any value was locked
    Abort,
    /// Protocol violation forced the swap off the happy path
    Failure,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Refund => "refund",
            Self::Abort => "abort",
            Self::Failure => "failure",
        };
        write!(f, "{}", s)
    }
}

/// Protocol artifact kinds accumulated over a swap's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Our own protocol parameters from the wallet
    LocalParams,
    /// Counterparty protocol parameters
    CounterpartyParams,
    /// Intermediate adaptor signature share
    AdaptorShare,
    /// Counterparty's buy procedure signature share
    BuySignature,
    /// Transaction id of a lock on the named chain
    LockTx,
    /// Transaction id of the buy transaction
    BuyTx,
    /// Transaction id of the refund transaction
    RefundTx,
}

/// A recorded protocol artifact. Artifacts are append-only: once recorded
/// they are never overwritten, enabling replay and audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    /// Chain the artifact belongs to, when chain-specific
    pub chain: Option<Blockchain>,
    /// Opaque payload: hex-encoded material or a transaction id
    pub data: String,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, data: impl Into<String>) -> Self {
        Self {
            kind,
            chain: None,
            data: data.into(),
        }
    }

    pub fn on_chain(kind: ArtifactKind, chain: Blockchain, data: impl Into<String>) -> Self {
        Self {
            kind,
            chain: Some(chain),
            data: data.into(),
        }
    }
}

/// Transaction labels the wallet can sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxLabel {
    Lock,
    Buy,
    Refund,
}

impl TxLabel {
    pub fn artifact_kind(&self) -> ArtifactKind {
        match self {
            Self::Lock => ArtifactKind::LockTx,
            Self::Buy => ArtifactKind::BuyTx,
            Self::Refund => ArtifactKind::RefundTx,
        }
    }
}

impl std::fmt::Display for TxLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Lock => "lock",
            Self::Buy => "buy",
            Self::Refund => "refund",
        };
        write!(f, "{}", s)
    }
}

/// Inbound event driving a swap state machine. The sequence number is
/// assigned by the producing service, per swap, strictly increasing; the
/// engine drops replays at or below its per-source high-water mark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapEvent {
    pub seq: u64,
    pub kind: SwapEventKind,
}

/// The closed set of event shapes a swap engine reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SwapEventKind {
    FundingDetected {
        chain: Blockchain,
        txid: String,
        amount: u64,
    },
    SignatureShareReceived {
        artifact: Artifact,
    },
    TimelockExpired {
        chain: Blockchain,
        height: u64,
    },
    UserAbort,
}

impl SwapEventKind {
    pub fn is_expiry(&self) -> bool {
        matches!(self, Self::TimelockExpired { .. })
    }
}

/// Read-only snapshot of a swap, shared with the registry and the
/// Control API. The engine task is the only writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapInfo {
    pub swap_id: SwapId,
    pub offer_id: OfferId,
    pub role: SwapRole,
    pub trade_role: TradeRole,
    pub phase: SwapPhase,
    /// Set when retries against wallet/watcher services are exhausted
    pub stalled: bool,
    pub outcome: Option<Outcome>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl SwapInfo {
    pub fn new(swap_id: SwapId, offer_id: OfferId, role: SwapRole, trade_role: TradeRole) -> Self {
        let now = chrono::Utc::now().timestamp() as u64;
        Self {
            swap_id,
            offer_id,
            role,
            trade_role,
            phase: SwapPhase::Initialized,
            stalled: false,
            outcome: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A single state transition, streamed to `progress` subscribers and
/// recorded in the per-swap transition log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub swap_id: SwapId,
    pub from: Option<SwapPhase>,
    pub to: SwapPhase,
    pub message: String,
    /// True on the final event of a swap's stream
    pub terminal: bool,
    pub timestamp: u64,
}

impl ProgressEvent {
    pub fn transition(swap_id: SwapId, from: SwapPhase, to: SwapPhase, message: String) -> Self {
        Self {
            swap_id,
            from: Some(from),
            to,
            message,
            terminal: to.is_terminal(),
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }
}

/// Immutable record a terminal swap leaves behind in the history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRecord {
    pub info: SwapInfo,
    pub transitions: Vec<ProgressEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display_roundtrip() {
        for phase in [
            SwapPhase::Initialized,
            SwapPhase::FundingNegotiated,
            SwapPhase::FundingLocked,
            SwapPhase::ArbitratingLocked,
            SwapPhase::BuyProcedureSignature,
            SwapPhase::Completed,
            SwapPhase::RefundBroadcast,
            SwapPhase::Refunded,
            SwapPhase::Aborted,
        ] {
            let parsed: SwapPhase = phase.to_string().parse().unwrap();
            assert_eq!(parsed, phase);
        }
        assert!("negotiating".parse::<SwapPhase>().is_err());
    }

    #[test]
    fn test_terminal_phases() {
        assert!(SwapPhase::Completed.is_terminal());
        assert!(SwapPhase::Refunded.is_terminal());
        assert!(SwapPhase::Aborted.is_terminal());
        assert!(!SwapPhase::Initialized.is_terminal());
        assert!(!SwapPhase::RefundBroadcast.is_terminal());
    }

    #[test]
    fn test_value_locked() {
        assert!(!SwapPhase::Initialized.value_locked());
        assert!(!SwapPhase::FundingNegotiated.value_locked());
        assert!(SwapPhase::FundingLocked.value_locked());
        assert!(SwapPhase::RefundBroadcast.value_locked());
    }

    #[test]
    fn test_role_lock_chains() {
        assert_eq!(SwapRole::Bob.lock_chain(), Blockchain::Arbitrating);
        assert_eq!(SwapRole::Alice.lock_chain(), Blockchain::Accordant);
        assert_eq!(SwapRole::Alice.other(), SwapRole::Bob);
    }

    #[test]
    fn test_swap_id_roundtrip() {
        let id = SwapId::random();
        let parsed: SwapId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<SwapId>().is_err());
    }

    #[test]
    fn test_event_expiry_marker() {
        let expiry = SwapEventKind::TimelockExpired {
            chain: Blockchain::Arbitrating,
            height: 800_000,
        };
        assert!(expiry.is_expiry());
        assert!(!SwapEventKind::UserAbort.is_expiry());
    }
}
