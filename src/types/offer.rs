//! Offer Types
//!
//! An offer describes the terms of a swap: amounts on both chains, the
//! cancel timelock, and which swap role the maker takes. Offers are
//! immutable once published; swaps reference them, never copy them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Network;
use crate::types::swap::SwapRole;

/// Negotiation-level role: the maker publishes an offer, the taker accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeRole {
    Maker,
    Taker,
}

impl TradeRole {
    pub fn other(&self) -> Self {
        match self {
            Self::Maker => Self::Taker,
            Self::Taker => Self::Maker,
        }
    }
}

impl std::fmt::Display for TradeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Maker => write!(f, "maker"),
            Self::Taker => write!(f, "taker"),
        }
    }
}

impl std::str::FromStr for TradeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "maker" => Ok(Self::Maker),
            "taker" => Ok(Self::Taker),
            _ => Err(format!("unknown trade role: {}", s)),
        }
    }
}

/// Deterministic offer identifier: SHA-256 over the canonical encoding of
/// the offer terms, rendered as hex. Identical terms always hash to the
/// same id, which doubles as duplicate-publication detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfferId(String);

impl OfferId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OfferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for OfferId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("offer id must be 64 hex chars, got: {}", s));
        }
        Ok(Self(s.to_lowercase()))
    }
}

/// Published swap terms. Amounts are in the base unit of each chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    /// Network the swap executes on
    pub network: Network,
    /// Amount locked on the arbitrating (Bitcoin-like) chain
    pub arbitrating_amount: u64,
    /// Amount locked on the accordant (Monero-like) chain
    pub accordant_amount: u64,
    /// Blocks on the arbitrating chain until the refund path opens
    pub cancel_timelock: u32,
    /// Swap role the maker plays; the taker gets the other one
    pub maker_role: SwapRole,
}

impl Offer {
    /// Compute the deterministic id of this offer.
    pub fn id(&self) -> OfferId {
        let mut hasher = Sha256::new();
        hasher.update(self.network.to_string().as_bytes());
        hasher.update(self.arbitrating_amount.to_be_bytes());
        hasher.update(self.accordant_amount.to_be_bytes());
        hasher.update(self.cancel_timelock.to_be_bytes());
        hasher.update(self.maker_role.to_string().as_bytes());
        OfferId(hex::encode(hasher.finalize()))
    }

    /// Implied exchange rate: accordant units per arbitrating unit.
    pub fn rate(&self) -> f64 {
        if self.arbitrating_amount == 0 {
            return 0.0;
        }
        self.accordant_amount as f64 / self.arbitrating_amount as f64
    }

    /// Validate offer terms before publication.
    pub fn validate(&self) -> Result<(), String> {
        if self.arbitrating_amount == 0 {
            return Err("arbitrating amount must be non-zero".to_string());
        }
        if self.accordant_amount == 0 {
            return Err("accordant amount must be non-zero".to_string());
        }
        if self.cancel_timelock == 0 {
            return Err("cancel timelock must be non-zero".to_string());
        }
        Ok(())
    }
}
