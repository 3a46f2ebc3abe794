//! Offer Book
//!
//! Published offers and their lifecycle: open → taken | revoked. An
//! offer is taken at most once; taking it hands the immutable terms to
//! the new swap by reference.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::bus::OfferSummary;
use crate::types::{Offer, OfferId};

/// Offer lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferStatus {
    Open,
    Taken,
    Revoked,
}

impl std::fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Taken => "taken",
            Self::Revoked => "revoked",
        };
        write!(f, "{}", s)
    }
}

/// Offer book errors
#[derive(Debug, Error)]
pub enum OfferBookError {
    #[error("offer {0} already published")]
    Duplicate(OfferId),

    #[error("offer {0} not found")]
    NotFound(OfferId),

    #[error("offer {0} is {1}, not open")]
    NotOpen(OfferId, OfferStatus),

    #[error("invalid offer: {0}")]
    Invalid(String),
}

struct OfferEntry {
    offer: Arc<Offer>,
    status: OfferStatus,
    created_at: u64,
}

/// Shared offer book. Cheap to clone.
#[derive(Clone)]
pub struct OfferBook {
    inner: Arc<RwLock<HashMap<OfferId, OfferEntry>>>,
}

impl OfferBook {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publish an offer for discovery. Identical terms hash to the same
    /// id, so double publication is rejected.
    pub async fn publish(&self, offer: Offer) -> Result<OfferId, OfferBookError> {
        offer.validate().map_err(OfferBookError::Invalid)?;
        let offer_id = offer.id();

        let mut offers = self.inner.write().await;
        if offers.contains_key(&offer_id) {
            return Err(OfferBookError::Duplicate(offer_id));
        }
        offers.insert(
            offer_id.clone(),
            OfferEntry {
                offer: Arc::new(offer),
                status: OfferStatus::Open,
                created_at: chrono::Utc::now().timestamp() as u64,
            },
        );
        info!(%offer_id, "offer published");
        Ok(offer_id)
    }

    /// Consume an open offer for a new swap.
    pub async fn take(&self, offer_id: &OfferId) -> Result<Arc<Offer>, OfferBookError> {
        let mut offers = self.inner.write().await;
        let entry = offers
            .get_mut(offer_id)
            .ok_or_else(|| OfferBookError::NotFound(offer_id.clone()))?;
        if entry.status != OfferStatus::Open {
            return Err(OfferBookError::NotOpen(offer_id.clone(), entry.status));
        }
        entry.status = OfferStatus::Taken;
        debug!(%offer_id, "offer taken");
        Ok(entry.offer.clone())
    }

    /// Withdraw an open offer.
    pub async fn revoke(&self, offer_id: &OfferId) -> Result<(), OfferBookError> {
        let mut offers = self.inner.write().await;
        let entry = offers
            .get_mut(offer_id)
            .ok_or_else(|| OfferBookError::NotFound(offer_id.clone()))?;
        if entry.status != OfferStatus::Open {
            return Err(OfferBookError::NotOpen(offer_id.clone(), entry.status));
        }
        entry.status = OfferStatus::Revoked;
        info!(%offer_id, "offer revoked");
        Ok(())
    }

    /// Open offers, for discovery.
    pub async fn list_open(&self) -> Vec<OfferSummary> {
        self.inner
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.status == OfferStatus::Open)
            .map(|(offer_id, entry)| OfferSummary {
                offer_id: offer_id.clone(),
                offer: (*entry.offer).clone(),
                created_at: entry.created_at,
            })
            .collect()
    }

    pub async fn open_count(&self) -> usize {
        self.inner
            .read()
            .await
            .values()
            .filter(|entry| entry.status == OfferStatus::Open)
            .count()
    }
}

impl Default for OfferBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;
    use crate::types::SwapRole;

    fn sample_offer() -> Offer {
        Offer {
            network: Network::Testnet,
            arbitrating_amount: 100_000,
            accordant_amount: 2_000_000_000,
            cancel_timelock: 144,
            maker_role: SwapRole::Alice,
        }
    }

    #[tokio::test]
    async fn test_publish_take_lifecycle() {
        let book = OfferBook::new();
        let offer_id = book.publish(sample_offer()).await.unwrap();
        assert_eq!(book.open_count().await, 1);

        let offer = book.take(&offer_id).await.unwrap();
        assert_eq!(offer.arbitrating_amount, 100_000);
        assert_eq!(book.open_count().await, 0);

        // An offer is taken at most once
        let err = book.take(&offer_id).await.unwrap_err();
        assert!(matches!(err, OfferBookError::NotOpen(_, OfferStatus::Taken)));
    }

    #[tokio::test]
    async fn test_duplicate_publication_rejected() {
        let book = OfferBook::new();
        book.publish(sample_offer()).await.unwrap();
        let err = book.publish(sample_offer()).await.unwrap_err();
        assert!(matches!(err, OfferBookError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_revoke() {
        let book = OfferBook::new();
        let offer_id = book.publish(sample_offer()).await.unwrap();
        book.revoke(&offer_id).await.unwrap();
        assert_eq!(book.open_count().await, 0);

        let err = book.take(&offer_id).await.unwrap_err();
        assert!(matches!(
            err,
            OfferBookError::NotOpen(_, OfferStatus::Revoked)
        ));
    }

    #[tokio::test]
    async fn test_invalid_offer_rejected() {
        let book = OfferBook::new();
        let mut offer = sample_offer();
        offer.cancel_timelock = 0;
        assert!(matches!(
            book.publish(offer).await,
            Err(OfferBookError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_offer() {
        let book = OfferBook::new();
        let offer_id = sample_offer().id();
        assert!(matches!(
            book.take(&offer_id).await,
            Err(OfferBookError::NotFound(_))
        ));
    }
}
