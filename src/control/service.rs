//! Control API Service
//!
//! Bus service answering the operations a CLI client drives: node info,
//! offer management, swap creation and inspection. Every reply carries
//! an explicit classification on failure, with the swap id and phase at
//! the time of the error, never a raw internal fault.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{
    BusPayload, CtlReply, CtlRequest, EventSender, MessageBus, NodeInfo, ServiceId, Topic,
};
use crate::config::FarcasterConfig;
use crate::offerbook::{OfferBook, OfferBookError};
use crate::registry::SwapRegistry;
use crate::swap::engine::{EngineConfig, SwapEngine};
use crate::types::{OfferId, SwapEventKind, SwapId, TradeRole};

/// The control service: owns the offer book, creates swaps, reads the
/// registry.
pub struct ControlService {
    bus: MessageBus,
    registry: SwapRegistry,
    offers: OfferBook,
    config: FarcasterConfig,
    engine_config: EngineConfig,
    node_id: Uuid,
    started_at: Instant,
    events: EventSender,
}

impl ControlService {
    pub fn new(
        bus: MessageBus,
        registry: SwapRegistry,
        offers: OfferBook,
        config: FarcasterConfig,
    ) -> Self {
        let engine_config = EngineConfig::from_config(&config);
        let events = EventSender::new(bus.clone(), ServiceId::Control);
        Self {
            bus,
            registry,
            offers,
            config,
            engine_config,
            node_id: Uuid::new_v4(),
            started_at: Instant::now(),
            events,
        }
    }

    pub fn spawn(self) {
        tokio::spawn(self.run());
    }

    pub async fn run(self) {
        let mut rx = self
            .bus
            .register(ServiceId::Control, Topic::Control)
            .await;
        info!(node_id = %self.node_id, "control service listening on bus");
        while let Some(msg) = rx.recv().await {
            let Some(correlation) = msg.correlation else {
                debug!("control ignores uncorrelated messages");
                continue;
            };
            let reply = match msg.payload {
                BusPayload::Ctl(request) => self.handle(request).await,
                other => {
                    debug!(?other, "unsupported payload on control topic");
                    CtlReply::failure("BAD_REQUEST", "control accepts ctl requests only")
                }
            };
            if let Err(e) = self
                .bus
                .respond(ServiceId::Control, correlation, BusPayload::CtlReply(reply))
                .await
            {
                warn!(error = %e, "control reply undeliverable");
            }
        }
    }

    async fn handle(&self, request: CtlRequest) -> CtlReply {
        match request {
            CtlRequest::Info => self.info().await,
            CtlRequest::MakeOffer { offer } => match self.offers.publish(offer).await {
                Ok(offer_id) => CtlReply::OfferCreated { offer_id },
                Err(e) => CtlReply::failure(offer_error_code(&e), e.to_string()),
            },
            CtlRequest::RevokeOffer { offer_id } => match self.offers.revoke(&offer_id).await {
                Ok(()) => CtlReply::OfferRevoked { offer_id },
                Err(e) => CtlReply::failure(offer_error_code(&e), e.to_string()),
            },
            CtlRequest::ListOffers => CtlReply::Offers(self.offers.list_open().await),
            CtlRequest::TakeOffer { offer_id } => self.take_offer(offer_id).await,
            CtlRequest::ListSwaps => {
                let mut swaps = self.registry.list_active().await;
                swaps.extend(self.registry.list_history().await);
                CtlReply::Swaps(swaps)
            }
            CtlRequest::SwapStatus { swap_id } => self.swap_status(swap_id).await,
            CtlRequest::Progress { swap_id } => self.progress(swap_id).await,
            CtlRequest::AbortSwap { swap_id } => self.abort_swap(swap_id).await,
        }
    }

    async fn info(&self) -> CtlReply {
        let (swaps_live, swaps_history) = self.registry.counts().await;
        CtlReply::Info(NodeInfo {
            node_id: self.node_id,
            version: env!("CARGO_PKG_VERSION").to_string(),
            network: self.config.network,
            uptime_secs: self.started_at.elapsed().as_secs(),
            open_offers: self.offers.open_count().await,
            swaps_live,
            swaps_history,
            peer_port: self.config.peer_port,
            ctl_port: self.config.ctl_port,
        })
    }

    /// Accept an offer: the taker gets the swap role the maker did not
    /// pick, and the engine starts immediately in `initialized`.
    async fn take_offer(&self, offer_id: OfferId) -> CtlReply {
        let offer = match self.offers.take(&offer_id).await {
            Ok(offer) => offer,
            Err(e) => return CtlReply::failure(offer_error_code(&e), e.to_string()),
        };

        let swap_id = SwapId::random();
        let role = offer.maker_role.other();
        match SwapEngine::spawn(
            self.bus.clone(),
            self.registry.clone(),
            self.engine_config.clone(),
            swap_id,
            offer,
            role,
            TradeRole::Taker,
        )
        .await
        {
            Ok(()) => {
                info!(%swap_id, %offer_id, %role, "offer taken, swap started");
                CtlReply::SwapStarted { swap_id }
            }
            Err(e) => CtlReply::failure("REGISTRY_ERROR", e.to_string()),
        }
    }

    async fn swap_status(&self, swap_id: SwapId) -> CtlReply {
        if let Some(handle) = self.registry.get(swap_id).await {
            return CtlReply::Swap(handle.info.read().await.clone());
        }
        if let Some(record) = self.registry.record(swap_id).await {
            return CtlReply::Swap(record.info);
        }
        CtlReply::swap_failure("SWAP_NOT_FOUND", "no such swap", swap_id, None)
    }

    /// Transition log of one swap. For a live swap the stream is still
    /// growing; for an ended one it is final and will never restart.
    async fn progress(&self, swap_id: SwapId) -> CtlReply {
        if let Some(handle) = self.registry.get(swap_id).await {
            return CtlReply::Progress {
                events: handle.log.read().await.clone(),
                terminal: false,
            };
        }
        if let Some(record) = self.registry.record(swap_id).await {
            return CtlReply::Progress {
                events: record.transitions,
                terminal: true,
            };
        }
        CtlReply::swap_failure("SWAP_NOT_FOUND", "no such swap", swap_id, None)
    }

    /// Relay a user abort to the owning engine and return its verdict.
    async fn abort_swap(&self, swap_id: SwapId) -> CtlReply {
        if !self.registry.is_active(swap_id).await {
            if let Some(record) = self.registry.record(swap_id).await {
                return CtlReply::swap_failure(
                    "STALE_EVENT",
                    "swap already ended",
                    swap_id,
                    Some(record.info.phase),
                );
            }
            return CtlReply::swap_failure("SWAP_NOT_FOUND", "no such swap", swap_id, None);
        }

        match self
            .events
            .request(
                swap_id,
                SwapEventKind::UserAbort,
                self.engine_config.request_timeout,
            )
            .await
        {
            Ok(reply) => match reply.payload {
                BusPayload::CtlReply(reply) => reply,
                other => {
                    warn!(%swap_id, ?other, "unexpected engine reply to abort");
                    CtlReply::swap_failure("INTERNAL", "unexpected engine reply", swap_id, None)
                }
            },
            Err(e) => CtlReply::swap_failure(
                "RESOURCE_UNAVAILABLE",
                format!("swap engine unreachable: {}", e),
                swap_id,
                None,
            ),
        }
    }
}

fn offer_error_code(error: &OfferBookError) -> &'static str {
    match error {
        OfferBookError::Duplicate(_) => "OFFER_DUPLICATE",
        OfferBookError::NotFound(_) => "OFFER_NOT_FOUND",
        OfferBookError::NotOpen(_, _) => "OFFER_NOT_OPEN",
        OfferBookError::Invalid(_) => "OFFER_INVALID",
    }
}

/// Wire the control service into a fresh daemon. Returns the pieces the
/// HTTP face needs.
pub fn start(
    bus: MessageBus,
    registry: SwapRegistry,
    offers: OfferBook,
    config: FarcasterConfig,
) -> Arc<crate::control::server::AppState> {
    let timeout = config.bus_timeout();
    ControlService::new(bus.clone(), registry.clone(), offers, config).spawn();
    Arc::new(crate::control::server::AppState {
        bus,
        registry,
        request_timeout: timeout,
    })
}
