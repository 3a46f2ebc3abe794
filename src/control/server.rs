//! Control Endpoint
//!
//! HTTP/WS face of the control bus on the configured port (9981 by
//! default). Every route translates 1:1 onto a bus request to the
//! control service; `progress` is additionally exposed as a WebSocket
//! that replays the recorded transitions and then follows the live
//! stream until the swap's terminal event.
//!
//! The endpoint binds loopback by default: it is not safe to expose
//! publicly.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::bus::{BusPayload, CtlReply, CtlRequest, MessageBus, NodeInfo, OfferSummary, ServiceId, Topic};
use crate::registry::SwapRegistry;
use crate::types::{Offer, OfferId, ProgressEvent, SwapId, SwapInfo, SwapPhase};

/// Shared state behind every route.
pub struct AppState {
    pub bus: MessageBus,
    pub registry: SwapRegistry,
    pub request_timeout: Duration,
}

pub type SharedAppState = Arc<AppState>;

/// Error body returned to clients: a classification, never an internal
/// fault.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swap_id: Option<SwapId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<SwapPhase>,
}

pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: message.into(),
                swap_id: None,
                phase: None,
            },
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "RESOURCE_UNAVAILABLE",
            message,
        )
    }

    fn from_failure(
        code: String,
        message: String,
        swap_id: Option<SwapId>,
        phase: Option<SwapPhase>,
    ) -> Self {
        let status = match code.as_str() {
            "SWAP_NOT_FOUND" | "OFFER_NOT_FOUND" => StatusCode::NOT_FOUND,
            "OFFER_DUPLICATE" | "OFFER_NOT_OPEN" | "ABORT_DENIED" | "STALE_EVENT" => {
                StatusCode::CONFLICT
            }
            "OFFER_INVALID" | "BAD_REQUEST" => StatusCode::BAD_REQUEST,
            "RESOURCE_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            body: ErrorBody {
                code,
                message,
                swap_id,
                phase,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Round-trip a control request over the bus.
async fn ctl(state: &AppState, request: CtlRequest) -> Result<CtlReply, ApiError> {
    let reply = state
        .bus
        .request(
            ServiceId::Rpc,
            Topic::Control,
            BusPayload::Ctl(request),
            state.request_timeout,
        )
        .await
        .map_err(|e| ApiError::unavailable(format!("control service unreachable: {}", e)))?;
    match reply.payload {
        BusPayload::CtlReply(CtlReply::Failure {
            code,
            message,
            swap_id,
            phase,
        }) => Err(ApiError::from_failure(code, message, swap_id, phase)),
        BusPayload::CtlReply(reply) => Ok(reply),
        other => {
            warn!(?other, "unexpected payload from control service");
            Err(ApiError::internal("unexpected control reply"))
        }
    }
}

pub fn router(state: SharedAppState) -> Router {
    Router::new()
        .route("/info", get(node_info))
        .route("/offers", get(list_offers).post(make_offer))
        .route("/offers/:id", delete(revoke_offer))
        .route("/swaps", get(list_swaps))
        .route("/swaps/take", post(take_offer))
        .route("/swaps/:id", get(swap_status))
        .route("/swaps/:id/progress", get(progress))
        .route("/swaps/:id/abort", post(abort_swap))
        .route("/ws/swaps/:id", get(ws_progress))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve the control endpoint until the process shuts down.
pub async fn serve(state: SharedAppState, addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "control endpoint listening");
    axum::serve(listener, router(state)).await
}

#[derive(Debug, Serialize)]
struct OfferCreatedBody {
    offer_id: OfferId,
}

#[derive(Debug, Serialize)]
struct OfferRevokedBody {
    offer_id: OfferId,
}

#[derive(Debug, Deserialize)]
struct TakeOfferBody {
    offer_id: OfferId,
}

#[derive(Debug, Serialize)]
struct SwapStartedBody {
    swap_id: SwapId,
}

#[derive(Debug, Serialize)]
struct ProgressBody {
    events: Vec<ProgressEvent>,
    terminal: bool,
}

async fn node_info(State(state): State<SharedAppState>) -> Result<Json<NodeInfo>, ApiError> {
    match ctl(&state, CtlRequest::Info).await? {
        CtlReply::Info(info) => Ok(Json(info)),
        _ => Err(ApiError::internal("unexpected control reply")),
    }
}

async fn list_offers(
    State(state): State<SharedAppState>,
) -> Result<Json<Vec<OfferSummary>>, ApiError> {
    match ctl(&state, CtlRequest::ListOffers).await? {
        CtlReply::Offers(offers) => Ok(Json(offers)),
        _ => Err(ApiError::internal("unexpected control reply")),
    }
}

async fn make_offer(
    State(state): State<SharedAppState>,
    Json(offer): Json<Offer>,
) -> Result<(StatusCode, Json<OfferCreatedBody>), ApiError> {
    match ctl(&state, CtlRequest::MakeOffer { offer }).await? {
        CtlReply::OfferCreated { offer_id } => {
            Ok((StatusCode::CREATED, Json(OfferCreatedBody { offer_id })))
        }
        _ => Err(ApiError::internal("unexpected control reply")),
    }
}

async fn revoke_offer(
    State(state): State<SharedAppState>,
    Path(id): Path<String>,
) -> Result<Json<OfferRevokedBody>, ApiError> {
    let offer_id: OfferId = id.parse().map_err(ApiError::bad_request)?;
    match ctl(&state, CtlRequest::RevokeOffer { offer_id }).await? {
        CtlReply::OfferRevoked { offer_id } => Ok(Json(OfferRevokedBody { offer_id })),
        _ => Err(ApiError::internal("unexpected control reply")),
    }
}

async fn list_swaps(
    State(state): State<SharedAppState>,
) -> Result<Json<Vec<SwapInfo>>, ApiError> {
    match ctl(&state, CtlRequest::ListSwaps).await? {
        CtlReply::Swaps(swaps) => Ok(Json(swaps)),
        _ => Err(ApiError::internal("unexpected control reply")),
    }
}

async fn take_offer(
    State(state): State<SharedAppState>,
    Json(body): Json<TakeOfferBody>,
) -> Result<(StatusCode, Json<SwapStartedBody>), ApiError> {
    match ctl(
        &state,
        CtlRequest::TakeOffer {
            offer_id: body.offer_id,
        },
    )
    .await?
    {
        CtlReply::SwapStarted { swap_id } => {
            Ok((StatusCode::CREATED, Json(SwapStartedBody { swap_id })))
        }
        _ => Err(ApiError::internal("unexpected control reply")),
    }
}

async fn swap_status(
    State(state): State<SharedAppState>,
    Path(id): Path<String>,
) -> Result<Json<SwapInfo>, ApiError> {
    let swap_id: SwapId = id.parse().map_err(ApiError::bad_request)?;
    match ctl(&state, CtlRequest::SwapStatus { swap_id }).await? {
        CtlReply::Swap(info) => Ok(Json(info)),
        _ => Err(ApiError::internal("unexpected control reply")),
    }
}

async fn progress(
    State(state): State<SharedAppState>,
    Path(id): Path<String>,
) -> Result<Json<ProgressBody>, ApiError> {
    let swap_id: SwapId = id.parse().map_err(ApiError::bad_request)?;
    match ctl(&state, CtlRequest::Progress { swap_id }).await? {
        CtlReply::Progress { events, terminal } => Ok(Json(ProgressBody { events, terminal })),
        _ => Err(ApiError::internal("unexpected control reply")),
    }
}

async fn abort_swap(
    State(state): State<SharedAppState>,
    Path(id): Path<String>,
) -> Result<Json<SwapInfo>, ApiError> {
    let swap_id: SwapId = id.parse().map_err(ApiError::bad_request)?;
    match ctl(&state, CtlRequest::AbortSwap { swap_id }).await? {
        CtlReply::AbortAccepted { swap_id } => {
            // Report the final snapshot after the abort
            match ctl(&state, CtlRequest::SwapStatus { swap_id }).await? {
                CtlReply::Swap(info) => Ok(Json(info)),
                _ => Err(ApiError::internal("unexpected control reply")),
            }
        }
        _ => Err(ApiError::internal("unexpected control reply")),
    }
}

/// Upgrade to a progress stream for one swap: replay the transitions so
/// far, then follow live until the terminal event. A stream for an
/// already-ended swap replays its final log and closes; it never
/// restarts.
async fn ws_progress(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(state): State<SharedAppState>,
) -> Response {
    match id.parse::<SwapId>() {
        Ok(swap_id) => ws
            .on_upgrade(move |socket| stream_progress(socket, swap_id, state))
            .into_response(),
        Err(e) => ApiError::bad_request(e).into_response(),
    }
}

async fn stream_progress(socket: WebSocket, swap_id: SwapId, state: SharedAppState) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so no transition can fall between
    // replay and follow; phases never repeat within a swap, so the
    // overlap dedupes on the target phase.
    let mut live = state.registry.subscribe_progress();
    let (events, terminal) = match ctl(&state, CtlRequest::Progress { swap_id }).await {
        Ok(CtlReply::Progress { events, terminal }) => (events, terminal),
        _ => {
            let _ = sender.close().await;
            return;
        }
    };

    let mut sent: HashSet<SwapPhase> = HashSet::new();
    for event in events {
        sent.insert(event.to);
        if forward(&mut sender, &event).await.is_err() {
            return;
        }
    }
    if terminal {
        let _ = sender.close().await;
        return;
    }

    loop {
        tokio::select! {
            event = live.recv() => match event {
                Ok(event) if event.swap_id == swap_id && !sent.contains(&event.to) => {
                    sent.insert(event.to);
                    let is_terminal = event.terminal;
                    if forward(&mut sender, &event).await.is_err() {
                        return;
                    }
                    if is_terminal {
                        let _ = sender.close().await;
                        return;
                    }
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!(%swap_id, error = %e, "progress stream interrupted");
                    let _ = sender.close().await;
                    return;
                }
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => continue,
                Some(Err(_)) => return,
            },
        }
    }
}

async fn forward(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &ProgressEvent,
) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(_) => return Ok(()),
    };
    sender.send(Message::Text(json)).await
}
