//! Swap Engine
//!
//! One engine task per active swap. The task owns its SwapState (single
//! writer), drains its event stream sequentially, feeds events through
//! the pure transition function, and executes the resulting commands as
//! bounded bus requests against the wallet and the chain watchers. A
//! slow or unreachable service stalls only its own swap, never the
//! dispatcher or other swaps.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bus::{
    BusError, BusMessage, BusPayload, CtlReply, MessageBus, ServiceId, SyncerReply, SyncerTask,
    Topic, WalletReply, WalletRequest,
};
use crate::config::FarcasterConfig;
use crate::registry::{RegistryError, SwapHandle, SwapRegistry};
use crate::swap::state::{transition, Command, SwapState, TransitionError};
use crate::types::{
    Artifact, Blockchain, Offer, Outcome, ProgressEvent, SwapEventKind, SwapId, SwapInfo,
    SwapPhase, SwapRecord, SwapRole, TradeRole, TxLabel,
};

/// Per-engine settings, lifted from the daemon config.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bounded wait on every wallet/watcher round-trip
    pub request_timeout: Duration,
    /// Retries before the swap stalls for manual review
    pub retry_count: u32,
}

impl EngineConfig {
    pub fn from_config(config: &FarcasterConfig) -> Self {
        Self {
            request_timeout: config.bus_timeout(),
            retry_count: config.retry_count,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            retry_count: 3,
        }
    }
}

/// Engine-internal errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("wallet failure: {0}")]
    Wallet(String),

    #[error("syncer failure: {0}")]
    Syncer(String),

    #[error("unexpected reply from {0}")]
    UnexpectedReply(String),

    #[error("service on topic {0} unreachable after {1} retries")]
    Unreachable(String, u32),
}

/// State machine driver for one swap.
pub struct SwapEngine {
    swap_id: SwapId,
    role: SwapRole,
    offer: Arc<Offer>,
    state: SwapState,
    /// Per-source sequence high-water marks for replay detection
    seen: HashMap<ServiceId, u64>,
    bus: MessageBus,
    rx: mpsc::UnboundedReceiver<BusMessage>,
    registry: SwapRegistry,
    handle: SwapHandle,
    config: EngineConfig,
}

impl SwapEngine {
    /// Register a new swap on the bus and in the registry, then start
    /// its engine task.
    pub async fn spawn(
        bus: MessageBus,
        registry: SwapRegistry,
        config: EngineConfig,
        swap_id: SwapId,
        offer: Arc<Offer>,
        role: SwapRole,
        trade_role: TradeRole,
    ) -> Result<(), RegistryError> {
        let service = ServiceId::Swap(swap_id);
        let topic = Topic::Swap(swap_id);
        let rx = bus.register(service.clone(), topic.clone()).await;

        let info = SwapInfo::new(swap_id, offer.id(), role, trade_role);
        let handle = SwapHandle::new(info);
        if let Err(e) = registry.insert(swap_id, handle.clone()).await {
            bus.unregister(&service, &topic).await;
            return Err(e);
        }

        let engine = Self {
            swap_id,
            role,
            offer,
            state: SwapState::new(),
            seen: HashMap::new(),
            bus,
            rx,
            registry,
            handle,
            config,
        };
        tokio::spawn(engine.run());
        Ok(())
    }

    async fn run(mut self) {
        info!(swap_id = %self.swap_id, role = %self.role, "swap engine started");
        self.bootstrap().await;

        while !self.state.phase().is_terminal() {
            let Some(batch) = self.next_batch().await else {
                warn!(swap_id = %self.swap_id, "event channel closed; engine exiting");
                return;
            };
            for msg in batch {
                self.handle_message(msg).await;
            }
        }

        self.retire().await;
    }

    /// Ask the wallet for this side's protocol parameters before any
    /// event is processed.
    async fn bootstrap(&mut self) {
        let request = WalletRequest::DeriveParams {
            swap_id: self.swap_id,
            role: self.role,
        };
        match self.wallet_request(request).await {
            Ok(WalletReply::Params { artifact }) => {
                self.state.record(artifact);
            }
            Ok(other) => {
                warn!(swap_id = %self.swap_id, ?other, "unexpected wallet reply to params derivation");
                self.stall("wallet returned unexpected reply").await;
            }
            Err(e) => {
                self.stall(format!("wallet unreachable: {}", e)).await;
            }
        }
        self.sync_info().await;
    }

    /// Pull the next events off the stream. Everything already queued is
    /// drained in one batch so that a watcher-confirmed timelock expiry
    /// is processed ahead of any concurrently arrived success-path
    /// event: the engine never races its own broadcast against a refund.
    async fn next_batch(&mut self) -> Option<Vec<BusMessage>> {
        let first = self.rx.recv().await?;
        let mut batch = vec![first];
        while let Ok(msg) = self.rx.try_recv() {
            batch.push(msg);
        }
        batch.sort_by_key(
            |m| !matches!(&m.payload, BusPayload::Event(ev) if ev.kind.is_expiry()),
        );
        Some(batch)
    }

    async fn handle_message(&mut self, msg: BusMessage) {
        let BusMessage {
            source,
            correlation,
            payload,
            ..
        } = msg;

        let event = match payload {
            BusPayload::Event(event) => event,
            other => {
                debug!(swap_id = %self.swap_id, %source, ?other, "non-event payload ignored");
                if let Some(c) = correlation {
                    let reply = CtlReply::failure("BAD_REQUEST", "swap engines accept events only");
                    let _ = self
                        .bus
                        .respond(ServiceId::Swap(self.swap_id), c, BusPayload::CtlReply(reply))
                        .await;
                }
                return;
            }
        };

        // Replay detection: at-least-once delivery means the same event
        // instance can arrive twice. Dropped silently, logged for audit.
        let mark = self.seen.get(&source).copied().unwrap_or(0);
        if event.seq <= mark {
            debug!(
                swap_id = %self.swap_id, %source, seq = event.seq, mark,
                "stale event dropped"
            );
            if let Some(c) = correlation {
                let reply = CtlReply::swap_failure(
                    "STALE_EVENT",
                    "event sequence already processed",
                    self.swap_id,
                    Some(self.state.phase()),
                );
                let _ = self
                    .bus
                    .respond(ServiceId::Swap(self.swap_id), c, BusPayload::CtlReply(reply))
                    .await;
            }
            return;
        }
        self.seen.insert(source.clone(), event.seq);

        // Counterparty signature material is verified by the wallet
        // before it may drive a transition.
        if let SwapEventKind::SignatureShareReceived { artifact } = &event.kind {
            match self.verify_share(artifact.clone()).await {
                Ok(true) => {}
                Ok(false) => {
                    self.protocol_violation(format!(
                        "{:?} artifact failed verification",
                        artifact.kind
                    ))
                    .await;
                    self.reply_failure(correlation, "PROTOCOL_VIOLATION", "artifact rejected")
                        .await;
                    return;
                }
                Err(e) => {
                    self.stall(format!("share verification unavailable: {}", e))
                        .await;
                    self.reply_failure(correlation, "RESOURCE_UNAVAILABLE", "wallet unreachable")
                        .await;
                    return;
                }
            }
        }

        match transition(&self.state, self.role, &self.offer, &event.kind) {
            Ok(t) => {
                let from = self.state.phase();
                for artifact in &t.record {
                    self.state.record(artifact.clone());
                }
                if t.moved(from) {
                    self.state.set_phase(t.next);
                    if let Some(outcome) = t.outcome {
                        self.state.set_outcome(outcome);
                    }
                    self.state.clear_stalled();
                    info!(
                        swap_id = %self.swap_id, from = %from, to = %t.next,
                        "{}", t.note
                    );
                    self.publish_progress(from, t.next, t.note.clone()).await;
                } else {
                    debug!(swap_id = %self.swap_id, phase = %from, "{}", t.note);
                }
                self.execute(&t.commands).await;
                self.sync_info().await;

                if let Some(c) = correlation {
                    let reply = if matches!(event.kind, SwapEventKind::UserAbort) {
                        CtlReply::AbortAccepted {
                            swap_id: self.swap_id,
                        }
                    } else {
                        CtlReply::Swap(self.handle.info.read().await.clone())
                    };
                    let _ = self
                        .bus
                        .respond(ServiceId::Swap(self.swap_id), c, BusPayload::CtlReply(reply))
                        .await;
                }
            }
            Err(TransitionError::AbortDenied(phase)) => {
                warn!(
                    swap_id = %self.swap_id, %phase,
                    "abort rejected: funds are locked, refund path is the only exit"
                );
                if let Some(c) = correlation {
                    let reply = CtlReply::swap_failure(
                        "ABORT_DENIED",
                        "funding lock already issued; the refund timelock is the only exit",
                        self.swap_id,
                        Some(phase),
                    );
                    let _ = self
                        .bus
                        .respond(ServiceId::Swap(self.swap_id), c, BusPayload::CtlReply(reply))
                        .await;
                }
            }
            Err(TransitionError::Terminal(phase)) => {
                debug!(swap_id = %self.swap_id, %phase, "event for ended swap dropped");
                self.reply_failure(correlation, "STALE_EVENT", "swap already ended")
                    .await;
            }
        }
    }

    async fn execute(&mut self, commands: &[Command]) {
        for command in commands {
            if let Err(e) = self.execute_one(command).await {
                warn!(
                    swap_id = %self.swap_id, ?command, error = %e,
                    "command failed; swap needs manual review"
                );
                self.state
                    .set_stalled(format!("command {:?} failed: {}", command, e));
            }
        }
    }

    async fn execute_one(&mut self, command: &Command) -> Result<(), EngineError> {
        match command {
            Command::WatchFunding { chain, amount } => {
                let task = SyncerTask::WatchFunding {
                    swap_id: self.swap_id,
                    amount: *amount,
                };
                match self.syncer_request(*chain, task).await? {
                    SyncerReply::TaskAccepted { .. } => Ok(()),
                    other => {
                        debug!(swap_id = %self.swap_id, ?other, "unexpected syncer reply");
                        Err(EngineError::UnexpectedReply(format!("syncer<{}>", chain)))
                    }
                }
            }
            Command::WatchTimelock { chain, blocks } => {
                let task = SyncerTask::WatchTimelock {
                    swap_id: self.swap_id,
                    blocks: *blocks,
                };
                match self.syncer_request(*chain, task).await? {
                    SyncerReply::TaskAccepted { .. } => Ok(()),
                    _ => Err(EngineError::UnexpectedReply(format!("syncer<{}>", chain))),
                }
            }
            Command::SignAndBroadcast { chain, label } => {
                self.sign_and_broadcast(*chain, *label).await
            }
            Command::AbortWatchTasks => {
                // Terminal cleanup is best effort
                for chain in [Blockchain::Arbitrating, Blockchain::Accordant] {
                    let task = SyncerTask::AbortTasks {
                        swap_id: self.swap_id,
                    };
                    if let Err(e) = self.syncer_request(chain, task).await {
                        debug!(
                            swap_id = %self.swap_id, %chain, error = %e,
                            "failed to abort watch tasks"
                        );
                    }
                }
                Ok(())
            }
        }
    }

    async fn sign_and_broadcast(
        &mut self,
        chain: Blockchain,
        label: TxLabel,
    ) -> Result<(), EngineError> {
        let request = WalletRequest::SignTransaction {
            swap_id: self.swap_id,
            label,
        };
        let tx_hex = match self.wallet_request(request).await? {
            WalletReply::SignedTx { tx_hex, .. } => tx_hex,
            _ => return Err(EngineError::UnexpectedReply("wallet".to_string())),
        };

        let task = SyncerTask::Broadcast {
            swap_id: self.swap_id,
            chain,
            tx_hex,
        };
        let txid = match self.syncer_request(chain, task).await? {
            SyncerReply::Broadcasted { txid } => txid,
            _ => return Err(EngineError::UnexpectedReply(format!("syncer<{}>", chain))),
        };

        info!(swap_id = %self.swap_id, %chain, %label, %txid, "transaction broadcast");
        self.state
            .record(Artifact::on_chain(label.artifact_kind(), chain, txid.clone()));

        let task = SyncerTask::WatchTransaction {
            swap_id: self.swap_id,
            txid,
        };
        match self.syncer_request(chain, task).await? {
            SyncerReply::TaskAccepted { .. } => Ok(()),
            _ => Err(EngineError::UnexpectedReply(format!("syncer<{}>", chain))),
        }
    }

    async fn verify_share(&mut self, artifact: Artifact) -> Result<bool, EngineError> {
        let request = WalletRequest::VerifyShare {
            swap_id: self.swap_id,
            artifact,
        };
        match self.wallet_request(request).await? {
            WalletReply::ShareVerified { valid } => Ok(valid),
            _ => Err(EngineError::UnexpectedReply("wallet".to_string())),
        }
    }

    async fn wallet_request(&self, request: WalletRequest) -> Result<WalletReply, EngineError> {
        let reply = self
            .request_with_retry(Topic::Wallet, BusPayload::Wallet(request))
            .await?;
        match reply.payload {
            BusPayload::WalletReply(WalletReply::Failure { message }) => {
                Err(EngineError::Wallet(message))
            }
            BusPayload::WalletReply(reply) => Ok(reply),
            _ => Err(EngineError::UnexpectedReply("wallet".to_string())),
        }
    }

    async fn syncer_request(
        &self,
        chain: Blockchain,
        task: SyncerTask,
    ) -> Result<SyncerReply, EngineError> {
        let reply = self
            .request_with_retry(Topic::Syncer(chain), BusPayload::Syncer(task))
            .await?;
        match reply.payload {
            BusPayload::SyncerReply(SyncerReply::Failure { message }) => {
                Err(EngineError::Syncer(message))
            }
            BusPayload::SyncerReply(reply) => Ok(reply),
            _ => Err(EngineError::UnexpectedReply(format!("syncer<{}>", chain))),
        }
    }

    /// Bounded request with bounded retries. Exhaustion surfaces as an
    /// explicit unreachable error; indefinite waits do not exist here.
    async fn request_with_retry(
        &self,
        topic: Topic,
        payload: BusPayload,
    ) -> Result<BusMessage, EngineError> {
        let mut attempt = 0u32;
        loop {
            match self
                .bus
                .request(
                    ServiceId::Swap(self.swap_id),
                    topic.clone(),
                    payload.clone(),
                    self.config.request_timeout,
                )
                .await
            {
                Ok(reply) => return Ok(reply),
                Err(err @ (BusError::Timeout(_, _) | BusError::NoResponder(_))) => {
                    attempt += 1;
                    if attempt > self.config.retry_count {
                        return Err(EngineError::Unreachable(
                            topic.to_string(),
                            self.config.retry_count,
                        ));
                    }
                    warn!(
                        swap_id = %self.swap_id, %topic, %err, attempt,
                        "bus request failed; retrying"
                    );
                }
                Err(e) => return Err(EngineError::Bus(e)),
            }
        }
    }

    /// An invariant violation is fatal to this swap only. Before any
    /// lock it aborts outright; with funds on-chain the refund timelock
    /// is the only safe exit, so the swap stalls with watchers armed.
    async fn protocol_violation(&mut self, reason: String) {
        error!(swap_id = %self.swap_id, %reason, "protocol violation");
        if self.state.phase().value_locked() {
            self.state
                .set_stalled(format!("protocol violation: {}", reason));
            self.sync_info().await;
        } else {
            let from = self.state.phase();
            self.state.set_phase(SwapPhase::Aborted);
            self.state.set_outcome(Outcome::Failure);
            self.publish_progress(from, SwapPhase::Aborted, format!("protocol violation: {}", reason))
                .await;
            self.execute(&[Command::AbortWatchTasks]).await;
            self.sync_info().await;
        }
    }

    async fn stall(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(swap_id = %self.swap_id, %reason, "swap stalled; needs manual review");
        self.state.set_stalled(reason);
        self.sync_info().await;
    }

    async fn reply_failure(
        &self,
        correlation: Option<uuid::Uuid>,
        code: &str,
        message: &str,
    ) {
        if let Some(c) = correlation {
            let reply =
                CtlReply::swap_failure(code, message, self.swap_id, Some(self.state.phase()));
            let _ = self
                .bus
                .respond(ServiceId::Swap(self.swap_id), c, BusPayload::CtlReply(reply))
                .await;
        }
    }

    async fn publish_progress(&self, from: SwapPhase, to: SwapPhase, message: String) {
        let event = ProgressEvent::transition(self.swap_id, from, to, message);
        self.handle.log.write().await.push(event.clone());
        self.registry.publish_progress(event);
    }

    async fn sync_info(&self) {
        let mut info = self.handle.info.write().await;
        info.phase = self.state.phase();
        info.stalled = self.state.stalled();
        info.outcome = self.state.outcome();
        info.updated_at = chrono::Utc::now().timestamp() as u64;
    }

    async fn retire(self) {
        self.sync_info().await;
        let info = self.handle.info.read().await.clone();
        let transitions = self.handle.log.read().await.clone();
        if let Err(e) = self
            .registry
            .retire(self.swap_id, SwapRecord { info, transitions })
            .await
        {
            error!(swap_id = %self.swap_id, error = %e, "failed to retire swap");
        }
        self.bus
            .unregister(&ServiceId::Swap(self.swap_id), &Topic::Swap(self.swap_id))
            .await;
        info!(
            swap_id = %self.swap_id,
            outcome = ?self.state.outcome(),
            "swap ended"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventSender;
    use crate::config::Network;
    use crate::types::{Artifact, ArtifactKind, SwapEvent};

    fn test_offer() -> Offer {
        Offer {
            network: Network::Local,
            arbitrating_amount: 100_000,
            accordant_amount: 2_000_000_000,
            cancel_timelock: 10,
            maker_role: SwapRole::Alice,
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            request_timeout: Duration::from_millis(50),
            retry_count: 1,
        }
    }

    /// Wallet stub: derives params, verifies everything except artifacts
    /// whose payload is "invalid", signs with predictable txids.
    fn spawn_stub_wallet(bus: MessageBus) {
        tokio::spawn(async move {
            let mut rx = bus.register(ServiceId::Wallet, Topic::Wallet).await;
            while let Some(msg) = rx.recv().await {
                let Some(correlation) = msg.correlation else { continue };
                let reply = match msg.payload {
                    BusPayload::Wallet(WalletRequest::DeriveParams { .. }) => WalletReply::Params {
                        artifact: Artifact::new(ArtifactKind::LocalParams, "dd".repeat(32)),
                    },
                    BusPayload::Wallet(WalletRequest::VerifyShare { artifact, .. }) => {
                        WalletReply::ShareVerified {
                            valid: artifact.data != "invalid",
                        }
                    }
                    BusPayload::Wallet(WalletRequest::SignTransaction { label, .. }) => {
                        WalletReply::SignedTx {
                            label,
                            txid: format!("{}_tx", label),
                            tx_hex: format!("{}_raw", label),
                        }
                    }
                    _ => WalletReply::Failure {
                        message: "unsupported".to_string(),
                    },
                };
                let _ = bus
                    .respond(ServiceId::Wallet, correlation, BusPayload::WalletReply(reply))
                    .await;
            }
        });
    }

    /// Syncer stub: accepts every task, echoes broadcasts back as txids.
    fn spawn_stub_syncer(bus: MessageBus, chain: Blockchain) {
        tokio::spawn(async move {
            let mut rx = bus
                .register(ServiceId::Syncer(chain), Topic::Syncer(chain))
                .await;
            let mut task_id = 0u64;
            while let Some(msg) = rx.recv().await {
                let Some(correlation) = msg.correlation else { continue };
                let reply = match msg.payload {
                    BusPayload::Syncer(SyncerTask::Broadcast { tx_hex, .. }) => {
                        SyncerReply::Broadcasted {
                            txid: tx_hex.replace("_raw", "_tx"),
                        }
                    }
                    BusPayload::Syncer(SyncerTask::AbortTasks { swap_id }) => {
                        SyncerReply::TasksAborted { swap_id }
                    }
                    BusPayload::Syncer(_) => {
                        task_id += 1;
                        SyncerReply::TaskAccepted { task_id }
                    }
                    _ => SyncerReply::Failure {
                        message: "unsupported".to_string(),
                    },
                };
                let _ = bus
                    .respond(
                        ServiceId::Syncer(chain),
                        correlation,
                        BusPayload::SyncerReply(reply),
                    )
                    .await;
            }
        });
    }

    struct Harness {
        bus: MessageBus,
        registry: SwapRegistry,
        swap_id: SwapId,
        events: EventSender,
    }

    async fn start_swap(role: SwapRole) -> Harness {
        let bus = MessageBus::new();
        let registry = SwapRegistry::new();
        spawn_stub_wallet(bus.clone());
        spawn_stub_syncer(bus.clone(), Blockchain::Arbitrating);
        spawn_stub_syncer(bus.clone(), Blockchain::Accordant);

        let swap_id = SwapId::random();
        SwapEngine::spawn(
            bus.clone(),
            registry.clone(),
            fast_config(),
            swap_id,
            Arc::new(test_offer()),
            role,
            TradeRole::Taker,
        )
        .await
        .unwrap();

        let events = EventSender::new(bus.clone(), ServiceId::Daemon);
        Harness {
            bus,
            registry,
            swap_id,
            events,
        }
    }

    async fn wait_for_phase(harness: &Harness, phase: SwapPhase) {
        for _ in 0..200 {
            if let Some(handle) = harness.registry.get(harness.swap_id).await {
                if handle.info.read().await.phase == phase {
                    return;
                }
            } else if let Some(record) = harness.registry.record(harness.swap_id).await {
                if record.info.phase == phase {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("swap never reached phase {}", phase);
    }

    async fn wait_for_history(harness: &Harness) -> SwapRecord {
        for _ in 0..200 {
            if let Some(record) = harness.registry.record(harness.swap_id).await {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("swap never retired");
    }

    fn params_share() -> SwapEventKind {
        SwapEventKind::SignatureShareReceived {
            artifact: Artifact::new(ArtifactKind::CounterpartyParams, "aa".repeat(32)),
        }
    }

    fn buy_share() -> SwapEventKind {
        SwapEventKind::SignatureShareReceived {
            artifact: Artifact::new(ArtifactKind::BuySignature, "bb".repeat(32)),
        }
    }

    fn arb_funding(offer: &Offer) -> SwapEventKind {
        SwapEventKind::FundingDetected {
            chain: Blockchain::Arbitrating,
            txid: "lock_arb".to_string(),
            amount: offer.arbitrating_amount,
        }
    }

    fn acc_funding(offer: &Offer) -> SwapEventKind {
        SwapEventKind::FundingDetected {
            chain: Blockchain::Accordant,
            txid: "lock_acc".to_string(),
            amount: offer.accordant_amount,
        }
    }

    fn expiry() -> SwapEventKind {
        SwapEventKind::TimelockExpired {
            chain: Blockchain::Arbitrating,
            height: 800_010,
        }
    }

    #[tokio::test]
    async fn test_funding_on_both_chains_completes_swap() {
        let harness = start_swap(SwapRole::Bob).await;
        let offer = test_offer();

        harness
            .events
            .publish(harness.swap_id, params_share())
            .await
            .unwrap();
        wait_for_phase(&harness, SwapPhase::FundingNegotiated).await;

        harness
            .events
            .publish(harness.swap_id, arb_funding(&offer))
            .await
            .unwrap();
        wait_for_phase(&harness, SwapPhase::FundingLocked).await;

        harness
            .events
            .publish(harness.swap_id, acc_funding(&offer))
            .await
            .unwrap();
        wait_for_phase(&harness, SwapPhase::ArbitratingLocked).await;

        harness
            .events
            .publish(harness.swap_id, buy_share())
            .await
            .unwrap();
        wait_for_phase(&harness, SwapPhase::BuyProcedureSignature).await;

        // Watcher reports the buy transaction the engine broadcast
        harness
            .events
            .publish(
                harness.swap_id,
                SwapEventKind::FundingDetected {
                    chain: Blockchain::Arbitrating,
                    txid: "buy_tx".to_string(),
                    amount: 0,
                },
            )
            .await
            .unwrap();

        let record = wait_for_history(&harness).await;
        assert_eq!(record.info.phase, SwapPhase::Completed);
        assert_eq!(record.info.outcome, Some(Outcome::Success));
        // Registry invariant: no live handle once terminal
        assert_eq!(harness.registry.counts().await, (0, 1));
        // Both sides' signature material is on record
        let phases: Vec<SwapPhase> = record.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            phases,
            vec![
                SwapPhase::FundingNegotiated,
                SwapPhase::FundingLocked,
                SwapPhase::ArbitratingLocked,
                SwapPhase::BuyProcedureSignature,
                SwapPhase::Completed,
            ]
        );
        assert!(record.transitions.last().unwrap().terminal);
    }

    #[tokio::test]
    async fn test_no_funding_before_expiry_refunds() {
        let harness = start_swap(SwapRole::Bob).await;

        harness
            .events
            .publish(harness.swap_id, params_share())
            .await
            .unwrap();
        wait_for_phase(&harness, SwapPhase::FundingNegotiated).await;

        harness
            .events
            .publish(harness.swap_id, expiry())
            .await
            .unwrap();
        wait_for_phase(&harness, SwapPhase::RefundBroadcast).await;

        // Watcher reports the refund transaction landing
        harness
            .events
            .publish(
                harness.swap_id,
                SwapEventKind::FundingDetected {
                    chain: Blockchain::Arbitrating,
                    txid: "refund_tx".to_string(),
                    amount: 0,
                },
            )
            .await
            .unwrap();

        let record = wait_for_history(&harness).await;
        assert_eq!(record.info.phase, SwapPhase::Refunded);
        assert_eq!(record.info.outcome, Some(Outcome::Refund));
    }

    #[tokio::test]
    async fn test_duplicate_event_is_idempotent() {
        let harness = start_swap(SwapRole::Bob).await;
        let offer = test_offer();

        harness
            .events
            .publish(harness.swap_id, params_share())
            .await
            .unwrap();
        wait_for_phase(&harness, SwapPhase::FundingNegotiated).await;

        // Deliver the same event instance (same source, same seq) twice
        let replay = SwapEvent {
            seq: 2,
            kind: arb_funding(&offer),
        };
        for _ in 0..2 {
            harness
                .bus
                .publish(
                    ServiceId::Daemon,
                    Topic::Swap(harness.swap_id),
                    BusPayload::Event(replay.clone()),
                )
                .await
                .unwrap();
        }
        wait_for_phase(&harness, SwapPhase::FundingLocked).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let handle = harness.registry.get(harness.swap_id).await.unwrap();
        let info = handle.info.read().await.clone();
        assert_eq!(info.phase, SwapPhase::FundingLocked);
        // Exactly one transition out of FundingNegotiated was recorded
        let log = handle.log.read().await;
        assert_eq!(
            log.iter()
                .filter(|t| t.to == SwapPhase::FundingLocked)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_abort_after_lock_rejected() {
        let harness = start_swap(SwapRole::Bob).await;
        let offer = test_offer();

        harness
            .events
            .publish(harness.swap_id, params_share())
            .await
            .unwrap();
        harness
            .events
            .publish(harness.swap_id, arb_funding(&offer))
            .await
            .unwrap();
        wait_for_phase(&harness, SwapPhase::FundingLocked).await;

        let reply = harness
            .events
            .request(
                harness.swap_id,
                SwapEventKind::UserAbort,
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        match reply.payload {
            BusPayload::CtlReply(CtlReply::Failure { code, phase, .. }) => {
                assert_eq!(code, "ABORT_DENIED");
                assert_eq!(phase, Some(SwapPhase::FundingLocked));
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        // Still on the normal path, refund remains the only exit
        let handle = harness.registry.get(harness.swap_id).await.unwrap();
        assert_eq!(handle.info.read().await.phase, SwapPhase::FundingLocked);
    }

    #[tokio::test]
    async fn test_abort_before_funding_accepted() {
        let harness = start_swap(SwapRole::Alice).await;

        let reply = harness
            .events
            .request(
                harness.swap_id,
                SwapEventKind::UserAbort,
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert!(matches!(
            reply.payload,
            BusPayload::CtlReply(CtlReply::AbortAccepted { .. })
        ));

        let record = wait_for_history(&harness).await;
        assert_eq!(record.info.phase, SwapPhase::Aborted);
        assert_eq!(record.info.outcome, Some(Outcome::Abort));
    }

    #[tokio::test]
    async fn test_invalid_share_before_lock_aborts_swap() {
        let harness = start_swap(SwapRole::Bob).await;

        harness
            .events
            .publish(
                harness.swap_id,
                SwapEventKind::SignatureShareReceived {
                    artifact: Artifact::new(ArtifactKind::CounterpartyParams, "invalid"),
                },
            )
            .await
            .unwrap();

        let record = wait_for_history(&harness).await;
        assert_eq!(record.info.phase, SwapPhase::Aborted);
        assert_eq!(record.info.outcome, Some(Outcome::Failure));
    }

    #[tokio::test]
    async fn test_expiry_preferred_over_queued_success_event() {
        let harness = start_swap(SwapRole::Bob).await;
        let offer = test_offer();

        harness
            .events
            .publish(harness.swap_id, params_share())
            .await
            .unwrap();
        wait_for_phase(&harness, SwapPhase::FundingNegotiated).await;

        // Queue a success-path event and an expiry concurrently; the
        // engine must take the refund path.
        harness
            .events
            .publish(harness.swap_id, arb_funding(&offer))
            .await
            .unwrap();
        harness
            .events
            .publish(harness.swap_id, expiry())
            .await
            .unwrap();

        wait_for_phase(&harness, SwapPhase::RefundBroadcast).await;
    }

    #[tokio::test]
    async fn test_unreachable_wallet_stalls_swap() {
        let bus = MessageBus::new();
        let registry = SwapRegistry::new();
        // No wallet, no syncers: bootstrap must stall the swap, not hang
        let swap_id = SwapId::random();
        SwapEngine::spawn(
            bus.clone(),
            registry.clone(),
            fast_config(),
            swap_id,
            Arc::new(test_offer()),
            SwapRole::Bob,
            TradeRole::Taker,
        )
        .await
        .unwrap();

        for _ in 0..200 {
            if let Some(handle) = registry.get(swap_id).await {
                if handle.info.read().await.stalled {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("swap never stalled");
    }
}
