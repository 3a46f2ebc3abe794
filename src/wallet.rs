//! Wallet Interface
//!
//! Abstract capability for producing keys, signatures and adaptor-share
//! artifacts. The adaptor signature scheme itself is opaque to the
//! daemon: implementations talk to the external wallet RPC named in the
//! configuration, the engine only sequences the artifacts they produce.
//!
//! `WalletService` adapts any implementation onto the bus under the
//! wallet topic, so engines reach it with bounded `request` round-trips
//! regardless of where the implementation actually runs.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bus::{BusPayload, MessageBus, ServiceId, Topic, WalletReply, WalletRequest};
use crate::types::{Artifact, SwapId, SwapRole, TxLabel};

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("key derivation failed: {0}")]
    Derivation(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("wallet backend unreachable: {0}")]
    Unreachable(String),
}

/// A transaction signed by the wallet, ready for broadcast.
#[derive(Debug, Clone)]
pub struct SignedTx {
    pub label: TxLabel,
    pub txid: String,
    pub tx_hex: String,
}

/// Key, signature and adaptor-share capability behind the wallet topic.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletInterface: Send + Sync {
    /// Derive this side's protocol parameters for a new swap.
    async fn derive_params(&self, swap_id: SwapId, role: SwapRole)
        -> Result<Artifact, WalletError>;

    /// Verify a counterparty artifact. `Ok(false)` is a protocol
    /// violation for the swap, not a wallet failure.
    async fn verify_share(&self, swap_id: SwapId, artifact: Artifact)
        -> Result<bool, WalletError>;

    /// Produce the labeled transaction, fully signed.
    async fn sign_transaction(&self, swap_id: SwapId, label: TxLabel)
        -> Result<SignedTx, WalletError>;
}

/// Bus adapter: answers wallet requests with a trait implementation.
pub struct WalletService<W> {
    bus: MessageBus,
    wallet: W,
}

impl<W: WalletInterface + 'static> WalletService<W> {
    pub fn new(bus: MessageBus, wallet: W) -> Self {
        Self { bus, wallet }
    }

    pub fn spawn(self) {
        tokio::spawn(self.run());
    }

    pub async fn run(self) {
        let mut rx = self.bus.register(ServiceId::Wallet, Topic::Wallet).await;
        info!("wallet service attached to bus");
        while let Some(msg) = rx.recv().await {
            let Some(correlation) = msg.correlation else {
                debug!("wallet ignores uncorrelated messages");
                continue;
            };
            let reply = match msg.payload {
                BusPayload::Wallet(request) => self.handle(request).await,
                other => {
                    debug!(?other, "unsupported payload on wallet topic");
                    WalletReply::Failure {
                        message: "wallet accepts wallet requests only".to_string(),
                    }
                }
            };
            if let Err(e) = self
                .bus
                .respond(ServiceId::Wallet, correlation, BusPayload::WalletReply(reply))
                .await
            {
                warn!(error = %e, "wallet reply undeliverable");
            }
        }
    }

    async fn handle(&self, request: WalletRequest) -> WalletReply {
        match request {
            WalletRequest::DeriveParams { swap_id, role } => {
                match self.wallet.derive_params(swap_id, role).await {
                    Ok(artifact) => WalletReply::Params { artifact },
                    Err(e) => WalletReply::Failure {
                        message: e.to_string(),
                    },
                }
            }
            WalletRequest::VerifyShare { swap_id, artifact } => {
                match self.wallet.verify_share(swap_id, artifact).await {
                    Ok(valid) => WalletReply::ShareVerified { valid },
                    Err(e) => WalletReply::Failure {
                        message: e.to_string(),
                    },
                }
            }
            WalletRequest::SignTransaction { swap_id, label } => {
                match self.wallet.sign_transaction(swap_id, label).await {
                    Ok(tx) => WalletReply::SignedTx {
                        label: tx.label,
                        txid: tx.txid,
                        tx_hex: tx.tx_hex,
                    },
                    Err(e) => WalletReply::Failure {
                        message: e.to_string(),
                    },
                }
            }
        }
    }
}
