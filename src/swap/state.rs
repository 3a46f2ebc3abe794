//! Swap State Machine
//!
//! The per-swap state and the pure transition function driving it. Every
//! transition is a function of (current state, event, accumulated
//! artifacts) only: same inputs, same next phase, same outbound
//! commands. Side effects live in the engine, which executes the
//! returned commands against the bus.
//!
//! ```ignore
//! initialized --(counterparty params)--> funding_negotiated
//!     --(arbitrating lock seen)--> funding_locked
//!     --(accordant lock seen)--> arbitrating_locked
//!     --(buy signature share)--> buy_procedure_signature
//!     --(buy tx seen)--> completed
//!
//! any pre-completion phase --(timelock expired)--> refund_broadcast
//!     --(refund tx seen)--> refunded
//!
//! initialized --(user abort / expiry before negotiation)--> aborted
//! ```

use thiserror::Error;

use crate::types::{
    Artifact, ArtifactKind, Blockchain, Offer, Outcome, SwapEventKind, SwapPhase, SwapRole,
    TxLabel,
};

/// Accumulated state of one swap. Owned exclusively by its engine task;
/// everything else sees snapshots.
#[derive(Debug, Clone)]
pub struct SwapState {
    phase: SwapPhase,
    artifacts: Vec<Artifact>,
    outcome: Option<Outcome>,
    stall_reason: Option<String>,
}

impl SwapState {
    pub fn new() -> Self {
        Self {
            phase: SwapPhase::Initialized,
            artifacts: Vec::new(),
            outcome: None,
            stall_reason: None,
        }
    }

    pub fn phase(&self) -> SwapPhase {
        self.phase
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn stalled(&self) -> bool {
        self.stall_reason.is_some()
    }

    pub fn stall_reason(&self) -> Option<&str> {
        self.stall_reason.as_deref()
    }

    /// Append an artifact. Recorded artifacts are never overwritten.
    pub fn record(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }

    pub fn has(&self, kind: ArtifactKind) -> bool {
        self.artifacts.iter().any(|a| a.kind == kind)
    }

    /// Transaction id recorded under the given kind, if any.
    pub fn txid_of(&self, kind: ArtifactKind) -> Option<&str> {
        self.artifacts
            .iter()
            .find(|a| a.kind == kind)
            .map(|a| a.data.as_str())
    }

    pub fn set_phase(&mut self, phase: SwapPhase) {
        self.phase = phase;
    }

    pub fn set_outcome(&mut self, outcome: Outcome) {
        self.outcome = Some(outcome);
    }

    pub fn set_stalled(&mut self, reason: impl Into<String>) {
        self.stall_reason = Some(reason.into());
    }

    pub fn clear_stalled(&mut self) {
        self.stall_reason = None;
    }
}

impl Default for SwapState {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound command produced by a transition, executed by the engine
/// over the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Arm a funding watch for the exact expected amount
    WatchFunding { chain: Blockchain, amount: u64 },
    /// Arm the refund timelock watch
    WatchTimelock { chain: Blockchain, blocks: u32 },
    /// Have the wallet sign the labeled transaction and broadcast it
    SignAndBroadcast { chain: Blockchain, label: TxLabel },
    /// Drop all watch tasks for this swap
    AbortWatchTasks,
}

/// Result of applying one event to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: SwapPhase,
    pub outcome: Option<Outcome>,
    /// Artifacts to append before entering the next phase
    pub record: Vec<Artifact>,
    pub commands: Vec<Command>,
    pub note: String,
}

impl Transition {
    fn advance(next: SwapPhase, note: impl Into<String>) -> Self {
        Self {
            next,
            outcome: None,
            record: Vec::new(),
            commands: Vec::new(),
            note: note.into(),
        }
    }

    /// Event acknowledged but the phase does not move.
    fn stay(phase: SwapPhase, note: impl Into<String>) -> Self {
        Self::advance(phase, note)
    }

    fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    fn recording(mut self, artifact: Artifact) -> Self {
        self.record.push(artifact);
        self
    }

    fn with_commands(mut self, commands: Vec<Command>) -> Self {
        self.commands = commands;
        self
    }

    /// True when the event moved the machine to a new phase.
    pub fn moved(&self, from: SwapPhase) -> bool {
        self.next != from
    }
}

/// Transition errors. These are rejections the caller must see, as
/// opposed to ignored events, which return a no-move transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("abort denied in phase {0}: funding lock already issued, refund path is the only exit")]
    AbortDenied(SwapPhase),

    #[error("swap already ended in phase {0}")]
    Terminal(SwapPhase),
}

/// Apply one event to the state machine. Pure: no I/O, no clocks; the
/// watcher-reported events are the only source of chain facts.
pub fn transition(
    state: &SwapState,
    role: SwapRole,
    offer: &Offer,
    event: &SwapEventKind,
) -> Result<Transition, TransitionError> {
    let phase = state.phase();
    if phase.is_terminal() {
        return Err(TransitionError::Terminal(phase));
    }

    match event {
        SwapEventKind::UserAbort => {
            if phase == SwapPhase::Initialized {
                Ok(Transition::advance(SwapPhase::Aborted, "user abort before value locked")
                    .with_outcome(Outcome::Abort)
                    .with_commands(vec![Command::AbortWatchTasks]))
            } else {
                Err(TransitionError::AbortDenied(phase))
            }
        }

        SwapEventKind::TimelockExpired { chain, height } => {
            if *chain != Blockchain::Arbitrating {
                return Ok(Transition::stay(
                    phase,
                    format!("timelock report for {} chain ignored", chain),
                ));
            }
            match phase {
                SwapPhase::Initialized => Ok(Transition::advance(
                    SwapPhase::Aborted,
                    format!("timelock expired at height {} before negotiation", height),
                )
                .with_outcome(Outcome::Abort)
                .with_commands(vec![Command::AbortWatchTasks])),
                SwapPhase::RefundBroadcast => {
                    Ok(Transition::stay(phase, "duplicate timelock report"))
                }
                _ => Ok(Transition::advance(
                    SwapPhase::RefundBroadcast,
                    format!("timelock expired at height {}; broadcasting refund", height),
                )
                .with_commands(vec![Command::SignAndBroadcast {
                    chain: Blockchain::Arbitrating,
                    label: TxLabel::Refund,
                }])),
            }
        }

        SwapEventKind::SignatureShareReceived { artifact } => {
            match (phase, artifact.kind) {
                (SwapPhase::Initialized, ArtifactKind::CounterpartyParams) => {
                    let mut commands = vec![
                        Command::WatchFunding {
                            chain: Blockchain::Arbitrating,
                            amount: offer.arbitrating_amount,
                        },
                        Command::WatchFunding {
                            chain: Blockchain::Accordant,
                            amount: offer.accordant_amount,
                        },
                        Command::WatchTimelock {
                            chain: Blockchain::Arbitrating,
                            blocks: offer.cancel_timelock,
                        },
                    ];
                    // Bob's lock opens the funding sequence; Alice locks
                    // only after she has seen it confirm.
                    if role == SwapRole::Bob {
                        commands.push(Command::SignAndBroadcast {
                            chain: Blockchain::Arbitrating,
                            label: TxLabel::Lock,
                        });
                    }
                    Ok(Transition::advance(
                        SwapPhase::FundingNegotiated,
                        "counterparty parameters verified; watchers armed",
                    )
                    .recording(artifact.clone())
                    .with_commands(commands))
                }
                (
                    SwapPhase::FundingNegotiated
                    | SwapPhase::FundingLocked
                    | SwapPhase::ArbitratingLocked,
                    ArtifactKind::AdaptorShare,
                ) => Ok(
                    Transition::stay(phase, "adaptor share recorded").recording(artifact.clone())
                ),
                (SwapPhase::ArbitratingLocked, ArtifactKind::BuySignature) => Ok(
                    Transition::advance(
                        SwapPhase::BuyProcedureSignature,
                        "buy signature share verified; finalizing buy transaction",
                    )
                    .recording(artifact.clone())
                    .with_commands(vec![Command::SignAndBroadcast {
                        chain: Blockchain::Arbitrating,
                        label: TxLabel::Buy,
                    }]),
                ),
                _ => Ok(Transition::stay(
                    phase,
                    format!("out-of-order {:?} artifact dropped", artifact.kind),
                )),
            }
        }

        SwapEventKind::FundingDetected { chain, txid, amount } => match phase {
            SwapPhase::Initialized => Ok(Transition::stay(
                phase,
                "funding before negotiation ignored",
            )),
            SwapPhase::FundingNegotiated => match chain {
                Blockchain::Arbitrating => {
                    if *amount == offer.arbitrating_amount {
                        let commands = if role == SwapRole::Alice {
                            vec![Command::SignAndBroadcast {
                                chain: Blockchain::Accordant,
                                label: TxLabel::Lock,
                            }]
                        } else {
                            Vec::new()
                        };
                        Ok(Transition::advance(
                            SwapPhase::FundingLocked,
                            format!("arbitrating lock detected: {}", txid),
                        )
                        .recording(Artifact::on_chain(
                            ArtifactKind::LockTx,
                            Blockchain::Arbitrating,
                            txid.clone(),
                        ))
                        .with_commands(commands))
                    } else {
                        Ok(Transition::stay(
                            phase,
                            format!(
                                "arbitrating funding of {} ignored, expected {}",
                                amount, offer.arbitrating_amount
                            ),
                        ))
                    }
                }
                Blockchain::Accordant => Ok(Transition::stay(
                    phase,
                    "accordant funding before arbitrating lock ignored",
                )),
            },
            SwapPhase::FundingLocked => match chain {
                Blockchain::Accordant => {
                    if *amount == offer.accordant_amount {
                        Ok(Transition::advance(
                            SwapPhase::ArbitratingLocked,
                            format!("accordant lock detected: {}; swap fully funded", txid),
                        )
                        .recording(Artifact::on_chain(
                            ArtifactKind::LockTx,
                            Blockchain::Accordant,
                            txid.clone(),
                        )))
                    } else {
                        Ok(Transition::stay(
                            phase,
                            format!(
                                "accordant funding of {} ignored, expected {}",
                                amount, offer.accordant_amount
                            ),
                        ))
                    }
                }
                Blockchain::Arbitrating => Ok(Transition::stay(
                    phase,
                    "duplicate arbitrating funding report ignored",
                )),
            },
            SwapPhase::ArbitratingLocked => Ok(Transition::stay(
                phase,
                "funding report while awaiting buy signature ignored",
            )),
            SwapPhase::BuyProcedureSignature => {
                if *chain == Blockchain::Arbitrating
                    && state.txid_of(ArtifactKind::BuyTx) == Some(txid.as_str())
                {
                    Ok(Transition::advance(
                        SwapPhase::Completed,
                        format!("buy transaction confirmed: {}", txid),
                    )
                    .with_outcome(Outcome::Success)
                    .with_commands(vec![Command::AbortWatchTasks]))
                } else {
                    Ok(Transition::stay(phase, "unrelated transaction ignored"))
                }
            }
            SwapPhase::RefundBroadcast => {
                if *chain == Blockchain::Arbitrating
                    && state.txid_of(ArtifactKind::RefundTx) == Some(txid.as_str())
                {
                    Ok(Transition::advance(
                        SwapPhase::Refunded,
                        format!("refund transaction confirmed: {}", txid),
                    )
                    .with_outcome(Outcome::Refund)
                    .with_commands(vec![Command::AbortWatchTasks]))
                } else {
                    Ok(Transition::stay(phase, "unrelated transaction ignored"))
                }
            }
            // Terminal phases returned early above
            SwapPhase::Completed | SwapPhase::Refunded | SwapPhase::Aborted => {
                Err(TransitionError::Terminal(phase))
            }
        },
    }
}
