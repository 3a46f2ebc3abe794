//! Swap Engine
//!
//! Per-swap state machines and the engine tasks that drive them.

pub mod engine;
pub mod state;

pub use engine::{EngineConfig, EngineError, SwapEngine};
pub use state::{transition, Command, SwapState, Transition, TransitionError};
