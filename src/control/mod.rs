//! Control API
//!
//! The bus service answering control requests, and the HTTP/WS endpoint
//! exposing it to external clients.

pub mod server;
pub mod service;

pub use server::{AppState, SharedAppState};
pub use service::ControlService;
