//! Streaming Assistant Relay
//!
//! This module contains the logic behind `/ws/llm`. It is structured into
//! submodules:
//!
//! - `protocol`: Server-side framing and close codes.
//! - `session`: Connection lifecycle, from handshake to close.
//! - `relay`: Forwards one prompt to the generation backend and streams the answer back.
//! - `flight`: The one-request-per-connection guard.
//! - `registry`: Live connections and their cancellation handles.

pub mod flight;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod session;

pub use session::ws_handler;
