//! Real-time session transport: one WebSocket per client, streaming text
//! deltas and synthesized speech for every turn.

pub mod filter;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod tts;

pub use session::ws_handler;
