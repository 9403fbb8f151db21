//! Dealcoach API Library Crate
//!
//! This library contains all the core logic for the dealcoach web service,
//! including the application state, database access, API handlers, turn
//! orchestration, WebSocket streaming, and routing. The binaries are thin
//! wrappers around this library.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod prompts;
pub mod router;
pub mod state;
pub mod turn;
pub mod ws;
