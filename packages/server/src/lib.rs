//! Tsudoi connection hub.
//!
//! Keeps track of live WebSocket connections and their chat-room
//! subscriptions, and fans out messages, typing indicators, presence,
//! reactions and read receipts to the right clients. Several instances share
//! events through the cross-process bridge.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;

pub mod config;
