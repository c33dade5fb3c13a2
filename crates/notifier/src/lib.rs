//! Push notification dispatch for the WebGlow support chat.
//!
//! Watches the message insert feed, works out who should hear about each
//! new message, and sends a push notification when that person is offline.

pub mod delivery;
pub mod directory;
pub mod error;
pub mod feed;
pub mod handler;
pub mod ledger;
pub mod listener;
pub mod push;
pub mod realtime;
pub mod resolver;
pub mod supervisor;
