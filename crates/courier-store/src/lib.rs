//! # courier-store
//!
//! Persistent message history for Courier (SQLite-backed).

pub mod store;

pub use store::{body_hash, message_key, Store};
