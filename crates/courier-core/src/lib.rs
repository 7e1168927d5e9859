//! # courier-core
//!
//! Core types, traits, configuration, and error handling for the Courier
//! ingestion service.

pub mod config;
pub mod error;
pub mod ids;
pub mod message;
pub mod traits;

pub use config::shellexpand;
pub use error::CourierError;
