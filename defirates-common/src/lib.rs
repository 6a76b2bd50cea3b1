//! # DeFi Rates Common Library
//!
//! Shared code for the DeFi Rates service:
//! - Record store (SQLite schema, protocol and yield record queries)
//! - Natural-key upsert of freshly fetched yield records
//! - Update broadcaster for live-update subscribers
//! - Configuration loading
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{Broadcaster, BroadcasterConfig, SseMessage, Subscription, SubscriptionGuard};
