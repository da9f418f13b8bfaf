//! Core types and utilities for the rate alerts receiver
//!
//! This crate provides shared types used across all components:
//! - Subscription conditions and their store keys
//! - Comparison operators and destinations
//! - Rate snapshots and notification payloads
//! - Configuration and error types
//! - The shutdown signal shared by every long-running loop

pub mod types;
pub mod conditions;
pub mod rates;
pub mod config;
pub mod errors;
pub mod shutdown;

pub use types::*;
pub use conditions::*;
pub use rates::*;
pub use config::*;
pub use errors::*;
pub use shutdown::{cancelled, is_cancelled, shutdown_channel};
