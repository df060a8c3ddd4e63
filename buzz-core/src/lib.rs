//! Buzz Ledger & Reward Engine
//!
//! This library provides the core engine of the Buzz rewards platform:
//! mileage accounts backed by an append-only transaction ledger, coupon
//! issuance and redemption, settlement aggregation for partner businesses,
//! and the advisory budget monitor.

pub mod error;
pub mod qr;
pub mod business;
pub mod mileage;
pub mod coupon;
pub mod settlement;
pub mod budget;

// Re-export commonly used types for convenience
pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
