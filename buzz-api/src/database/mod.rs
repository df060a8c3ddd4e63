//! Database connection and repository layer
//!
//! Postgres-backed persistence behind the `buzz-core` repository traits.
//! The service falls back to the in-memory repositories when no
//! `DATABASE_URL` is configured.

pub mod connection;
pub mod repositories;

pub use connection::{DatabaseConfig, DatabasePool};
