//! # Portal Sync Library
//!
//! Integration sync and metrics aggregation for the agency client portal:
//! platform adapters, the sync engine, the aggregator, the daily triggers and
//! the operator API that exposes them.

pub mod aggregator;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod periods;
pub mod platforms;
pub mod reports;
pub mod repositories;
pub mod scheduler;
pub mod server;
pub mod sync_engine;
pub mod telemetry;
pub use migration;
