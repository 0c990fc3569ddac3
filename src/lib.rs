//! Device location ingestion: admission-gated, idempotent persistence of
//! telemetry batches and coalesced real-time fan-out of each device's
//! latest position, plus keyset-paginated history reads.

pub mod broadcaster;
pub mod config;
pub mod db;
pub mod error;
pub mod gate;
pub mod kafka;
pub mod models;
pub mod processor;
pub mod query;
