//! # joinq
//!
//! SQLite-backed join-target distribution engine.
//!
//! Ingests and deduplicates channel/group links, distributes them across a
//! pool of worker accounts with a reserve held back for dead-target
//! replacement, and drives one rate-limited join loop per worker against a
//! pluggable messaging platform. Observability via OpenTelemetry.

pub mod config;
pub mod db;
pub mod distributor;
pub mod engine;
pub mod error;
pub mod event;
pub mod link;
pub mod model;
pub mod platform;
pub mod telemetry;
