//! FactorLab Core — domain types, data acquisition, and the scoring engine.
//!
//! This crate contains everything below the run orchestrator:
//! - Domain types (candidates, price bars, symbol normalization)
//! - Market-data client with bounded retry and host fallback
//! - Durable CSV caches for pools, histories, and name maps
//! - The acquisition hub (cache-first, fetch-on-miss, fallback-on-failure)
//! - The pure four-factor scoring engine
//! - Screener configuration

pub mod config;
pub mod data;
pub mod domain;
pub mod scoring;
