//! Core library for the arbitrage engine.
//!
//! Pools come in through a discovery feed, are indexed, scanned for direct
//! and triangular divergences, screened by the protection pipeline and
//! finally signed and relayed by the execution orchestrator.

pub mod alerts;
pub mod arbitrage;
pub mod builder;
pub mod chain;
pub mod cli;
pub mod config;
pub mod dex;
pub mod engine;
pub mod errors;
pub mod execution;
pub mod feed;
pub mod index;
pub mod models;
pub mod oracle;
pub mod protection;
pub mod repository;
pub mod utils;
