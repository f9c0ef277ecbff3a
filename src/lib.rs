//! SHARPLINE — sharp-bookmaker consensus pricing
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod devig;
pub mod provider;
pub mod aggregate;
pub mod engine;
pub mod storage;
