//! Core domain + pipeline logic for the Telegram lead scraper.
//!
//! This crate is intentionally framework-agnostic. Telegram and the AI classifier
//! live behind ports (traits) implemented in adapter crates.

pub mod aggregate;
pub mod artifacts;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod domain;
pub mod errors;
pub mod export;
pub mod filter;
pub mod keywords;
pub mod logging;
pub mod pacing;
pub mod pipeline;
pub mod ports;
pub mod report;
pub mod retry;

pub use errors::{Error, Result};
