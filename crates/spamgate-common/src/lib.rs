//! Spamgate Common - Shared types and utilities
//!
//! This crate provides configuration, error types, logging bootstrap and
//! small shared types used by all Spamgate components.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::Severity;
