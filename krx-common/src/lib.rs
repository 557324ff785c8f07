//! KRX Common - Shared types, utilities, and configuration for the KRX scanner.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Config loading errors
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, KisConfig, ObservabilityConfig, ScannerConfig};
pub use error::{Error, Result};

