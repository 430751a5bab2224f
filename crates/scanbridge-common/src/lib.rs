//! scanbridge Common - Shared types and configuration
//!
//! This crate provides the configuration, error type and domain types
//! shared by the scan bridge library and its command line harness.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::{HeaderLine, HeaderType, LocalScanCode, LogSelector, ScanResult, SessionInfo};
