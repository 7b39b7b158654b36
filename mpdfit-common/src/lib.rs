//! # mpdfit Common Library
//!
//! Shared code for the mpdfit tools including:
//! - Error taxonomy (`Error` enum and `Result` alias)
//! - Configuration loading and daemon address parsing
//! - Time formatting helpers for the MPD wire format and reports
//! - Rolling statistics used for latency tracking

pub mod config;
pub mod error;
pub mod stats;
pub mod time;

pub use config::DaemonAddress;
pub use error::{Error, Result};
pub use stats::{RollingStatistics, StatsByCategory};
