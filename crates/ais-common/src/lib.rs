//! AIS Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the AIS ingestion workspace.
//!
//! - **Error Handling**: [`AisError`] and the [`Result`] alias used by configuration
//!   loading and other non-stage code
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`], the single place
//!   where the tracing subscriber is installed
//!
//! # Example
//!
//! ```no_run
//! use ais_common::logging::{init_logging, LogConfig};
//! use tracing::info;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!     info!("Pipeline starting");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{AisError, Result};
