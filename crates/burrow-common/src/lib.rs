//! BurrowDB common types, errors, and configuration.
//!
//! This crate provides shared definitions used across all BurrowDB components.

pub mod config;
pub mod error;
pub mod types;

pub use config::{RecoveryMode, StoreConfig, DEFAULT_CHECKPOINT_THRESHOLD, DEFAULT_PAGE_SIZE};
pub use error::{BurrowError, Result};
pub use types::TxnId;
