//! # tlgstore
//!
//! Durable key/value record log used as the backing tier of the task list
//! generator caches.
//!
//! ## Properties
//! - Append-only log, one writer lock, per-key put/get atomicity
//! - Index rebuilt on open by replaying the memory-mapped log
//! - Torn trailing writes are discarded on recovery
//! - 1 MB max value, 64 KB max key, 1 GB max log size

#![warn(missing_docs)]

mod error;
mod parser;
mod storage;

pub use error::{Error, Result};
pub use storage::DiskStore;
