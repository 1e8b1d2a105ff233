//! Background job queue backing the Indexer's sync/index/embedding work and
//! the Quarantine reaper, built on apalis over a SQLite-backed queue.
//!
//! # Example
//!
//! ```rust,ignore
//! use catalog_core::jobs::{JobConfig, JobStorage, create_storage};
//!
//! let config = JobConfig::sqlite("~/.catalog-core/jobs.db");
//! let storage = create_storage(&config).await?;
//! ```

mod config;
mod types;
mod storage;
mod worker;
mod sqlite;

pub use config::*;
pub use types::*;
pub use storage::*;
pub use worker::*;
pub use sqlite::*;
