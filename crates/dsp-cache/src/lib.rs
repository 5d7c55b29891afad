//! # DSP Cache
//!
//! Key-value storage used by the event dispatcher to persist its listener,
//! script and observer tables between requests.
//!
//! ## Features
//!
//! - **Pluggable backends**: in-memory and disk storage behind one async trait
//! - **Expiring entries**: [`CacheEntry`] carries an optional TTL, and
//!   [`get_fresh`] drops entries that have outlived it
//! - **JSON values**: everything is stored as `serde_json::Value`, so any
//!   serializable table can be cached

pub mod error;
pub mod storage;

pub use error::CacheError;
pub use storage::{get_fresh, put, CacheEntry, CacheStorage, DiskStorage, MemoryStorage};

/// Re-export commonly used types
pub type Result<T> = std::result::Result<T, CacheError>;
