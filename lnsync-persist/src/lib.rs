#![crate_name = "lnsync_persist"]

//! Durable storage for the graph mirror.

#![forbid(unsafe_code)]
#![warn(rustdoc::broken_intra_doc_links)]
#![warn(missing_docs)]

/// JSON file persistence for the funding transaction cache
pub mod json_cache;
/// A redb backed key-value store
pub mod redb;

pub use self::json_cache::JsonFileCache;
pub use self::redb::RedbKvStore;
