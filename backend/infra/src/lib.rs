//! Storage infrastructure for signalforge.
//!
//! Everything here is plain JSON on the local filesystem: a namespaced cache
//! with per-entry expiry and a directory of dated reports.

pub mod cache;
pub mod report_store;

pub use cache::{CacheEntry, CacheLookup, CacheStore};
pub use report_store::ReportStore;
