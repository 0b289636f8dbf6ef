//! Cache module for storing responses under versioned cache names
//!
//! This module defines the `CacheStorage` interface the interception policy
//! works against and a disk-backed implementation. Entries carry no expiry;
//! a cache is only ever emptied by deleting it as a whole.

mod manager;

pub use manager::DiskCacheStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::data::{Request, RequestKey, Response};

/// Errors that can occur when reading or writing a cache store
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem error
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry metadata could not be encoded or decoded
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An entry exists but is not in the expected format
    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),

    /// The cache name cannot be used as a store name
    #[error("Invalid cache name: '{0}'")]
    InvalidName(String),
}

/// Short description of one cached entry, for inspection
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySummary {
    /// The request the entry answers
    pub key: RequestKey,
    /// Cached response status
    pub status: u16,
    /// Body size in bytes
    pub size: usize,
    /// When the entry was written
    pub cached_at: DateTime<Utc>,
}

/// A set of named, persistent request/response stores
///
/// Every operation is atomic for a single entry; there are no multi-key
/// transactions. Concurrent writes to the same key resolve last-write-wins.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Creates the named cache if it does not exist yet
    async fn open(&self, name: &str) -> Result<(), CacheError>;

    /// Stores `response` under the key of `request` in the named cache
    ///
    /// Returns `Ok(false)` without storing anything when the request is not
    /// cacheable (anything other than GET).
    async fn put(&self, name: &str, request: &Request, response: &Response) -> Result<bool, CacheError>;

    /// Looks up the response stored for `request` by exact key
    async fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>, CacheError>;

    /// Lists all existing cache names
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Deletes the named cache and all of its entries
    ///
    /// Returns `Ok(false)` if no cache with that name existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Lists the entries of the named cache
    async fn entries(&self, name: &str) -> Result<Vec<EntrySummary>, CacheError>;
}
