//! Error types for the local store, the shopping-list operations and the
//! offline cache.

use thiserror::Error;

/// Failures of the local record store.
#[derive(Debug, Error)]
pub enum StoreError {
  /// The database could not be opened or upgraded.
  #[error("failed to open store at {path}: {reason}")]
  Connection { path: String, reason: String },

  /// A read, write or delete failed.
  #[error("store transaction failed: {0}")]
  Transaction(#[from] rusqlite::Error),

  /// A stored document could not be encoded or decoded.
  #[error("failed to (de)serialize record: {0}")]
  Serialization(#[from] serde_json::Error),

  /// The blocking worker running the operation went away.
  #[error("store worker failed: {0}")]
  Worker(String),
}

/// Failures of the shopping-list operations built on the store.
#[derive(Debug, Error)]
pub enum ShoppingError {
  #[error("{0} must not be empty")]
  Empty(&'static str),

  #[error("invalid quantity '{0}': expected a number with at most 10 digits")]
  InvalidQuantity(String),

  #[error("no list with id {0}")]
  UnknownList(String),

  #[error("no item with id {0}")]
  UnknownItem(String),

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Failures of the offline asset cache.
#[derive(Debug, Error)]
pub enum CacheError {
  /// The cache storage could not be opened, read or written.
  #[error("asset cache unavailable: {0}")]
  Unavailable(String),

  /// A live fetch failed and nothing could stand in for it.
  #[error("network fetch of {url} failed: {reason}")]
  Network { url: String, reason: String },

  /// A manifest asset answered with a non-success status during install.
  #[error("precache of {url} failed with status {status}")]
  Precache { url: String, status: u16 },

  /// A lifecycle step was requested in the wrong worker state.
  #[error("cannot {action} while worker is {state}")]
  InvalidState { action: &'static str, state: String },

  /// A control message could not be understood.
  #[error("invalid control message: {0}")]
  Message(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for CacheError {
  fn from(e: rusqlite::Error) -> Self {
    CacheError::Unavailable(e.to_string())
  }
}
