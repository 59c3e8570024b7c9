//! Core traits and types for the offline controller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use super::request::{Request, Response};
use crate::error::CacheError;

/// Live network access.
///
/// HTTP error statuses are returned as responses; only transport failures
/// are errors (`CacheError::Network`).
#[async_trait]
pub trait Network: Send + Sync + 'static {
  async fn fetch(&self, request: &Request) -> Result<Response, CacheError>;
}

/// Result of an intercepted fetch, including where the response came from.
#[derive(Debug)]
pub struct FetchOutcome {
  pub response: Response,
  pub source: CacheSource,
  /// When the served copy was stored (if it came from a bucket)
  pub cached_at: Option<DateTime<Utc>>,
  /// Background refresh started for a cache hit
  pub revalidation: Option<JoinHandle<()>>,
}

impl FetchOutcome {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Network,
      cached_at: None,
      revalidation: None,
    }
  }

  pub fn passthrough(response: Response) -> Self {
    Self {
      source: CacheSource::Passthrough,
      ..Self::from_network(response)
    }
  }

  pub fn from_cache(
    response: Response,
    cached_at: DateTime<Utc>,
    revalidation: JoinHandle<()>,
  ) -> Self {
    Self {
      response,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
      revalidation: Some(revalidation),
    }
  }

  /// Network unavailable, serving the stored document.
  pub fn offline(response: Response, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
      revalidation: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh from the network
  Network,
  /// From the bucket, with a background refresh under way
  Cache,
  /// Network failed, serving the cached document
  Offline,
  /// Worker not controlling clients yet; request went straight out
  Passthrough,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      CacheSource::Network => "network",
      CacheSource::Cache => "cache",
      CacheSource::Offline => "offline",
      CacheSource::Passthrough => "passthrough",
    };
    f.write_str(s)
  }
}
