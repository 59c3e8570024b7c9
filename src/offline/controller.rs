//! Offline controller: precaches the app shell and intercepts fetches.
//!
//! Lifecycle per release: `install` precaches every manifest asset into the
//! release's bucket, `activate` drops buckets of older releases and takes
//! control of clients. Once in control, document requests go network-first
//! with the cached document as fallback, and everything else is served
//! cache-first with a background refresh.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::message::ControlMessage;
use super::request::{strip_cache_buster, CacheKey, Request, Response};
use super::storage::CacheStorage;
use super::traits::{FetchOutcome, Network};
use crate::config::OfflineConfig;
use crate::error::CacheError;

/// Lifecycle states of one controller generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
  /// Install failed or the generation was replaced
  Redundant,
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      WorkerState::Parsed => "parsed",
      WorkerState::Installing => "installing",
      WorkerState::Installed => "installed",
      WorkerState::Activating => "activating",
      WorkerState::Activated => "activated",
      WorkerState::Redundant => "redundant",
    };
    f.write_str(s)
  }
}

/// Static settings of a controller generation.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
  pub bucket: String,
  pub origin: Url,
  /// Absolute URLs precached on install
  pub assets: Vec<Url>,
  /// Canonical document used for navigations
  pub document: Url,
  pub bust_param: String,
  pub skip_waiting_on_install: bool,
}

impl ControllerSettings {
  pub fn from_config(config: &OfflineConfig) -> Result<Self> {
    let origin = config.origin_url()?;
    let resolve = |path: &str| {
      origin
        .join(path)
        .map_err(|e| eyre!("Invalid asset path '{}': {}", path, e))
    };

    Ok(Self {
      bucket: config.bucket_name(),
      assets: config
        .assets
        .iter()
        .map(|a| resolve(a))
        .collect::<Result<_>>()?,
      document: resolve(&config.document_path)?,
      bust_param: config.bust_param.clone(),
      skip_waiting_on_install: config.skip_waiting_on_install,
      origin,
    })
  }
}

#[derive(Debug)]
struct Lifecycle {
  state: WorkerState,
  skip_waiting: bool,
  clients_claimed: bool,
}

/// What an `update` run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
  pub precached: usize,
  pub activated: bool,
  /// Buckets of older releases that were deleted
  pub removed_buckets: Vec<String>,
}

pub struct OfflineController<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  settings: Arc<ControllerSettings>,
  lifecycle: Arc<Mutex<Lifecycle>>,
}

impl<S: CacheStorage, N: Network> OfflineController<S, N> {
  pub fn new(settings: ControllerSettings, storage: S, network: N) -> Self {
    Self {
      storage: Arc::new(storage),
      network: Arc::new(network),
      settings: Arc::new(settings),
      lifecycle: Arc::new(Mutex::new(Lifecycle {
        state: WorkerState::Parsed,
        skip_waiting: false,
        clients_claimed: false,
      })),
    }
  }

  fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
    // The guarded data stays consistent even if a holder panicked
    self
      .lifecycle
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn state(&self) -> WorkerState {
    self.lifecycle().state
  }

  pub fn bucket(&self) -> &str {
    &self.settings.bucket
  }

  /// Installed, but held back until told to skip waiting.
  pub fn is_waiting(&self) -> bool {
    let lc = self.lifecycle();
    lc.state == WorkerState::Installed && !lc.skip_waiting
  }

  pub fn controls_clients(&self) -> bool {
    self.lifecycle().clients_claimed
  }

  fn transition(
    &self,
    action: &'static str,
    from: WorkerState,
    to: WorkerState,
  ) -> Result<(), CacheError> {
    let mut lc = self.lifecycle();
    if lc.state != from {
      return Err(CacheError::InvalidState {
        action,
        state: lc.state.to_string(),
      });
    }
    lc.state = to;
    Ok(())
  }

  /// Precache every manifest asset into this release's bucket.
  ///
  /// Nothing is stored unless every asset was fetched with a success status;
  /// on failure the generation becomes redundant and can never activate.
  pub async fn install(&self) -> Result<usize, CacheError> {
    self.transition("install", WorkerState::Parsed, WorkerState::Installing)?;

    match self.precache().await {
      Ok(count) => {
        let mut lc = self.lifecycle();
        lc.state = WorkerState::Installed;
        lc.skip_waiting = self.settings.skip_waiting_on_install;
        info!(bucket = %self.settings.bucket, assets = count, "installed");
        Ok(count)
      }
      Err(e) => {
        self.lifecycle().state = WorkerState::Redundant;
        warn!(bucket = %self.settings.bucket, error = %e, "install failed");
        Err(e)
      }
    }
  }

  /// The bucket only comes into existence together with the full asset set.
  async fn precache(&self) -> Result<usize, CacheError> {
    let fetches = self.settings.assets.iter().map(|url| {
      let request = Request::get(url.clone());
      let key = self.cache_key(&request);
      async move {
        let response = self.network.fetch(&request).await?;
        if !response.is_ok() {
          return Err(CacheError::Precache {
            url: request.url.to_string(),
            status: response.status,
          });
        }
        Ok((key, response))
      }
    });
    let entries = futures::future::try_join_all(fetches).await?;

    self.storage.put_all(&self.settings.bucket, &entries)?;
    Ok(entries.len())
  }

  /// Drop every bucket from other releases and take control of clients.
  ///
  /// The release is recorded as activated in storage so later runs can
  /// resume it.
  pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
    self.transition("activate", WorkerState::Installed, WorkerState::Activating)?;

    let cleaned = self.remove_stale_buckets().and_then(|removed| {
      self.storage.mark_activated(&self.settings.bucket)?;
      Ok(removed)
    });
    let removed = match cleaned {
      Ok(removed) => removed,
      Err(e) => {
        self.lifecycle().state = WorkerState::Installed;
        return Err(e);
      }
    };

    let mut lc = self.lifecycle();
    lc.state = WorkerState::Activated;
    lc.clients_claimed = true;
    info!(bucket = %self.settings.bucket, removed = removed.len(), "activated");
    Ok(removed)
  }

  fn remove_stale_buckets(&self) -> Result<Vec<String>, CacheError> {
    let mut removed = Vec::new();
    for name in self.storage.bucket_names()? {
      if name != self.settings.bucket && self.storage.delete_bucket(&name)? {
        debug!(bucket = %name, "deleted stale bucket");
        removed.push(name);
      }
    }
    Ok(removed)
  }

  /// Pick up a release activated by an earlier run.
  ///
  /// A fresh controller whose bucket went through `activate` goes straight
  /// to `Activated` and controls clients. A bucket that was installed but
  /// never activated does not count. Returns whether the release is active.
  pub fn resume(&self) -> Result<bool, CacheError> {
    let activated = self.storage.is_activated(&self.settings.bucket)?;

    let mut lc = self.lifecycle();
    if !activated || lc.state != WorkerState::Parsed {
      return Ok(lc.state == WorkerState::Activated);
    }
    lc.state = WorkerState::Activated;
    lc.clients_claimed = true;
    debug!(bucket = %self.settings.bucket, "resumed");
    Ok(true)
  }

  /// Names of every bucket in storage.
  pub fn buckets(&self) -> Result<Vec<String>, CacheError> {
    self.storage.bucket_names()
  }

  /// Install, then activate unless the new generation has to wait.
  pub async fn update(&self) -> Result<UpdateReport, CacheError> {
    let precached = self.install().await?;
    if self.is_waiting() {
      info!("new version waiting for skip-waiting message");
      return Ok(UpdateReport {
        precached,
        activated: false,
        removed_buckets: Vec::new(),
      });
    }

    let removed_buckets = self.activate().await?;
    Ok(UpdateReport {
      precached,
      activated: true,
      removed_buckets,
    })
  }

  /// Handle a control message from a page.
  ///
  /// Returns the buckets removed when the message activated this release,
  /// or `None` when it changed nothing.
  pub async fn post_message(&self, raw: &str) -> Result<Option<Vec<String>>, CacheError> {
    match ControlMessage::parse(raw)? {
      ControlMessage::SkipWaiting => {
        {
          let mut lc = self.lifecycle();
          if lc.state != WorkerState::Installed {
            debug!(state = %lc.state, "skip-waiting ignored");
            return Ok(None);
          }
          lc.skip_waiting = true;
        }
        Ok(Some(self.activate().await?))
      }
    }
  }

  fn cache_key(&self, request: &Request) -> CacheKey {
    let url = strip_cache_buster(&request.url, &self.settings.origin, &self.settings.bust_param);
    CacheKey::new(&request.method, &url)
  }

  fn document_key(&self) -> CacheKey {
    CacheKey::new(&reqwest::Method::GET, &self.settings.document)
  }

  /// Look a request up in this release's bucket, without the network.
  pub fn cached(&self, request: &Request) -> Result<Option<Response>, CacheError> {
    let hit = self
      .storage
      .lookup(&self.settings.bucket, &self.cache_key(request))?;
    Ok(hit.map(|c| c.response))
  }

  /// Answer a request issued by a page.
  pub async fn handle_fetch(&self, request: Request) -> Result<FetchOutcome, CacheError> {
    if !self.controls_clients() {
      let response = self.network.fetch(&request).await?;
      return Ok(FetchOutcome::passthrough(response));
    }

    if request.wants_document() {
      self.network_first(request).await
    } else {
      self.cache_first(request).await
    }
  }

  async fn network_first(&self, request: Request) -> Result<FetchOutcome, CacheError> {
    let key = self.document_key();

    match self.network.fetch(&request).await {
      Ok(response) => {
        if response.is_ok() && request.is_same_origin(&self.settings.origin) {
          if let Err(e) = self.storage.put(&self.settings.bucket, &key, &response) {
            warn!(error = %e, "failed to store document");
          }
        }
        Ok(FetchOutcome::from_network(response))
      }
      Err(err) => match self.storage.lookup(&self.settings.bucket, &key) {
        Ok(Some(cached)) => {
          debug!(url = %request.url, "offline, serving cached document");
          Ok(FetchOutcome::offline(cached.response, cached.cached_at))
        }
        Ok(None) => Err(err),
        Err(e) => {
          warn!(error = %e, "document fallback unavailable");
          Err(err)
        }
      },
    }
  }

  async fn cache_first(&self, request: Request) -> Result<FetchOutcome, CacheError> {
    let key = self.cache_key(&request);

    let hit = self
      .storage
      .lookup(&self.settings.bucket, &key)
      .unwrap_or_else(|e| {
        warn!(error = %e, "cache lookup failed, going to network");
        None
      });

    if let Some(cached) = hit {
      let revalidation = self.spawn_revalidation(request, key);
      return Ok(FetchOutcome::from_cache(
        cached.response,
        cached.cached_at,
        revalidation,
      ));
    }

    let response = self.network.fetch(&request).await?;
    if self.is_storable(&request, &response) {
      if let Err(e) = self.storage.put(&self.settings.bucket, &key, &response) {
        warn!(url = %request.url, error = %e, "failed to store response");
      }
    }
    Ok(FetchOutcome::from_network(response))
  }

  fn is_storable(&self, request: &Request, response: &Response) -> bool {
    response.is_ok()
      && request.method == reqwest::Method::GET
      && request.is_same_origin(&self.settings.origin)
  }

  /// Refresh a cached entry in the background. Failures are ignored.
  fn spawn_revalidation(&self, request: Request, key: CacheKey) -> JoinHandle<()> {
    let storage = Arc::clone(&self.storage);
    let network = Arc::clone(&self.network);
    let bucket = self.settings.bucket.clone();

    tokio::spawn(async move {
      match network.fetch(&request).await {
        Ok(response) if response.is_ok() => {
          if let Err(e) = storage.put(&bucket, &key, &response) {
            debug!(url = %request.url, error = %e, "revalidation not stored");
          }
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "revalidation skipped");
        }
        Err(e) => {
          debug!(url = %request.url, error = %e, "revalidation failed");
        }
      }
    })
  }
}

impl<S: CacheStorage, N: Network> Clone for OfflineController<S, N> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      settings: Arc::clone(&self.settings),
      lifecycle: Arc::clone(&self.lifecycle),
    }
  }
}
