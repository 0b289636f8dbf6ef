//! Interception policy for application requests
//!
//! The policy reacts to the three lifecycle events of the interception layer:
//!
//! - `on_install` pre-caches the application root in the current cache
//! - `on_activate` deletes every cache that is not the current one
//! - `on_fetch` sends `/api/` requests straight to the network and handles
//!   everything else network-first, falling back to the cache only when the
//!   network cannot be reached

use std::sync::{Arc, Mutex};

use futures::future::join_all;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheError, CacheStorage};
use crate::data::{Network, NetworkError, Request, Response};

/// Name of the cache owned by this version of the policy
pub const CURRENT_CACHE_NAME: &str = "pcd-v1";

/// Requests whose path starts with this prefix are never cached
pub const API_PREFIX: &str = "/api/";

/// Path fetched and cached at install time
pub const BOOTSTRAP_PATH: &str = "/";

/// Origin used when none is configured
pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1:5000";

/// Signal returned to the host once a lifecycle event has been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Activate this version now instead of waiting for older instances to close
    SkipWaiting,
    /// Take control of all open clients immediately
    ClaimClients,
}

/// Errors that make installation fail
#[derive(Debug, Error)]
pub enum InstallError {
    /// The bootstrap request could not reach the network
    #[error("Bootstrap fetch failed: {0}")]
    Network(#[from] NetworkError),

    /// The bootstrap request returned a non-2xx status
    #[error("Bootstrap fetch returned HTTP {0}")]
    BadStatus(u16),

    /// The bootstrap response could not be stored
    #[error("Could not store bootstrap response: {0}")]
    Cache(#[from] CacheError),

    /// The bootstrap path does not form a valid URL with the origin
    #[error("Invalid bootstrap URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Settings for the interception policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Name of the current cache; all other cache names are stale
    pub cache_name: String,
    /// Origin the bootstrap path is resolved against
    pub origin: Url,
    /// Path prefix that bypasses the cache entirely
    pub bypass_prefix: String,
    /// Path pre-cached at install time
    pub bootstrap_path: String,
}

impl PolicyConfig {
    /// Creates a config for the given origin with the default cache name,
    /// bypass prefix and bootstrap path
    pub fn new(origin: Url) -> Self {
        Self {
            cache_name: CURRENT_CACHE_NAME.to_string(),
            origin,
            bypass_prefix: API_PREFIX.to_string(),
            bootstrap_path: BOOTSTRAP_PATH.to_string(),
        }
    }

    /// Overrides the current cache name
    pub fn with_cache_name(mut self, cache_name: impl Into<String>) -> Self {
        self.cache_name = cache_name.into();
        self
    }
}

/// Handles install, activate and fetch events against a cache storage and a network
pub struct InterceptionPolicy {
    config: PolicyConfig,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    /// Cache writes spawned by `on_fetch` that may still be running
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
}

impl InterceptionPolicy {
    /// Creates a new policy over the given storage and network
    pub fn new(config: PolicyConfig, storage: Arc<dyn CacheStorage>, network: Arc<dyn Network>) -> Self {
        Self {
            config,
            storage,
            network,
            pending_writes: Mutex::new(Vec::new()),
        }
    }

    /// Returns the policy configuration
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Returns the storage this policy caches into
    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    /// Builds the request fetched at install time
    pub fn bootstrap_request(&self) -> Result<Request, url::ParseError> {
        Ok(Request::get(self.config.origin.join(&self.config.bootstrap_path)?))
    }

    /// Whether the cache takes part in handling this request
    ///
    /// Returns `false` for requests under the bypass prefix.
    pub fn intercepts(&self, request: &Request) -> bool {
        !request.path().starts_with(&self.config.bypass_prefix)
    }

    /// Handles the install event
    ///
    /// Opens the current cache and stores a fresh copy of the bootstrap path
    /// in it. Fails if the bootstrap request cannot be fetched, returns a
    /// non-2xx status, or cannot be stored.
    pub async fn on_install(&self) -> Result<LifecycleSignal, InstallError> {
        let cache_name = &self.config.cache_name;
        self.storage.open(cache_name).await?;

        let request = self.bootstrap_request()?;
        let response = self.network.issue(&request).await?;
        if !response.ok() {
            return Err(InstallError::BadStatus(response.status));
        }
        self.storage.put(cache_name, &request, &response).await?;

        info!(cache = %cache_name, url = %request.url, "Installed");
        Ok(LifecycleSignal::SkipWaiting)
    }

    /// Handles the activate event
    ///
    /// Deletes every cache other than the current one. Deletions run
    /// concurrently and all finish before this returns; a failed deletion is
    /// logged and does not stop the others.
    pub async fn on_activate(&self) -> LifecycleSignal {
        let current = &self.config.cache_name;
        let names = match self.storage.keys().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Could not enumerate caches");
                Vec::new()
            }
        };

        let stale: Vec<String> = names.into_iter().filter(|name| name != current).collect();
        let results = join_all(stale.iter().map(|name| self.storage.delete(name))).await;

        for (name, result) in stale.iter().zip(results) {
            match result {
                Ok(true) => info!(cache = %name, "Deleted stale cache"),
                Ok(false) => debug!(cache = %name, "Stale cache already gone"),
                Err(e) => warn!(cache = %name, error = %e, "Failed to delete stale cache"),
            }
        }

        LifecycleSignal::ClaimClients
    }

    /// Handles a fetch event
    ///
    /// Requests under the bypass prefix go to the network and their result is
    /// returned unchanged. Everything else is fetched from the network first:
    /// a 2xx response is copied into the current cache in the background and
    /// returned, any other response is returned as-is, and only a network
    /// failure falls back to the cache. `Ok(None)` means the network failed
    /// and nothing was cached for the request.
    pub async fn on_fetch(&self, request: &Request) -> Result<Option<Response>, NetworkError> {
        if !self.intercepts(request) {
            debug!(method = %request.method, url = %request.url, "Bypassing cache");
            return self.network.issue(request).await.map(Some);
        }

        match self.network.issue(request).await {
            Ok(response) => {
                if response.ok() {
                    self.cache_in_background(request.clone(), response.clone());
                }
                Ok(Some(response))
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, trying cache");
                match self.storage.match_request(&self.config.cache_name, request).await {
                    Ok(cached) => Ok(cached),
                    Err(e) => {
                        warn!(url = %request.url, error = %e, "Cache lookup failed");
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Waits for every cache write spawned so far to finish
    pub async fn settle(&self) {
        let pending = std::mem::take(&mut *self.lock_pending());
        for handle in pending {
            let _ = handle.await;
        }
    }

    /// Spawns a detached write of `response` into the current cache
    fn cache_in_background(&self, request: Request, response: Response) {
        let storage = Arc::clone(&self.storage);
        let cache_name = self.config.cache_name.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = storage.put(&cache_name, &request, &response).await {
                debug!(cache = %cache_name, url = %request.url, error = %e, "Dropped cache write");
            }
        });

        let mut pending = self.lock_pending();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.pending_writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
