//! Strategy engine: cache-first, network-first and stale-while-revalidate.
//!
//! ### Write-through
//! - A response is stored only if the cacheable-response filter accepts it;
//!   it is returned to the caller either way.
//! - Storage failures are logged and never surface to the caller.
//! - Eviction runs as a background task after every write.
//!
//! ### Non-GET
//! - Always answered from the network, never read from or written to a cache.

mod background;

pub use background::BackgroundTasks;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};

use backstage_core::cache::{CacheDb, CachedEntry, EvictionLimits};
use backstage_core::policy::{CacheableResponseFilter, InterceptedRequest, ResponseSnapshot, Strategy};
use backstage_core::Error;

use crate::fetch::Network;

/// Where a strategy reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTarget {
    /// Full cache name, already scoped to `version`.
    pub cache_name: String,
    /// Version that owns the cache if it has to be created.
    pub version: String,
    pub limits: EvictionLimits,
}

/// Where the returned response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Network,
    Cache,
    Precache,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyOutcome {
    pub response: ResponseSnapshot,
    pub source: ResponseSource,
}

impl StrategyOutcome {
    pub fn new(response: ResponseSnapshot, source: ResponseSource) -> Self {
        Self { response, source }
    }

    fn cached(entry: CachedEntry) -> Self {
        Self::new(entry.response, ResponseSource::Cache)
    }
}

type PendingFetch = JoinHandle<Result<ResponseSnapshot, Error>>;

/// Runs the fulfillment algorithms against one cache store and network.
#[derive(Clone)]
pub struct StrategyEngine {
    db: CacheDb,
    network: Arc<dyn Network>,
    filter: Arc<CacheableResponseFilter>,
    tasks: BackgroundTasks,
}

impl StrategyEngine {
    pub fn new(db: CacheDb, network: Arc<dyn Network>, filter: CacheableResponseFilter) -> Self {
        Self { db, network, filter: Arc::new(filter), tasks: BackgroundTasks::default() }
    }

    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    /// Fulfill `request` with `strategy` against `target`.
    pub async fn handle(
        &self, strategy: &Strategy, request: &InterceptedRequest, target: &CacheTarget,
    ) -> Result<StrategyOutcome, Error> {
        if !request.is_cacheable_method() {
            return self.network_only(request).await;
        }

        match strategy {
            Strategy::CacheFirst => self.cache_first(request, target).await,
            Strategy::NetworkFirst { network_timeout } => self.network_first(request, target, *network_timeout).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request, target).await,
        }
    }

    /// Forward to the network without touching any cache.
    pub async fn network_only(&self, request: &InterceptedRequest) -> Result<StrategyOutcome, Error> {
        let response = self.network.fetch(request).await?;
        Ok(StrategyOutcome::new(response, ResponseSource::Network))
    }

    /// Wait for background write-through and eviction to finish.
    pub async fn settle(&self) {
        self.tasks.drain().await;
    }

    async fn cache_first(&self, request: &InterceptedRequest, target: &CacheTarget) -> Result<StrategyOutcome, Error> {
        if let Some(entry) = self.lookup(request, target).await {
            return Ok(StrategyOutcome::cached(entry));
        }

        let response = self.network.fetch(request).await?;
        self.write_through(request, target, &response).await;
        Ok(StrategyOutcome::new(response, ResponseSource::Network))
    }

    async fn network_first(
        &self, request: &InterceptedRequest, target: &CacheTarget, network_timeout: Option<Duration>,
    ) -> Result<StrategyOutcome, Error> {
        let mut fetch = self.spawn_fetch(request);

        if let Some(limit) = network_timeout {
            match tokio::time::timeout(limit, &mut fetch).await {
                Ok(joined) => return self.network_first_settled(request, target, flatten(joined)).await,
                Err(_) => {
                    let cached = self.lookup(request, target).await;
                    self.finish_in_background(fetch, request, target);
                    let timeout_ms = limit.as_millis() as u64;
                    return match cached {
                        Some(entry) => {
                            tracing::debug!(url = %request.url, timeout_ms, "network timed out, serving cached entry");
                            Ok(StrategyOutcome::cached(entry))
                        }
                        None => {
                            tracing::debug!(url = %request.url, timeout_ms, "network timed out with nothing cached");
                            Err(Error::NetworkTimeout(format!("{} after {timeout_ms}ms", request.url)))
                        }
                    };
                }
            }
        }

        let result = flatten(fetch.await);
        self.network_first_settled(request, target, result).await
    }

    async fn network_first_settled(
        &self, request: &InterceptedRequest, target: &CacheTarget, result: Result<ResponseSnapshot, Error>,
    ) -> Result<StrategyOutcome, Error> {
        match result {
            Ok(response) => {
                self.write_through(request, target, &response).await;
                Ok(StrategyOutcome::new(response, ResponseSource::Network))
            }
            Err(err) => match self.lookup(request, target).await {
                Some(entry) => {
                    tracing::debug!(url = %request.url, error = %err, "network failed, serving cached entry");
                    Ok(StrategyOutcome::cached(entry))
                }
                None => Err(err),
            },
        }
    }

    async fn stale_while_revalidate(
        &self, request: &InterceptedRequest, target: &CacheTarget,
    ) -> Result<StrategyOutcome, Error> {
        let fetch = self.spawn_fetch(request);

        if let Some(entry) = self.lookup(request, target).await {
            self.finish_in_background(fetch, request, target);
            return Ok(StrategyOutcome::cached(entry));
        }

        let response = flatten(fetch.await)?;
        self.write_through(request, target, &response).await;
        Ok(StrategyOutcome::new(response, ResponseSource::Network))
    }

    /// Cache read; storage errors count as a miss.
    async fn lookup(&self, request: &InterceptedRequest, target: &CacheTarget) -> Option<CachedEntry> {
        let key = request.cache_key();
        match self.db.get_entry(&target.cache_name, &key, target.limits.max_age(), Utc::now()).await {
            Ok(Some(entry)) => {
                tracing::debug!(cache = %target.cache_name, url = %request.url, "cache hit");
                Some(entry)
            }
            Ok(None) => {
                tracing::debug!(cache = %target.cache_name, url = %request.url, "cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(cache = %target.cache_name, url = %request.url, "cache read failed: {e}");
                None
            }
        }
    }

    async fn write_through(&self, request: &InterceptedRequest, target: &CacheTarget, response: &ResponseSnapshot) {
        if !self.filter.is_cacheable(response) {
            tracing::debug!(url = %request.url, status = response.status, "response not cacheable");
            return;
        }

        let entry =
            CachedEntry::new(&target.cache_name, &request.method, request.url.as_str(), response.clone(), Utc::now());
        if let Err(e) = self.db.put_entry(&target.version, &entry).await {
            tracing::warn!(cache = %target.cache_name, url = %request.url, "cache write failed: {e}");
            return;
        }

        if target.limits.is_unbounded() {
            return;
        }
        let db = self.db.clone();
        let cache_name = target.cache_name.clone();
        let limits = target.limits;
        self.tasks.spawn(async move {
            if let Err(e) = db.enforce_limits(&cache_name, &limits, Utc::now()).await {
                tracing::warn!(cache = %cache_name, "eviction failed: {e}");
            }
        });
    }

    fn spawn_fetch(&self, request: &InterceptedRequest) -> PendingFetch {
        let network = self.network.clone();
        let request = request.clone();
        tokio::spawn(async move { network.fetch(&request).await })
    }

    /// Let a fetch the caller stopped waiting for still write through.
    fn finish_in_background(&self, fetch: PendingFetch, request: &InterceptedRequest, target: &CacheTarget) {
        let engine = self.clone();
        let request = request.clone();
        let target = target.clone();
        self.tasks.spawn(async move {
            match flatten(fetch.await) {
                Ok(response) => engine.write_through(&request, &target, &response).await,
                Err(e) => tracing::debug!(url = %request.url, "background revalidation failed: {e}"),
            }
        });
    }
}

fn flatten(joined: Result<Result<ResponseSnapshot, Error>, JoinError>) -> Result<ResponseSnapshot, Error> {
    joined.map_err(|e| Error::Network(format!("fetch task failed: {e}")))?
}
