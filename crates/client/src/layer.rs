//! The interception layer: one owner for every piece of cache state.
//!
//! ### Request path
//! 1. No active version: pass through untouched.
//! 2. GET whose URL is in the active precache: served from it.
//! 3. Classified by the route table; no match passes through untouched.
//! 4. Matched routes run their strategy against `<cache>-<version>`.
//! 5. A navigation that still fails gets the precached fallback document.
//!
//! ### Lifecycle
//! - `install` precaches a manifest as a new version, which then waits for
//!   the active version's sessions to close (or for `activate_waiting`).
//! - Activation persists the new active version and deletes every cache
//!   owned by a version the controller no longer tracks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use tokio::sync::broadcast;
use url::Url;

use backstage_core::cache::{CacheDb, CacheSummary, precache_name, runtime_cache_name};
use backstage_core::lifecycle::{Activation, LifecycleSnapshot};
use backstage_core::policy::{Classification, InterceptedRequest, RouteTable};
use backstage_core::{AppConfig, Error, LifecycleController, LifecycleEvent, LifecycleState, PrecacheManifest, SessionId};

use crate::fetch::{Network, resolve, strip_ignored_params, with_directory_index};
use crate::precache::PrecacheLoader;
use crate::strategy::{CacheTarget, ResponseSource, StrategyEngine, StrategyOutcome};

/// Lifecycle and storage view reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct LayerStatus {
    #[serde(flatten)]
    pub lifecycle: LifecycleSnapshot,
    pub update_waiting: bool,
    pub caches: Vec<CacheSummary>,
}

pub struct InterceptionLayer {
    engine: StrategyEngine,
    loader: PrecacheLoader,
    routes: RouteTable,
    origin: Url,
    ignore_params: Vec<Regex>,
    navigate_fallback: Option<String>,
    fallback_denylist: Vec<Regex>,
    lifecycle: Mutex<LifecycleController>,
}

impl InterceptionLayer {
    /// Build the layer, resuming whatever version was active last time.
    pub async fn new(db: CacheDb, network: Arc<dyn Network>, config: &AppConfig) -> Result<Self, Error> {
        let invalid = |e: backstage_core::config::ConfigError| Error::InvalidInput(e.to_string());
        let routes = config.route_table().map_err(invalid)?;
        let origin = config.origin_url().map_err(invalid)?;
        let ignore_params = config.ignore_url_parameter_patterns().map_err(invalid)?;
        let fallback_denylist = config.navigate_fallback_denylist_patterns().map_err(invalid)?;

        let active = db.active_version().await?;
        match &active {
            Some(version) => tracing::info!(version = %version, "resuming active layer version"),
            None => tracing::info!("no active layer version, requests pass through"),
        }

        Ok(Self {
            engine: StrategyEngine::new(db.clone(), network.clone(), config.response_filter()),
            loader: PrecacheLoader::new(db, network, origin.clone()),
            routes,
            origin,
            ignore_params,
            navigate_fallback: config.navigate_fallback.clone(),
            fallback_denylist,
            lifecycle: Mutex::new(LifecycleController::new(active)),
        })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    fn lifecycle(&self) -> MutexGuard<'_, LifecycleController> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn db(&self) -> &CacheDb {
        self.engine.db()
    }

    pub fn active_version(&self) -> Option<String> {
        self.lifecycle().active().map(str::to_string)
    }

    /// Answer a request issued by the application.
    pub async fn handle(&self, request: &InterceptedRequest) -> Result<StrategyOutcome, Error> {
        let Some(version) = self.active_version() else {
            return self.engine.network_only(request).await;
        };

        if request.is_cacheable_method()
            && let Some(outcome) = self.serve_precached(&version, request).await
        {
            return Ok(outcome);
        }

        let policy = match self.routes.classify(request) {
            Classification::Policy(policy) => policy,
            Classification::PassThrough => return self.engine.network_only(request).await,
        };
        tracing::debug!(route = %policy.name, strategy = policy.strategy.name(), url = %request.url, "route matched");

        let target = CacheTarget {
            cache_name: runtime_cache_name(&policy.cache_name, &version),
            version: version.clone(),
            limits: policy.limits,
        };
        match self.engine.handle(&policy.strategy, request, &target).await {
            Err(err) if request.navigation => self.navigation_fallback(&version, request, err).await,
            result => result,
        }
    }

    async fn serve_precached(&self, version: &str, request: &InterceptedRequest) -> Option<StrategyOutcome> {
        let cache_name = precache_name(version);
        let stripped = strip_ignored_params(&request.url, &self.ignore_params);
        let indexed = with_directory_index(&stripped);

        for url in std::iter::once(stripped).chain(indexed) {
            let key = InterceptedRequest::get(url).cache_key();
            match self.db().get_entry(&cache_name, &key, None, Utc::now()).await {
                Ok(Some(entry)) => {
                    tracing::debug!(url = %request.url, "served from precache");
                    return Some(StrategyOutcome::new(entry.response, ResponseSource::Precache));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(url = %request.url, "precache read failed: {e}");
                    return None;
                }
            }
        }
        None
    }

    async fn navigation_fallback(
        &self, version: &str, request: &InterceptedRequest, err: Error,
    ) -> Result<StrategyOutcome, Error> {
        let Some(fallback) = &self.navigate_fallback else {
            return Err(err);
        };
        if self.fallback_denylist.iter().any(|p| p.is_match(request.url.path())) {
            return Err(err);
        }

        let url = resolve(fallback, &self.origin).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let key = InterceptedRequest::get(url).cache_key();
        match self.db().get_entry(&precache_name(version), &key, None, Utc::now()).await {
            Ok(Some(entry)) => {
                tracing::debug!(url = %request.url, fallback = %fallback, error = %err, "serving navigation fallback");
                Ok(StrategyOutcome::new(entry.response, ResponseSource::Fallback))
            }
            Ok(None) => Err(err),
            Err(e) => {
                tracing::warn!(url = %request.url, "fallback read failed: {e}");
                Err(err)
            }
        }
    }

    /// Install `manifest` as `version` (default: the manifest fingerprint).
    ///
    /// Returns the state the version ended in: `Waiting`, or `Active` when
    /// nothing held the previous version. Installing the active version
    /// again is a no-op.
    pub async fn install(&self, manifest: &PrecacheManifest, version: Option<&str>) -> Result<LifecycleState, Error> {
        let version = match version {
            Some(v) if v.trim().is_empty() => return Err(Error::InvalidInput("version must not be empty".into())),
            Some(v) => v.trim().to_string(),
            None => manifest.fingerprint(),
        };

        if self.active_version().as_deref() == Some(version.as_str()) {
            tracing::info!(version = %version, "version already active, nothing to install");
            return Ok(LifecycleState::Active);
        }

        self.lifecycle().begin_install(&version)?;

        if let Err(e) = self.precache_version(&version, manifest).await {
            self.lifecycle().fail_install(&version);
            if let Err(record) = self.db().record_version(&version, LifecycleState::Redundant).await {
                tracing::warn!(version = %version, "failed to record failed install: {record}");
            }
            return Err(e);
        }

        let outcome = self.lifecycle().finish_install(&version)?;
        if let Some(superseded) = &outcome.superseded {
            self.db().record_version(superseded, LifecycleState::Redundant).await?;
        }
        match outcome.activation {
            Some(activation) => {
                self.complete_activation(activation).await?;
                Ok(LifecycleState::Active)
            }
            None => Ok(LifecycleState::Waiting),
        }
    }

    async fn precache_version(&self, version: &str, manifest: &PrecacheManifest) -> Result<(), Error> {
        self.db().record_version(version, LifecycleState::Installing).await?;
        self.loader.precache(version, manifest).await?;
        self.db().record_version(version, LifecycleState::Waiting).await
    }

    /// The "activate now" signal. Returns the version that took over, if any.
    pub async fn activate_waiting(&self) -> Result<Option<String>, Error> {
        let activation = self.lifecycle().skip_waiting();
        self.finish(activation).await
    }

    pub fn open_session(&self) -> SessionId {
        self.lifecycle().open_session()
    }

    /// Close a session; may let a waiting version take over.
    pub async fn close_session(&self, id: SessionId) -> Result<Option<String>, Error> {
        let activation = self.lifecycle().close_session(id)?;
        self.finish(activation).await
    }

    pub fn controller_of(&self, id: SessionId) -> Option<String> {
        self.lifecycle().controller_of(id).map(str::to_string)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle().subscribe()
    }

    pub async fn status(&self) -> Result<LayerStatus, Error> {
        let lifecycle = self.lifecycle().snapshot();
        let caches = self.db().list_caches().await?;
        Ok(LayerStatus { update_waiting: lifecycle.waiting.is_some(), lifecycle, caches })
    }

    /// Wait for background write-through and eviction.
    pub async fn settle(&self) {
        self.engine.settle().await;
    }

    async fn finish(&self, activation: Option<Activation>) -> Result<Option<String>, Error> {
        let Some(activation) = activation else {
            return Ok(None);
        };
        let version = activation.version.clone();
        self.complete_activation(activation).await?;
        Ok(Some(version))
    }

    async fn complete_activation(&self, activation: Activation) -> Result<(), Error> {
        self.db().record_activation(&activation.version).await?;
        // Versions that installed or started waiting while this activation
        // was pending keep their caches.
        let snapshot = self.lifecycle().snapshot();
        let keep: Vec<String> = [Some(activation.version.clone()), snapshot.waiting, snapshot.installing]
            .into_iter()
            .flatten()
            .collect();
        let deleted = self.db().delete_stale_caches(&keep).await?;
        tracing::info!(
            version = %activation.version,
            previous = activation.previous.as_deref().unwrap_or("none"),
            claimed_sessions = activation.claimed_sessions,
            deleted_caches = deleted,
            "layer version activated"
        );
        Ok(())
    }
}
