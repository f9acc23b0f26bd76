//! Precache loader: populates `precache-<version>` from a manifest.
//!
//! An install is all-or-nothing. Every asset is resolved first (from this
//! version's precache, another version's precache with the same revision, or
//! the network) and only then committed in a single transaction.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use url::Url;

use backstage_core::cache::{CacheDb, CachedEntry, PRECACHE_PREFIX, precache_name};
use backstage_core::policy::InterceptedRequest;
use backstage_core::{Error, PrecacheEntry, PrecacheManifest};

use crate::fetch::{Network, resolve};

/// Precache fetches must come back with exactly this status.
const PRECACHE_STATUS: u16 = 200;

/// How each manifest entry was satisfied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrecacheReport {
    pub fetched: usize,
    pub reused: usize,
    pub unchanged: usize,
}

pub struct PrecacheLoader {
    db: CacheDb,
    network: Arc<dyn Network>,
    origin: Url,
}

impl PrecacheLoader {
    pub fn new(db: CacheDb, network: Arc<dyn Network>, origin: Url) -> Self {
        Self { db, network, origin }
    }

    /// Make `precache-<version>` hold every manifest entry at its revision.
    ///
    /// Fails with `PrecacheFailed` on the first entry that cannot be
    /// obtained; nothing is written in that case.
    pub async fn precache(&self, version: &str, manifest: &PrecacheManifest) -> Result<PrecacheReport, Error> {
        let cache_name = precache_name(version);
        let mut report = PrecacheReport::default();
        let mut pending = Vec::new();

        for entry in manifest.entries() {
            let url = resolve(&entry.url, &self.origin).map_err(|e| failed(entry, e))?;
            let request = InterceptedRequest::get(url);
            let key = request.cache_key();
            let now = Utc::now();

            if let Some(current) = self.db.get_entry(&cache_name, &key, None, now).await?
                && current.revision.as_deref() == Some(entry.revision.as_str())
            {
                report.unchanged += 1;
                continue;
            }

            let response = match self.db.find_revision(PRECACHE_PREFIX, &key, &entry.revision).await? {
                Some(existing) => {
                    tracing::debug!(url = %request.url, from = %existing.cache_name, "reusing precached asset");
                    report.reused += 1;
                    existing.response
                }
                None => {
                    let response = self.network.fetch(&request).await.map_err(|e| failed(entry, e))?;
                    if response.status != PRECACHE_STATUS {
                        return Err(failed(entry, format!("status {}", response.status)));
                    }
                    report.fetched += 1;
                    response
                }
            };

            pending.push(
                CachedEntry::new(&cache_name, &request.method, request.url.as_str(), response, now)
                    .with_revision(&entry.revision),
            );
        }

        if !pending.is_empty() {
            self.db.put_entries(version, pending).await?;
        }

        tracing::info!(
            version,
            fetched = report.fetched,
            reused = report.reused,
            unchanged = report.unchanged,
            "precache complete"
        );
        Ok(report)
    }
}

fn failed(entry: &PrecacheEntry, reason: impl ToString) -> Error {
    Error::PrecacheFailed { url: entry.url.clone(), reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockNetwork;

    const ORIGIN: &str = "https://crew.example.com";

    fn manifest(entries: &[(&str, &str)]) -> PrecacheManifest {
        PrecacheManifest::new(entries.iter().map(|(u, r)| PrecacheEntry::new(*u, *r)).collect()).unwrap()
    }

    async fn loader(network: &Arc<MockNetwork>) -> PrecacheLoader {
        let db = CacheDb::open_in_memory().await.unwrap();
        PrecacheLoader::new(db, network.clone(), Url::parse(ORIGIN).unwrap())
    }

    fn serve_all(network: &MockNetwork) {
        network.respond(&format!("{ORIGIN}/index.html"), 200, "<html>");
        network.respond(&format!("{ORIGIN}/assets/app.js"), 200, "app()");
        network.respond(&format!("{ORIGIN}/assets/app.css"), 200, "body{}");
    }

    #[tokio::test]
    async fn test_precache_fetches_relative_urls_against_origin() {
        let network = MockNetwork::new();
        serve_all(&network);
        let loader = loader(&network).await;

        let report = loader
            .precache("v1", &manifest(&[("/index.html", "a"), ("assets/app.js", "b")]))
            .await
            .unwrap();

        assert_eq!(report, PrecacheReport { fetched: 2, reused: 0, unchanged: 0 });
        assert_eq!(loader.db.count_entries("precache-v1").await.unwrap(), 2);
        assert_eq!(network.calls(&format!("{ORIGIN}/assets/app.js")), 1);
    }

    #[tokio::test]
    async fn test_precache_same_manifest_twice_fetches_nothing() {
        let network = MockNetwork::new();
        serve_all(&network);
        let loader = loader(&network).await;
        let m = manifest(&[("/index.html", "a"), ("/assets/app.js", "b"), ("/assets/app.css", "c")]);

        loader.precache("v1", &m).await.unwrap();
        let fetches = network.total_calls();

        let again = loader.precache("v1", &m).await.unwrap();
        assert_eq!(again, PrecacheReport { fetched: 0, reused: 0, unchanged: 3 });
        assert_eq!(network.total_calls(), fetches);
        assert_eq!(loader.db.count_entries("precache-v1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_precache_reuses_unchanged_revisions_from_other_version() {
        let network = MockNetwork::new();
        serve_all(&network);
        let loader = loader(&network).await;

        loader.precache("v1", &manifest(&[("/index.html", "a"), ("/assets/app.js", "b")])).await.unwrap();
        let report =
            loader.precache("v2", &manifest(&[("/index.html", "a2"), ("/assets/app.js", "b")])).await.unwrap();

        assert_eq!(report, PrecacheReport { fetched: 1, reused: 1, unchanged: 0 });
        assert_eq!(network.calls(&format!("{ORIGIN}/assets/app.js")), 1);
        assert_eq!(network.calls(&format!("{ORIGIN}/index.html")), 2);
        assert_eq!(loader.db.count_entries("precache-v2").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_precache_failure_writes_nothing() {
        let network = MockNetwork::new();
        serve_all(&network);
        network.respond(&format!("{ORIGIN}/assets/app.css"), 404, "missing");
        let loader = loader(&network).await;

        let err = loader
            .precache("v1", &manifest(&[("/index.html", "a"), ("/assets/app.css", "c")]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PrecacheFailed { ref url, .. } if url == "/assets/app.css"), "{err}");
        assert!(!loader.db.cache_exists("precache-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_precache_network_error_names_entry() {
        let network = MockNetwork::new();
        let loader = loader(&network).await;

        let err = loader.precache("v1", &manifest(&[("/offline.html", "z")])).await.unwrap_err();
        assert!(err.to_string().starts_with("PRECACHE_FAILED: /offline.html"), "{err}");
    }
}
